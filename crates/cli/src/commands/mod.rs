pub(crate) mod authorize;
pub(crate) mod check;
pub(crate) mod ledger;
pub(crate) mod plan;
pub(crate) mod repair;

use anyhow::Result;
use serde::Serialize;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
