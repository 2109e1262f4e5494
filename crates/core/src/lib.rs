//! Core types for iati-migrate
//!
//! Migration steps and plans, validated identifiers, outcomes, the duplicate
//! identifier planner, the step ledger model and the AIMS access policy.
//! Nothing in this crate talks to a database.

mod constants;
mod dedup;
mod env_config;
mod error;
mod ident;
mod ledger;
mod outcome;
mod policy;
mod step;
mod type_decl;

pub use constants::*;
pub use dedup::*;
pub use env_config::*;
pub use error::*;
pub use ident::*;
pub use ledger::*;
pub use outcome::*;
pub use policy::*;
pub use step::*;
pub use type_decl::*;

/// The plan for the AIMS schema shipped with the binary.
pub fn aims_plan() -> Result<MigrationPlan> {
    MigrationPlan::from_json(include_str!("../plans/aims.json"))
}
