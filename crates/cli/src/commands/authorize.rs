//! Offline evaluation of the record access policy.

use anyhow::{Context, Result};
use iati_migrate_core::{Action, Actor, Role, authorize};
use serde_json::json;
use uuid::Uuid;

use super::print_json;

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    value.parse().with_context(|| format!("{what} must be a UUID, got {value:?}"))
}

/// Print the decision; returns whether the action is allowed.
pub(crate) fn run(
    role: Option<&str>,
    permission_level: Option<&str>,
    action: &str,
    user: Option<&str>,
    owner: Option<&str>,
    json: bool,
) -> Result<bool> {
    let role = match (role, permission_level) {
        (Some(role), _) => role.parse::<Role>()?,
        (None, Some(level)) => Role::from_permission_level(level),
        (None, None) => Role::Member,
    };
    let action: Action = action.parse()?;
    let actor = match user {
        Some(user) => Actor::user(parse_uuid(user, "--user")?, role),
        None => Actor::anonymous(),
    };
    let owner = owner.map(|o| parse_uuid(o, "--owner")).transpose()?;

    let decision = authorize(&actor, action, owner);
    tracing::debug!(role = %role, ?action, anonymous = actor.user_id.is_none(), %decision, "policy evaluated");
    if json {
        let mut value = serde_json::to_value(&decision)?;
        value["role"] = json!(role);
        value["action"] = json!(action);
        print_json(&value)?;
    } else {
        println!("{decision}");
    }
    Ok(decision.is_allowed())
}
