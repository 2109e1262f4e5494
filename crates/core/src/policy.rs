//! Row-ownership access policy for AIMS records.
//!
//! The database historically enforced these rules as row-level-security
//! predicates. Here they are a plain function so callers can evaluate and test
//! them without a database session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperUser,
    Admin,
    PartnerGovernment,
    DevPartnerTier1,
    DevPartnerTier2,
    Member,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SuperUser => "super_user",
            Self::Admin => "admin",
            Self::PartnerGovernment => "partner_government",
            Self::DevPartnerTier1 => "dev_partner_tier_1",
            Self::DevPartnerTier2 => "dev_partner_tier_2",
            Self::Member => "member",
        }
    }

    /// May edit or delete records owned by someone else. Partner government
    /// is the legacy "super user" permission level.
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::SuperUser | Self::Admin | Self::PartnerGovernment)
    }

    #[must_use]
    pub const fn can_create_activities(self) -> bool {
        matches!(
            self,
            Self::SuperUser | Self::Admin | Self::PartnerGovernment | Self::DevPartnerTier1
        )
    }

    /// Map a legacy profile permission level onto a role.
    #[must_use]
    pub fn from_permission_level(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "partner_government" => Self::PartnerGovernment,
            // Edits records of its own organization only.
            "organization" | "editor" => Self::DevPartnerTier1,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "super_user" | "superuser" => Ok(Self::SuperUser),
            "admin" => Ok(Self::Admin),
            "partner_government" => Ok(Self::PartnerGovernment),
            "dev_partner_tier_1" => Ok(Self::DevPartnerTier1),
            "dev_partner_tier_2" => Ok(Self::DevPartnerTier2),
            "member" => Ok(Self::Member),
            _ => Err(CoreError::UnknownVariant { kind: "role", value: s.to_owned() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    /// Bulk import of activities, organizations or transactions.
    Import,
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "select" => Ok(Self::Read),
            "create" | "insert" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "import" => Ok(Self::Import),
            _ => Err(CoreError::UnknownVariant { kind: "action", value: s.to_owned() }),
        }
    }
}

/// The caller's identity as supplied by the authentication layer.
/// `user_id == None` means an anonymous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { user_id: None, role: Role::Member }
    }

    #[must_use]
    pub const fn user(user_id: Uuid, role: Role) -> Self {
        Self { user_id: Some(user_id), role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: &'static str },
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny { reason } => write!(f, "deny: {reason}"),
        }
    }
}

/// Decide whether `actor` may perform `action` on a record owned by `owner`.
#[must_use]
pub fn authorize(actor: &Actor, action: Action, owner: Option<Uuid>) -> Decision {
    let Some(user_id) = actor.user_id else {
        return Decision::Deny { reason: "not authenticated" };
    };

    match action {
        Action::Read => Decision::Allow,
        Action::Create if actor.role.can_create_activities() => Decision::Allow,
        Action::Create => Decision::Deny { reason: "role cannot create activities" },
        Action::Update | Action::Delete => {
            if actor.role.is_elevated() || owner == Some(user_id) {
                Decision::Allow
            } else {
                Decision::Deny { reason: "not the record owner" }
            }
        },
        Action::Import if actor.role.can_create_activities() => Decision::Allow,
        Action::Import => Decision::Deny { reason: "role cannot bulk import" },
    }
}
