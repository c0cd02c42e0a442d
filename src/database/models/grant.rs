use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{TenantId, UnknownVariant, UserId};

/// Why a grant row exists. `home` and `super_admin` rows are derived from the
/// user's role and kept in sync by the guard; `explicit` rows are managed by admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Explicit,
    Home,
    SuperAdmin,
}

impl GrantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantSource::Explicit => "explicit",
            GrantSource::Home => "home",
            GrantSource::SuperAdmin => "super_admin",
        }
    }
}

impl TryFrom<String> for GrantSource {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "explicit" => Ok(GrantSource::Explicit),
            "home" => Ok(GrantSource::Home),
            "super_admin" => Ok(GrantSource::SuperAdmin),
            _ => Err(UnknownVariant { kind: "grant source", value }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantAccessGrant {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    #[sqlx(try_from = "String")]
    pub source: GrantSource,
    pub granted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}
