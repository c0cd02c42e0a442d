pub mod grant;
pub mod tenant;
pub mod user;

pub use grant::{GrantSource, TenantAccessGrant};
pub use tenant::{NewTenant, Tenant, TenantStatus};
pub use user::{NewUser, Role, User};

pub type TenantId = i64;
pub type UserId = i64;

/// A text column held a value outside its enum
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
