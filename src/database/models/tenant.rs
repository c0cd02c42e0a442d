use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{TenantId, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
}

impl TryFrom<String> for TenantStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            _ => Err(UnknownVariant { kind: "tenant status", value }),
        }
    }
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub vat_number: Option<String>,
    pub tax_code: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Visible to super_admins: active and not soft-deleted
    pub fn is_live(&self) -> bool {
        self.status == TenantStatus::Active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub vat_number: Option<String>,
    pub tax_code: Option<String>,
}

impl NewTenant {
    /// Mirrors the `chk_tenants_fiscal_id` check so callers get a validation error up front
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.chars().count() < 2 {
            return Err("Tenant name must be at least 2 characters".to_string());
        }
        if name.chars().count() > 100 {
            return Err("Tenant name must be less than 100 characters".to_string());
        }
        let present = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.trim().is_empty());
        if !present(&self.vat_number) && !present(&self.tax_code) {
            return Err("Tenant requires a VAT number or a tax code".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tenant(name: &str, vat: Option<&str>, tax: Option<&str>) -> NewTenant {
        NewTenant {
            name: name.to_string(),
            vat_number: vat.map(str::to_string),
            tax_code: tax.map(str::to_string),
        }
    }

    #[test]
    fn fiscal_identifier_required() {
        assert!(new_tenant("Test Company", Some("IT01234567890"), None).validate().is_ok());
        assert!(new_tenant("Test Company", None, Some("RSSMRA80A01H501U")).validate().is_ok());
        assert!(new_tenant("Test Company", None, None).validate().is_err());
        assert!(new_tenant("Test Company", Some("  "), None).validate().is_err());
    }

    #[test]
    fn name_length_bounds() {
        assert!(new_tenant("X", Some("1"), None).validate().is_err());
        assert!(new_tenant(&"x".repeat(101), Some("1"), None).validate().is_err());
    }
}
