use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Roles allowed to operate the queue on behalf of a clinic.
pub const STAFF_ROLES: &[&str] = &["admin", "doctor", "staff", "receptionist", "nurse"];

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    /// Clinic the user works for; `None` for patients and platform admins.
    pub organization_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    pub fn is_staff(&self) -> bool {
        STAFF_ROLES.iter().any(|role| self.has_role(role))
    }

    /// Admins without an organization claim may act on any organization.
    pub fn can_access_organization(&self, organization_id: &str) -> bool {
        match self.organization_id.as_deref() {
            Some(own) => own.eq_ignore_ascii_case(organization_id),
            None => self.is_admin(),
        }
    }
}
