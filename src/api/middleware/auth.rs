use axum::{extract::FromRequestParts, http::request::Parts};
use secrecy::ExposeSecret;

use super::state::AppState;
use crate::error::AppError;
use crate::services::signature;

pub const STAFF_ID_HEADER: &str = "x-staff-id";
pub const STAFF_ROLE_HEADER: &str = "x-staff-role";
pub const STAFF_SIGNATURE_HEADER: &str = "x-staff-signature";

/// Role allowed to register vendor card batches
pub const CARD_ADMIN_ROLE: &str = "CardAdmin";

/// Staff identity asserted by the upstream gateway and verified per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedStaff {
    pub staff_id: String,
    pub role: String,
}

impl AuthenticatedStaff {
    pub fn require_role(&self, role: &str) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            tracing::warn!(staff_id = %self.staff_id, role = %self.role, required = role, "Role check failed");
            Err(AppError::Forbidden(format!("{role} role required")))
        }
    }
}

/// Payload covered by the identity signature
pub fn identity_payload(staff_id: &str, role: &str) -> String {
    format!("{staff_id}:{role}")
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedStaff {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (Some(staff_id), Some(role), Some(sig)) = (
            header(parts, STAFF_ID_HEADER),
            header(parts, STAFF_ROLE_HEADER),
            header(parts, STAFF_SIGNATURE_HEADER),
        ) else {
            return Err(AppError::Unauthorized);
        };

        // ':' separates id from role in the signed payload
        if staff_id.contains(':') {
            return Err(AppError::Unauthorized);
        }

        let key = state.config.identity_secret.expose_secret().as_bytes();
        if !signature::verify(&identity_payload(staff_id, role), sig, key) {
            tracing::warn!(staff_id, "Rejected staff identity with bad signature");
            return Err(AppError::Unauthorized);
        }

        Ok(Self {
            staff_id: staff_id.to_string(),
            role: role.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_check() {
        let staff = AuthenticatedStaff {
            staff_id: "nurse-7".to_string(),
            role: "Nurse".to_string(),
        };
        assert!(matches!(
            staff.require_role(CARD_ADMIN_ROLE),
            Err(AppError::Forbidden(_))
        ));

        let admin = AuthenticatedStaff {
            staff_id: "admin-1".to_string(),
            role: CARD_ADMIN_ROLE.to_string(),
        };
        assert!(admin.require_role(CARD_ADMIN_ROLE).is_ok());
    }

    #[test]
    fn payload_joins_id_and_role() {
        assert_eq!(identity_payload("nurse-7", "Nurse"), "nurse-7:Nurse");
    }
}
