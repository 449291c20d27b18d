//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user in the `x-user-id` and `x-user-role` headers. This module only turns
//! those headers into a [`Principal`] and answers capability questions.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Farmer,
    Buyer,
    Partner,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "farmer" => Some(Self::Farmer),
            "buyer" => Some(Self::Buyer),
            "partner" => Some(Self::Partner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with `Forbidden` unless the caller holds one of `roles`.
    pub fn require(&self, roles: &[Role], action: &str) -> Result<(), AppError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not permitted to {action}")))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?;
        let role = header(USER_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| {
                AppError::Unauthenticated(format!("missing or unknown {USER_ROLE_HEADER} header"))
            })?;

        Ok(Principal::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<Principal, AppError> {
        let (mut parts, _) = req.into_parts();
        Principal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_headers() {
        let req = Request::builder()
            .header(USER_ID_HEADER, "partner-1")
            .header(USER_ROLE_HEADER, "Partner")
            .body(())
            .unwrap();
        let p = extract(req).await.unwrap();
        assert_eq!(p, Principal::new("partner-1", Role::Partner));
    }

    #[tokio::test]
    async fn missing_or_unknown_role_is_unauthenticated() {
        let req = Request::builder()
            .header(USER_ID_HEADER, "u1")
            .header(USER_ROLE_HEADER, "superuser")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Unauthenticated(_))));

        let req = Request::builder().body(()).unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Unauthenticated(_))));
    }

    #[test]
    fn require_rejects_other_roles() {
        let farmer = Principal::new("f1", Role::Farmer);
        assert!(matches!(
            farmer.require(&[Role::Partner, Role::Admin], "approve harvests"),
            Err(AppError::Forbidden(_))
        ));
        assert!(Principal::new("a1", Role::Admin)
            .require(&[Role::Partner, Role::Admin], "approve harvests")
            .is_ok());
    }
}
