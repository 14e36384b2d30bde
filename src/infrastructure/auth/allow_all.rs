//! Development fallback `AuthCheck`: grants write access to anyone,
//! used when `AUTH_PUBLIC_KEY` is unset (local dev only, never production).

use async_trait::async_trait;

use crate::application::ports::auth::{AuthCheck, AuthError};
use crate::domain::{Actor, Permission};

pub struct AllowAllAuthCheck;

#[async_trait]
impl AuthCheck for AllowAllAuthCheck {
    async fn check(&self, token: Option<&str>, _room: &str) -> Result<Actor, AuthError> {
        Ok(Actor {
            user_id: token.unwrap_or("anonymous").to_string(),
            permission: Permission::Write,
        })
    }
}
