//! Reference `AuthCheck` implementation: RS256 JWTs verified against a
//! single public key (`AUTH_PUBLIC_KEY`, `spec.md` §6). The per-room
//! permission is carried in the token itself rather than looked up
//! externally, since authorization is explicitly out of scope and this
//! exists only so the gateway has something real to call.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::application::ports::auth::{AuthCheck, AuthError};
use crate::domain::{Actor, Permission};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    /// Either `"*"` (all rooms) or an exact room name this token is scoped to.
    room: String,
    #[serde(default)]
    write: bool,
}

pub struct JwtAuthCheck {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthCheck {
    pub fn from_public_key_pem(pem: &[u8]) -> anyhow::Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)?;
        let validation = Validation::new(Algorithm::RS256);
        Ok(Self {
            decoding_key,
            validation,
        })
    }
}

#[async_trait]
impl AuthCheck for JwtAuthCheck {
    async fn check(&self, token: Option<&str>, room: &str) -> Result<Actor, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;
        let claims = data.claims;
        if claims.room != "*" && claims.room != room {
            return Err(AuthError::RoomDenied);
        }
        Ok(Actor {
            user_id: claims.sub,
            permission: if claims.write {
                Permission::Write
            } else {
                Permission::Read
            },
        })
    }
}
