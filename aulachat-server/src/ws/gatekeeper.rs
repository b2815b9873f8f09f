//! Handshake-time authentication for the realtime channel.
//!
//! The gatekeeper validates a bearer token and resolves it to a user
//! profile before the socket upgrade completes. Rejection happens while
//! the request is still plain HTTP, so a failed handshake leaves no
//! trace in the registry, the rooms, or the presence table.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use shared::models::UserProfile;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("bearer token has expired")]
    ExpiredToken,
    #[error("token does not resolve to a known user")]
    UnknownUser,
    #[error("identity lookup failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// HS256 claims carried by platform-issued tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
}

/// Resolves a verified user id to a profile. Database-backed in
/// production, stubbed in tests.
#[async_trait]
pub trait IdentityResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, user_id: Uuid) -> Result<Option<UserProfile>, sqlx::Error>;
}

/// [`IdentityResolver`] backed by the platform's `users` table.
#[derive(Debug, Clone)]
pub struct SqlIdentityResolver {
    pool: PgPool,
}

impl SqlIdentityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for SqlIdentityResolver {
    async fn resolve(&self, user_id: Uuid) -> Result<Option<UserProfile>, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct UserRow {
            id: Uuid,
            nickname: String,
            avatar_url: Option<String>,
        }

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, nickname, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserProfile {
            id: row.id,
            nickname: row.nickname,
            avatar_url: row.avatar_url,
        }))
    }
}

/// Validates bearer tokens and resolves them to user profiles.
pub struct ConnectionGatekeeper {
    decoding_key: DecodingKey,
    validation: Validation,
    resolver: Arc<dyn IdentityResolver>,
}

impl fmt::Debug for ConnectionGatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGatekeeper")
            .finish_non_exhaustive()
    }
}

impl ConnectionGatekeeper {
    pub fn new(jwt_secret: &str, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            resolver,
        }
    }

    /// Verifies the token signature and expiry, returning the subject id.
    ///
    /// # Errors
    /// `ExpiredToken` for a stale token, `InvalidToken` for anything
    /// else the decoder rejects.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })?;
        Ok(data.claims.sub)
    }

    /// Full handshake check: token present, valid, unexpired, and
    /// resolving to an existing user.
    ///
    /// # Errors
    /// Returns the reason the handshake must be rejected.
    #[instrument(name = "auth.authenticate", skip(self, token), err)]
    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserProfile, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let user_id = self.verify(token)?;
        self.resolver
            .resolve(user_id)
            .await?
            .ok_or(AuthError::UnknownUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header};
    use std::collections::HashMap;

    const SECRET: &str = "test-secret";

    #[derive(Debug, Default)]
    struct StaticResolver {
        users: HashMap<Uuid, UserProfile>,
    }

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn resolve(&self, user_id: Uuid) -> Result<Option<UserProfile>, sqlx::Error> {
            Ok(self.users.get(&user_id).cloned())
        }
    }

    fn token_for(user_id: Uuid, expires_in: Duration) -> String {
        let claims = Claims {
            sub: user_id,
            exp: (Utc::now() + expires_in).timestamp(),
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn gatekeeper_with(users: Vec<UserProfile>) -> ConnectionGatekeeper {
        let users = users.into_iter().map(|user| (user.id, user)).collect();
        ConnectionGatekeeper::new(SECRET, Arc::new(StaticResolver { users }))
    }

    #[tokio::test]
    async fn valid_token_resolves_to_the_profile() {
        let user = UserProfile {
            id: Uuid::new_v4(),
            nickname: "ana".into(),
            avatar_url: None,
        };
        let gatekeeper = gatekeeper_with(vec![user.clone()]);
        let token = token_for(user.id, Duration::minutes(5));

        let resolved = gatekeeper.authenticate(Some(&token)).await.unwrap();
        assert_eq!(resolved, user);
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let gatekeeper = gatekeeper_with(vec![]);
        let result = gatekeeper.authenticate(None).await;
        assert!(matches!(result, Err(AuthError::MissingToken)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_as_expired() {
        let user_id = Uuid::new_v4();
        let gatekeeper = gatekeeper_with(vec![]);
        let token = token_for(user_id, Duration::minutes(-5));

        let result = gatekeeper.authenticate(Some(&token)).await;
        assert!(matches!(result, Err(AuthError::ExpiredToken)));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let gatekeeper = gatekeeper_with(vec![]);
        let result = gatekeeper.authenticate(Some("not-a-jwt")).await;
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn token_for_deleted_user_is_rejected() {
        let gatekeeper = gatekeeper_with(vec![]);
        let token = token_for(Uuid::new_v4(), Duration::minutes(5));

        let result = gatekeeper.authenticate(Some(&token)).await;
        assert!(matches!(result, Err(AuthError::UnknownUser)));
    }
}
