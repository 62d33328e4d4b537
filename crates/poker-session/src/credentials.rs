use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use poker_db::Store;
use poker_types::api::Claims;
use poker_types::models::{AuthToken, User};

use crate::error::{PokerError, Result};

/// Lifetime of the identity token handed out after a successful exchange.
const IDENTITY_TOKEN_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct MagicLink {
    pub token: String,
    pub url: String,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct Identity {
    pub token: String,
    pub user: User,
}

/// Magic-link credential flow: single-use verification tokens exchanged for
/// a signed identity token.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn Store>,
    jwt_secret: Arc<str>,
    link_base: Arc<str>,
    link_ttl: Duration,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn Store>,
        jwt_secret: &str,
        frontend_origin: &str,
        link_ttl: Duration,
    ) -> Self {
        Self {
            store,
            jwt_secret: jwt_secret.into(),
            link_base: frontend_origin.trim_end_matches('/').into(),
            link_ttl,
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Create a verification token for `email`. Delivery is out of band; the
    /// URL is logged for development.
    pub async fn request_magic_link(&self, email: Option<&str>) -> Result<MagicLink> {
        let email = email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| PokerError::invalid("email required"))?
            .to_string();

        let row = AuthToken {
            token: Uuid::new_v4().to_string(),
            email,
            expires_at: Utc::now() + self.link_ttl,
            used: false,
        };
        let token = row.token.clone();
        self.blocking(move |store| Ok(store.insert_auth_token(&row)?))
            .await?;

        let url = format!("{}/auth/verify?token={}", self.link_base, token);
        info!("Magic link (dev): {}", url);
        Ok(MagicLink { token, url })
    }

    /// Exchange a verification token for an identity token. Unknown, expired
    /// and already-used tokens are all rejected as invalid input.
    pub async fn verify(&self, token: Option<&str>) -> Result<Identity> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PokerError::invalid("token required"))?
            .to_string();

        let user = self
            .blocking(move |store| {
                let row = store
                    .find_auth_token(&token)?
                    .ok_or_else(|| PokerError::invalid("invalid token"))?;
                // The conditional consume decides races; the read only
                // short-cuts tokens that are already dead.
                let now = Utc::now();
                if !row.is_redeemable(now) || !store.consume_auth_token(&token, now)? {
                    return Err(PokerError::invalid("token expired or used"));
                }
                find_or_create_user(store, &row.email)
            })
            .await?;

        let token = self.issue_token(&user)?;
        info!("User {} verified", user.id);
        Ok(Identity { token, user })
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            exp: (Utc::now() + Duration::days(IDENTITY_TOKEN_DAYS)).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| PokerError::Storage(e.into()))?;

        Ok(token)
    }

    /// Validate an identity token.
    pub fn authenticate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| PokerError::Unauthorized)
    }
}

/// Users are created lazily, keyed by email.
fn find_or_create_user(store: &dyn Store, email: &str) -> Result<User> {
    if let Some(user) = store.find_user_by_email(email)? {
        return Ok(user);
    }

    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
    };
    match store.insert_user(&user) {
        Ok(()) => Ok(user),
        Err(e) => {
            // Lost a race with another exchange for the same email
            warn!("User insert for {} failed, re-reading: {}", email, e);
            store
                .find_user_by_email(email)?
                .ok_or_else(|| PokerError::Storage(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use poker_db::Database;

    use super::*;

    fn service() -> CredentialService {
        let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());
        CredentialService::new(store, "test-secret", "http://localhost:5173/", Duration::minutes(15))
    }

    #[tokio::test]
    async fn magic_link_requires_email() {
        let svc = service();
        assert!(matches!(
            svc.request_magic_link(None).await,
            Err(PokerError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.request_magic_link(Some("  ")).await,
            Err(PokerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn magic_link_url_points_at_verify() {
        let svc = service();
        let link = svc.request_magic_link(Some("dev@example.com")).await.unwrap();
        assert_eq!(
            link.url,
            format!("http://localhost:5173/auth/verify?token={}", link.token)
        );
    }

    #[tokio::test]
    async fn token_exchange_is_single_use() {
        let svc = service();
        let link = svc.request_magic_link(Some("dev@example.com")).await.unwrap();

        let identity = svc.verify(Some(&link.token)).await.unwrap();
        assert_eq!(identity.user.email, "dev@example.com");

        let claims = svc.authenticate(&identity.token).unwrap();
        assert_eq!(claims.sub, identity.user.id);
        assert_eq!(claims.email, "dev@example.com");

        let err = svc.verify(Some(&link.token)).await.unwrap_err();
        assert!(matches!(err, PokerError::InvalidInput(ref m) if m == "token expired or used"));
    }

    #[tokio::test]
    async fn expired_used_and_unknown_tokens_are_rejected() {
        let svc = service();
        let row = AuthToken {
            token: "stale".into(),
            email: "dev@example.com".into(),
            expires_at: Utc::now() - Duration::minutes(1),
            used: false,
        };
        svc.store.insert_auth_token(&row).unwrap();
        let spent = AuthToken {
            token: "spent".into(),
            expires_at: Utc::now() + Duration::minutes(5),
            used: true,
            ..row
        };
        svc.store.insert_auth_token(&spent).unwrap();

        for dead in ["stale", "spent"] {
            let err = svc.verify(Some(dead)).await.unwrap_err();
            assert!(matches!(err, PokerError::InvalidInput(ref m) if m == "token expired or used"));
        }
        assert!(matches!(
            svc.verify(Some("never-issued")).await,
            Err(PokerError::InvalidInput(_))
        ));
        assert!(matches!(svc.verify(None).await, Err(PokerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn same_email_maps_to_same_user() {
        let svc = service();
        let a = svc.request_magic_link(Some("dev@example.com")).await.unwrap();
        let b = svc.request_magic_link(Some("dev@example.com")).await.unwrap();

        let first = svc.verify(Some(&a.token)).await.unwrap();
        let second = svc.verify(Some(&b.token)).await.unwrap();
        assert_eq!(first.user, second.user);
    }

    #[test]
    fn tampered_or_foreign_tokens_are_unauthorized() {
        let svc = service();
        let user = User {
            id: Uuid::new_v4(),
            email: "dev@example.com".into(),
        };
        let token = svc.issue_token(&user).unwrap();

        let other = CredentialService::new(
            svc.store.clone(),
            "other-secret",
            "http://localhost",
            Duration::minutes(15),
        );
        assert!(matches!(other.authenticate(&token), Err(PokerError::Unauthorized)));
        assert!(matches!(svc.authenticate("garbage"), Err(PokerError::Unauthorized)));
    }
}
