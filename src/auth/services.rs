use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::Duration;
use tracing::{debug, info, warn};

use super::{
    dto::{RegisterRequest, ResetPasswordRequest},
    errors::AuthError,
    jwt::TokenCodec,
    password::PasswordHasher,
    repo::{CredentialStore, StoreError},
    repo_types::{NewUser, User},
};
use crate::config::JwtConfig;

/// Well-formed Argon2id hash that matches no password. Verified against when
/// the email is unknown so both login failure paths cost one hash.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$\
                          AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Width of the `users` text columns.
const MAX_FIELD_CHARS: usize = 100;

fn check_length(field: &str, value: &str) -> Result<(), AuthError> {
    if value.chars().count() > MAX_FIELD_CHARS {
        return Err(AuthError::BadRequest(format!(
            "{field} must be at most {MAX_FIELD_CHARS} characters"
        )));
    }
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Registration, login, password reset and bearer-token resolution.
///
/// Every write of `password_hash` goes through [`AuthService::hash`], and only
/// ever with a plaintext the caller handed in.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    tokens: TokenCodec,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, cfg: &JwtConfig) -> Self {
        Self {
            store,
            hasher: PasswordHasher::new(),
            tokens: TokenCodec::new(cfg),
            session_ttl: Duration::minutes(cfg.session_ttl_minutes),
        }
    }

    #[cfg(test)]
    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    // Argon2 is deliberately slow; keep it off the async workers.
    async fn hash(&self, plain: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        Ok(tokio::task::spawn_blocking(move || hasher.hash(&plain)).await??)
    }

    async fn verify(&self, plain: String, stored_hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&plain, &stored_hash)).await?)
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<User, AuthError> {
        let email = normalize_email(&req.email);
        if !is_valid_email(&email) {
            return Err(AuthError::BadRequest("Invalid email".into()));
        }
        check_length("email", &email)?;
        check_length("first_name", &req.first_name)?;
        check_length("last_name", &req.last_name)?;
        check_length("phone", &req.phone)?;

        if self.store.find_by_email(&email).await?.is_some() {
            warn!("registration for an email already in use");
            return Err(AuthError::Conflict);
        }

        let password_hash = self.hash(req.password).await?;
        let user = self
            .store
            .insert(NewUser {
                email,
                first_name: req.first_name,
                last_name: req.last_name,
                phone: req.phone,
                gender: req.gender,
                accepts_marketing: req.accepts_marketing,
                gdpr_consent: req.gdpr_consent,
                password_hash,
            })
            .await
            .map_err(|e| {
                if matches!(e, StoreError::Conflict) {
                    warn!("email taken between check and insert");
                }
                AuthError::from(e)
            })?;

        info!(user_id = %user.id, "account registered");
        Ok(user)
    }

    /// Unknown email and wrong password are the same `Unauthorized`.
    pub async fn authenticate(&self, email: &str, password: String) -> Result<User, AuthError> {
        let email = normalize_email(email);
        let user = self.store.find_by_email(&email).await?;

        let stored = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| DUMMY_HASH.to_owned());
        let ok = self.verify(password, stored).await?;

        match user {
            Some(u) if ok => Ok(u),
            Some(u) => {
                warn!(user_id = %u.id, "login invalid password");
                Err(AuthError::Unauthorized)
            }
            None => {
                warn!("login unknown email");
                Err(AuthError::Unauthorized)
            }
        }
    }

    pub fn issue_session_token(&self, user: &User) -> Result<String, AuthError> {
        Ok(self.tokens.issue(&user.email, self.session_ttl)?)
    }

    pub async fn login(&self, email: &str, password: String) -> Result<String, AuthError> {
        let user = self.authenticate(email, password).await?;
        let token = self.issue_session_token(&user)?;
        info!(user_id = %user.id, "user logged in");
        Ok(token)
    }

    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AuthError> {
        let email = normalize_email(&req.email);
        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self
            .verify(req.current_password, user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "password reset with wrong current password");
            return Err(AuthError::BadRequest("Current password is incorrect".into()));
        }

        let new_hash = self.hash(req.new_password).await?;
        self.store.update_password_hash(user.id, &new_hash).await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    /// Resolves a bearer token to its account. Every token failure is the same
    /// `Unauthorized` to the caller; the reason only reaches the logs.
    pub async fn authenticate_request(&self, bearer: Option<&str>) -> Result<User, AuthError> {
        let token = bearer.ok_or(AuthError::Unauthorized)?;

        let claims = self.tokens.decode(token).map_err(|e| {
            debug!(reason = %e, "bearer token rejected");
            AuthError::Unauthorized
        })?;

        match self.store.find_by_email(&claims.sub).await? {
            Some(user) => Ok(user),
            None => {
                debug!("bearer token for a missing account");
                Err(AuthError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use jsonwebtoken::Algorithm;

    use super::*;
    use crate::auth::repo::memory::{DownCredentialStore, MemoryCredentialStore};
    use crate::auth::repo_types::Gender;

    pub(crate) fn test_jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".into(),
            algorithm: Algorithm::HS256,
            ttl_minutes: 15,
            session_ttl_minutes: 300,
        }
    }

    pub(crate) fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            gender: Gender::Other,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: "+33 1 23 45 67 89".into(),
            accepts_marketing: true,
            gdpr_consent: true,
        }
    }

    fn service() -> (AuthService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::default());
        let svc = AuthService::new(store.clone(), &test_jwt_config());
        (svc, store)
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let (svc, _) = service();
        let created = svc
            .register(register_request("Ada@Example.com ", "s3cret-pass"))
            .await
            .expect("register");
        assert_eq!(created.email, "ada@example.com");

        let user = svc
            .authenticate("ada@example.com", "s3cret-pass".into())
            .await
            .expect("authenticate");
        assert_eq!(user.id, created.id);

        let err = svc
            .authenticate("ada@example.com", "not-it".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn stored_hash_is_never_the_plaintext() {
        let (svc, store) = service();
        svc.register(register_request("ada@example.com", "s3cret-pass"))
            .await
            .unwrap();
        let hash = store.password_hash_of("ada@example.com").await.unwrap();
        assert_ne!(hash, "s3cret-pass");
        assert!(hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (svc, _) = service();
        svc.register(register_request("real@example.com", "right-pass"))
            .await
            .unwrap();

        let unknown = svc
            .authenticate("nouser@example.com", "anything".into())
            .await
            .unwrap_err();
        let wrong = svc
            .authenticate("real@example.com", "wrong-pass".into())
            .await
            .unwrap_err();

        assert!(matches!(unknown, AuthError::Unauthorized));
        assert!(matches!(wrong, AuthError::Unauthorized));
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.status(), wrong.status());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (svc, _) = service();
        svc.register(register_request("ada@example.com", "one"))
            .await
            .unwrap();
        let err = svc
            .register(register_request("ADA@example.com", "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_duplicate_registrations_yield_one_winner() {
        let (svc, _) = service();
        let svc = Arc::new(svc);
        let (a, b) = tokio::join!(
            {
                let svc = svc.clone();
                async move { svc.register(register_request("race@example.com", "a")).await }
            },
            {
                let svc = svc.clone();
                async move { svc.register(register_request("race@example.com", "b")).await }
            }
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AuthError::Conflict)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn register_rejects_malformed_email() {
        let (svc, _) = service();
        let err = svc
            .register(register_request("not-an-email", "pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));
    }

    #[tokio::test]
    async fn register_rejects_values_wider_than_their_column() {
        let (svc, store) = service();
        let long_email = format!("{}@example.com", "a".repeat(89));
        assert_eq!(long_email.len(), 101);
        let err = svc
            .register(register_request(&long_email, "pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));
        assert!(store.password_hash_of(&long_email).await.is_none());

        let mut req = register_request("ada@example.com", "pass");
        req.last_name = "x".repeat(101);
        let err = svc.register(req).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(ref m) if m.contains("last_name")));

        let mut req = register_request("ada@example.com", "pass");
        req.first_name = "é".repeat(100);
        assert!(svc.register(req).await.is_ok());
    }

    #[tokio::test]
    async fn session_token_names_the_account_and_lasts_300_minutes() {
        let (svc, _) = service();
        svc.register(register_request("ada@example.com", "pw"))
            .await
            .unwrap();
        let token = svc.login("ada@example.com", "pw".into()).await.unwrap();
        let claims = svc.tokens().decode(&token).unwrap();
        assert_eq!(claims.sub, "ada@example.com");
        assert_eq!(claims.exp - claims.iat, 300 * 60);
    }

    #[tokio::test]
    async fn reset_password_with_wrong_current_password_changes_nothing() {
        let (svc, store) = service();
        svc.register(register_request("ada@example.com", "original"))
            .await
            .unwrap();
        let before = store.password_hash_of("ada@example.com").await;

        let err = svc
            .reset_password(ResetPasswordRequest {
                email: "ada@example.com".into(),
                current_password: "guess".into(),
                new_password: "hijacked".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));

        assert_eq!(store.password_hash_of("ada@example.com").await, before);
        assert!(svc
            .authenticate("ada@example.com", "original".into())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn reset_password_swaps_credentials() {
        let (svc, _) = service();
        svc.register(register_request("ada@example.com", "original"))
            .await
            .unwrap();
        svc.reset_password(ResetPasswordRequest {
            email: "ada@example.com".into(),
            current_password: "original".into(),
            new_password: "replacement".into(),
        })
        .await
        .expect("reset");

        assert!(svc
            .authenticate("ada@example.com", "replacement".into())
            .await
            .is_ok());
        assert!(matches!(
            svc.authenticate("ada@example.com", "original".into()).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn reset_password_for_unknown_account_is_not_found() {
        let (svc, _) = service();
        let err = svc
            .reset_password(ResetPasswordRequest {
                email: "ghost@example.com".into(),
                current_password: "x".into(),
                new_password: "y".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn authenticate_request_resolves_valid_token() {
        let (svc, _) = service();
        let user = svc
            .register(register_request("ada@example.com", "pw"))
            .await
            .unwrap();
        let token = svc.issue_session_token(&user).unwrap();
        let resolved = svc.authenticate_request(Some(&token)).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn authenticate_request_rejects_missing_bad_and_expired_tokens() {
        let (svc, _) = service();
        svc.register(register_request("ada@example.com", "pw"))
            .await
            .unwrap();
        let expired = svc
            .tokens()
            .issue("ada@example.com", Duration::seconds(-10))
            .unwrap();

        for bearer in [None, Some("garbage"), Some(expired.as_str())] {
            let err = svc.authenticate_request(bearer).await.unwrap_err();
            assert!(matches!(err, AuthError::Unauthorized), "{bearer:?}");
        }
    }

    #[tokio::test]
    async fn token_for_deleted_account_is_rejected() {
        let (svc, store) = service();
        let user = svc
            .register(register_request("ada@example.com", "pw"))
            .await
            .unwrap();
        let token = svc.issue_session_token(&user).unwrap();
        store.remove("ada@example.com").await;

        let err = svc.authenticate_request(Some(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_unavailable() {
        let svc = AuthService::new(Arc::new(DownCredentialStore), &test_jwt_config());

        let err = svc.login("ada@example.com", "pw".into()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));

        let token = svc.tokens().issue_default("ada@example.com").unwrap();
        let err = svc.authenticate_request(Some(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
