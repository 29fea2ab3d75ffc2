use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::callbacks;
use crate::data_structs::account::Account;
use crate::data_structs::session::Session;
use crate::data_structs::session_token::SessionToken;
use crate::data_structs::user::{NewUser, User, UserUpdate};
use crate::encrypted_signing::JWTSecretKey;
use crate::errors::AuthError;
use crate::events;
use crate::google_oauth::{IdentityProvider, OAuthProfile};
use crate::session_store::SessionStore;
use crate::stripe_util::BillingProvider;

const STATE_LENGTH: usize = 32;

/// A freshly signed session cookie value.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedSession {
    pub cookie_value: String,
    pub max_age_secs: i64,
}

/// Result of a completed provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub session: IssuedSession,
    pub redirect_to: &'static str,
}

/// Wires the identity provider, session store and billing provider together.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn SessionStore>,
    billing: Arc<dyn BillingProvider>,
    provider: Arc<dyn IdentityProvider>,
    signer: JWTSecretKey,
    base_url: String,
}

pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

impl AuthService {

    pub fn new(
        store: Arc<dyn SessionStore>,
        billing: Arc<dyn BillingProvider>,
        provider: Arc<dyn IdentityProvider>,
        signer: JWTSecretKey,
        base_url: String,
    ) -> AuthService {
        AuthService { store, billing, provider, signer, base_url }
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub fn billing(&self) -> &dyn BillingProvider {
        self.billing.as_ref()
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Returns the provider authorization url and the state to remember.
    pub fn begin_sign_in(&self) -> (String, String) {
        let state = generate_state();
        (self.provider.authorization_url(&state), state)
    }

    /// Finishes the authorization-code flow and issues the first session token.
    pub async fn complete_sign_in(
        &self,
        code: &str,
        state: &str,
        expected_state: Option<&str>,
        callback_url: &str,
    ) -> Result<SignedIn, AuthError> {
        match expected_state {
            Some(expected) if !expected.is_empty() && expected == state => {}
            _ => return Err(AuthError::InvalidState),
        }

        let profile = self.provider.exchange_code(code).await?;
        let user = self.resolve_user(&profile).await?;

        let token = SessionToken::from_profile(profile.name, profile.email, profile.picture);
        let token = callbacks::jwt(self.store(), token, Some(&user)).await?;
        let (cookie_value, _) = self.signer.encrypt_jwt_token(token, Utc::now().timestamp())?;

        log::info!("user {} signed in with {}", user.id, self.provider.id());
        Ok(SignedIn {
            session: IssuedSession {
                cookie_value,
                max_age_secs: self.signer.max_age_secs(),
            },
            redirect_to: callbacks::redirect(callback_url, &self.base_url),
        })
    }

    /// Finds the user behind `profile`, creating and linking it on first sign in.
    async fn resolve_user(&self, profile: &OAuthProfile) -> Result<User, AuthError> {
        let provider = self.provider.id();
        if let Some(user) = self.store.get_user_by_account(provider, &profile.provider_account_id).await? {
            return self.sync_profile(user, profile).await;
        }

        if let Some(email) = profile.email.as_deref() {
            if self.store.get_user_by_email(email).await?.is_some() {
                return Err(AuthError::AccountNotLinked(email.to_string()));
            }
        }

        let new_user = NewUser {
            email: profile.email.clone(),
            name: profile.name.clone(),
            image: profile.picture.clone(),
            email_verified: profile.email_verified.then(|| Utc::now().timestamp()),
        };
        let account = Account {
            user_id: String::new(),
            provider: provider.to_string(),
            provider_account_id: profile.provider_account_id.clone(),
            access_token: Some(profile.tokens.access_token.clone()),
            refresh_token: profile.tokens.refresh_token.clone(),
            expires_at: profile.tokens.expires_at,
            token_type: profile.tokens.token_type.clone(),
            scope: profile.tokens.scope.clone(),
            id_token: profile.tokens.id_token.clone(),
        };
        let user = self.store.create_user_with_account(&new_user, account).await?;

        events::on_create_user(self.store(), self.billing(), &user).await
    }

    /// Keeps the stored display name and picture in line with the provider.
    async fn sync_profile(&self, user: User, profile: &OAuthProfile) -> Result<User, AuthError> {
        let mut update = UserUpdate::default();
        if profile.name.is_some() && profile.name != user.name {
            update.name = profile.name.clone();
        }
        if profile.picture.is_some() && profile.picture != user.image {
            update.image = profile.picture.clone();
        }

        if update.is_empty() {
            return Ok(user);
        }
        self.store.update_user(&user.id, &update).await
    }

    /// Verifies and refreshes a session cookie.
    ///
    /// Returns `None` when there is no usable cookie. Otherwise the token is
    /// rebuilt from the database, re-signed with a new expiry and projected
    /// onto the outward session.
    pub async fn read_session(&self, cookie_value: Option<&str>) -> Result<Option<(Session, IssuedSession)>, AuthError> {
        let cookie_value = match cookie_value {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };

        let now = Utc::now().timestamp();
        let claims = match self.signer.decrypt_jwt_token(cookie_value, now) {
            Ok(claims) => claims,
            Err(err) => {
                log::debug!("ignoring session cookie: {}", err);
                return Ok(None);
            }
        };

        let token = match callbacks::jwt(self.store(), claims.token, None).await {
            Ok(token) => token,
            Err(AuthError::UserNotFound) => return Ok(None),
            Err(err) => return Err(err),
        };

        let (cookie_value, signed) = self.signer.encrypt_jwt_token(token, now)?;
        let expires = Utc.timestamp_opt(signed.exp, 0).single().unwrap_or_else(Utc::now);
        let session = callbacks::session(Session::new(expires), Some(&signed.token));

        Ok(Some((session, IssuedSession {
            cookie_value,
            max_age_secs: self.signer.max_age_secs(),
        })))
    }

    pub fn sign_out_redirect(&self, callback_url: &str) -> &'static str {
        callbacks::redirect(callback_url, &self.base_url)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::events::tests::CountingBilling;
    use crate::google_oauth::OAuthTokens;
    use crate::session_store::memory::MemoryStore;

    /// Accepts the code `good-code` and returns a fixed profile.
    pub struct FakeProvider {
        pub profile: OAuthProfile,
    }

    impl FakeProvider {
        pub fn new(email: Option<&str>, name: Option<&str>) -> FakeProvider {
            FakeProvider {
                profile: OAuthProfile {
                    provider_account_id: "google-42".to_string(),
                    email: email.map(str::to_string),
                    email_verified: true,
                    name: name.map(str::to_string),
                    picture: Some("p.png".to_string()),
                    tokens: OAuthTokens {
                        access_token: "access".to_string(),
                        ..Default::default()
                    },
                },
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn id(&self) -> &str {
            "google"
        }

        fn authorization_url(&self, state: &str) -> String {
            format!("https://accounts.example.com/auth?state={}", state)
        }

        async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, AuthError> {
            if code != "good-code" {
                return Err(AuthError::IdentityProvider("invalid_grant".to_string()));
            }
            Ok(self.profile.clone())
        }
    }

    pub fn service(store: Arc<MemoryStore>, billing: Arc<CountingBilling>, provider: FakeProvider) -> AuthService {
        AuthService::new(
            store,
            billing,
            Arc::new(provider),
            JWTSecretKey::new("test-secret".to_string(), 3600),
            "https://example.com".to_string(),
        )
    }

    #[test]
    fn state_is_random_alphanumeric() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn first_sign_in_creates_user_and_customer() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing.clone(), FakeProvider::new(Some("a@x.com"), Some("A")));

        let signed_in = auth.complete_sign_in("good-code", "s1", Some("s1"), "/r/anything").await.unwrap();

        assert_eq!(signed_in.redirect_to, "/");
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.accounts().len(), 1);
        assert_eq!(
            *billing.calls.lock().unwrap(),
            vec![(Some("a@x.com".to_string()), Some("A".to_string()))]
        );

        let user_id = store.accounts()[0].user_id.clone();
        let user = store.user(&user_id).unwrap();
        assert_eq!(user.stripe_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(user.username.as_ref().map(String::len), Some(10));
    }

    #[tokio::test]
    async fn later_sign_ins_do_not_create_customers() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing.clone(), FakeProvider::new(Some("a@x.com"), Some("A")));

        auth.complete_sign_in("good-code", "s1", Some("s1"), "").await.unwrap();
        auth.complete_sign_in("good-code", "s2", Some("s2"), "").await.unwrap();

        assert_eq!(store.user_count(), 1);
        assert_eq!(billing.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn returning_user_gets_profile_changes() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing.clone(), FakeProvider::new(Some("a@x.com"), Some("A")));
        auth.complete_sign_in("good-code", "s1", Some("s1"), "").await.unwrap();

        let mut renamed = FakeProvider::new(Some("a@x.com"), Some("Alice"));
        renamed.profile.picture = None;
        let auth = service(store.clone(), billing, renamed);
        auth.complete_sign_in("good-code", "s2", Some("s2"), "").await.unwrap();

        let user = store.user(&store.accounts()[0].user_id).unwrap();
        assert_eq!(user.name.as_deref(), Some("Alice"));
        assert_eq!(user.image.as_deref(), Some("p.png"));
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_before_exchange() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing, FakeProvider::new(Some("a@x.com"), Some("A")));

        let missing = auth.complete_sign_in("good-code", "s1", None, "").await;
        let wrong = auth.complete_sign_in("good-code", "s1", Some("other"), "").await;

        assert!(matches!(missing, Err(AuthError::InvalidState)));
        assert!(matches!(wrong, Err(AuthError::InvalidState)));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn email_owned_by_another_account_is_not_linked() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        store.insert(User {
            id: "existing".to_string(),
            email: Some("a@x.com".to_string()),
            name: None,
            image: None,
            username: None,
            email_verified: None,
            stripe_customer_id: None,
            created_at: 0,
        });
        let auth = service(store.clone(), billing.clone(), FakeProvider::new(Some("a@x.com"), Some("A")));

        let result = auth.complete_sign_in("good-code", "s", Some("s"), "").await;

        assert!(matches!(result, Err(AuthError::AccountNotLinked(_))));
        assert!(billing.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn billing_failure_aborts_sign_in_after_user_exists() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling { fail: true, ..Default::default() });
        let auth = service(store.clone(), billing, FakeProvider::new(Some("a@x.com"), Some("A")));

        let result = auth.complete_sign_in("good-code", "s", Some("s"), "").await;

        assert!(matches!(result, Err(AuthError::Billing(_))));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn failed_account_link_leaves_no_orphan_user() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing.clone(), FakeProvider::new(Some("a@x.com"), Some("A")));

        *store.fail_account_link.lock().unwrap() = true;
        let result = auth.complete_sign_in("good-code", "s1", Some("s1"), "").await;
        assert!(matches!(result, Err(AuthError::Persistence(_))));
        assert_eq!(store.user_count(), 0);
        assert!(billing.calls.lock().unwrap().is_empty());

        *store.fail_account_link.lock().unwrap() = false;
        auth.complete_sign_in("good-code", "s2", Some("s2"), "").await.unwrap();
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn session_read_refreshes_from_database() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store.clone(), billing, FakeProvider::new(Some("a@x.com"), Some("A")));
        let signed_in = auth.complete_sign_in("good-code", "s", Some("s"), "").await.unwrap();

        let (session, refreshed) = auth.read_session(Some(&signed_in.session.cookie_value)).await.unwrap().unwrap();

        let user_id = store.accounts()[0].user_id.clone();
        let user = store.user(&user_id).unwrap();
        assert_eq!(session.user.id.as_deref(), Some(user_id.as_str()));
        assert_eq!(session.user.email.as_deref(), Some("a@x.com"));
        assert_eq!(session.user.image.as_deref(), Some("p.png"));
        assert_eq!(session.user.username, user.username);
        assert!(!refreshed.cookie_value.is_empty());
    }

    #[tokio::test]
    async fn bad_or_missing_cookie_reads_as_signed_out() {
        let store = Arc::new(MemoryStore::default());
        let billing = Arc::new(CountingBilling::default());
        let auth = service(store, billing, FakeProvider::new(Some("a@x.com"), Some("A")));

        assert!(auth.read_session(None).await.unwrap().is_none());
        assert!(auth.read_session(Some("")).await.unwrap().is_none());
        assert!(auth.read_session(Some("not.a.token")).await.unwrap().is_none());
    }
}
