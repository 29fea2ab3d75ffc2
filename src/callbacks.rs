//! Hooks run at fixed points of the session lifecycle.
//!
//! `jwt` runs whenever a session token is issued or refreshed, `session` runs
//! whenever application code reads the current session and `redirect` decides
//! where the browser lands after signing in or out.

use rand::Rng;

use crate::data_structs::session::Session;
use crate::data_structs::session_token::SessionToken;
use crate::data_structs::user::{User, UsernameClaim};
use crate::errors::AuthError;
use crate::session_store::SessionStore;

pub const USERNAME_LENGTH: usize = 10;
const USERNAME_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
const USERNAME_ATTEMPTS: usize = 3;

/// Random url-safe identifier used as the default username.
pub fn generate_username() -> String {
    let mut rng = rand::thread_rng();
    (0..USERNAME_LENGTH)
        .map(|_| USERNAME_ALPHABET[rng.gen_range(0..USERNAME_ALPHABET.len())] as char)
        .collect()
}

/// Rebuilds the session token from the stored user row.
///
/// `user` is only present on the very first issuance, right after sign in.
/// When no row matches the token's email yet, the incoming token is returned
/// with its id taken from `user` and nothing is written.
pub async fn jwt(store: &dyn SessionStore, mut token: SessionToken, user: Option<&User>) -> Result<SessionToken, AuthError> {
    let db_user = match token.email.as_deref() {
        Some(email) => store.get_user_by_email(email).await?,
        None => None,
    };

    let mut db_user = match db_user {
        Some(db_user) => db_user,
        None => {
            let user = user.ok_or(AuthError::UserNotFound)?;
            token.id = Some(user.id.clone());
            return Ok(token);
        }
    };

    if db_user.username.is_none() {
        db_user = assign_username(store, &db_user.id).await?;
    }

    Ok(SessionToken::from_user(&db_user))
}

async fn assign_username(store: &dyn SessionStore, user_id: &str) -> Result<User, AuthError> {
    for _ in 0..USERNAME_ATTEMPTS {
        let candidate = generate_username();
        match store.set_username_if_unset(user_id, &candidate).await? {
            UsernameClaim::Assigned => {
                log::debug!("assigned username {} to user {}", candidate, user_id);
                break;
            }
            // a concurrent refresh got there first
            UsernameClaim::AlreadySet => break,
            UsernameClaim::Taken => continue,
        }
    }

    let user = store.get_user(user_id).await?.ok_or(AuthError::UserNotFound)?;
    if user.username.is_none() {
        return Err(AuthError::UsernameExhausted(user_id.to_string()));
    }
    Ok(user)
}

/// Copies the token's user fields onto the outward session.
pub fn session(mut session: Session, token: Option<&SessionToken>) -> Session {
    if let Some(token) = token {
        session.user.id = token.id.clone();
        session.user.name = token.name.clone();
        session.user.email = token.email.clone();
        session.user.image = token.picture.clone();
        session.user.username = token.username.clone();
    }

    session
}

/// Every post-auth navigation lands on the application root.
pub fn redirect(_url: &str, _base_url: &str) -> &'static str {
    "/"
}
