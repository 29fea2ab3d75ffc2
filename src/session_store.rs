use async_trait::async_trait;

use crate::data_structs::account::Account;
use crate::data_structs::user::{NewUser, User, UserUpdate, UsernameClaim};
use crate::errors::AuthError;

/// Persistence operations the sign-in flow and its callbacks rely on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts the user together with its first linked account, atomically.
    /// `account.user_id` is replaced with the new user's id.
    async fn create_user_with_account(&self, new_user: &NewUser, account: Account) -> Result<User, AuthError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, AuthError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn get_user_by_account(&self, provider: &str, provider_account_id: &str) -> Result<Option<User>, AuthError>;

    /// Applies the set fields of `update` and returns the stored row.
    async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<User, AuthError>;

    /// Sets the username only while it is still unset.
    async fn set_username_if_unset(&self, id: &str, username: &str) -> Result<UsernameClaim, AuthError>;

    /// Users created before `created_before` that still have no billing customer,
    /// leaving out those whose last failed attempt is at or after `retry_before`.
    async fn users_missing_billing_customer(&self, created_before: i64, retry_before: i64, limit: u32) -> Result<Vec<User>, AuthError>;

    /// Remembers a failed billing provisioning attempt.
    async fn record_billing_failure(&self, id: &str, at: i64) -> Result<(), AuthError>;
}
