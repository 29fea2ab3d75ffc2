use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlRow;
use sqlx::Row;

#[derive(Debug, Clone, PartialEq)]
#[derive(Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub username: Option<String>,
    pub email_verified: Option<i64>,
    pub stripe_customer_id: Option<String>,
    pub created_at: i64,
}

/// Profile fields needed to insert a user the first time they sign in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<i64>,
}

/// Partial update, `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub image: Option<String>,
    pub stripe_customer_id: Option<String>,
}

/// Outcome of a conditional username write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameClaim {
    Assigned,
    AlreadySet,
    /// another user already owns the candidate
    Taken,
}

impl User {
    pub(crate) fn decode(row: &MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            username: row.try_get("username")?,
            email_verified: row.try_get("email_verified")?,
            stripe_customer_id: row.try_get("stripe_customer_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn from_new(id: String, new_user: &NewUser) -> Self {
        User {
            id,
            email: new_user.email.clone(),
            name: new_user.name.clone(),
            image: new_user.image.clone(),
            username: None,
            email_verified: new_user.email_verified,
            stripe_customer_id: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.image.is_none() && self.stripe_customer_id.is_none()
    }
}
