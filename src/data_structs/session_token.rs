use serde::{Deserialize, Serialize};

use crate::data_structs::user::User;

/// Claims carried in the signed session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A token as it travels on the wire, with issue and expiry times in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct SignedClaims {
    #[serde(flatten)]
    pub token: SessionToken,
    pub iat: i64,
    pub exp: i64,
}

impl SessionToken {
    /// Token built from the identity-provider profile before any enrichment.
    pub fn from_profile(name: Option<String>, email: Option<String>, picture: Option<String>) -> Self {
        SessionToken { id: None, name, email, picture, username: None }
    }

    pub fn from_user(user: &User) -> Self {
        SessionToken {
            id: Some(user.id.clone()),
            name: user.name.clone(),
            email: user.email.clone(),
            picture: user.image.clone(),
            username: user.username.clone(),
        }
    }
}
