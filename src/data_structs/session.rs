use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub username: Option<String>,
}

/// What application code sees for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct Session {
    pub user: SessionUser,
    pub expires: DateTime<Utc>,
}

impl Session {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Session { user: SessionUser::default(), expires }
    }
}
