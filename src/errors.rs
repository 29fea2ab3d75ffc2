use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::config::SIGN_IN_PAGE;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("identity provider error: {0}")]
    IdentityProvider(String),

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("billing provider error: {0}")]
    Billing(#[from] stripe::StripeError),

    #[error("session token error: {0}")]
    Token(#[from] jwt::Error),

    #[error("session token expired")]
    TokenExpired,

    #[error("oauth state mismatch")]
    InvalidState,

    #[error("email {0} is already linked to a different account")]
    AccountNotLinked(String),

    #[error("user not found")]
    UserNotFound,

    #[error("could not assign a unique username to user {0}")]
    UsernameExhausted(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::IdentityProvider(err.to_string())
    }
}

impl AuthError {
    /// Error code shown on the sign-in page, `None` for server-side failures.
    pub fn sign_in_code(&self) -> Option<&'static str> {
        match self {
            AuthError::IdentityProvider(_) => Some("OAuthCallback"),
            AuthError::InvalidState => Some("OAuthCallback"),
            AuthError::AccountNotLinked(_) => Some("OAuthAccountNotLinked"),
            _ => None,
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self.sign_in_code() {
            Some(_) => StatusCode::FOUND,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self.sign_in_code() {
            Some(code) => {
                log::warn!("sign in rejected: {}", self);
                HttpResponse::Found()
                    .insert_header((header::LOCATION, format!("{}?error={}", SIGN_IN_PAGE, code)))
                    .finish()
            }
            None => {
                log::error!("auth request failed: {}", self);
                HttpResponse::InternalServerError().json("Internal error")
            }
        }
    }
}
