use hmac::Hmac;
use jwt::{AlgorithmType, Header, SignWithKey, Token, Verified, VerifyWithKey};
use sha2::digest::KeyInit;
use sha2::Sha384;

use crate::data_structs::session_token::{SessionToken, SignedClaims};
use crate::errors::AuthError;

/// Signs and verifies session cookies with HS384.
#[derive(Clone)]
pub struct JWTSecretKey {
    secret_key: String,
    max_age_secs: i64,
}

impl JWTSecretKey {

    pub fn new(secret_key: String, max_age_secs: i64) -> JWTSecretKey {
        return JWTSecretKey {
            secret_key,
            max_age_secs,
        };
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    fn key(&self) -> Result<Hmac<Sha384>, AuthError> {
        Hmac::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| AuthError::Token(jwt::Error::InvalidSignature))
    }

    /// Signs `token` so that it expires `max_age_secs` after `now`.
    pub fn encrypt_jwt_token(&self, token: SessionToken, now: i64) -> Result<(String, SignedClaims), AuthError> {
        let key = self.key()?;
        let header = Header {
            algorithm: AlgorithmType::Hs384,
            ..Default::default()
        };
        let claims = SignedClaims { token, iat: now, exp: now + self.max_age_secs };
        let signed = Token::new(header, claims.clone()).sign_with_key(&key)?;

        Ok((signed.as_str().to_string(), claims))
    }

    /// Verifies the signature and rejects tokens whose `exp` is not after `now`.
    pub fn decrypt_jwt_token(&self, str_token: &str, now: i64) -> Result<SignedClaims, AuthError> {
        let key = self.key()?;
        let token: Token<Header, SignedClaims, Verified> = str_token.verify_with_key(&key)?;
        let claims = token.claims().clone();
        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}
