use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::errors::AuthError;

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URI: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const GOOGLE_SCOPE: &str = "openid email profile";

/// Verified identity returned by a provider after the code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthProfile {
    pub provider_account_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub tokens: OAuthTokens,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider id used in routes and account rows, e.g. `google`.
    fn id(&self) -> &str;

    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, AuthError>;
}

#[derive(Deserialize)]
#[derive(Debug)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Deserialize)]
#[derive(Debug)]
pub struct GoogleAccessToken {
    pub access_token: String,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleProvider {

    pub fn new(client_id: &str, client_secret: &str, base_url: &str) -> GoogleProvider {
        GoogleProvider {
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            redirect_uri: format!("{}/api/auth/callback/google", base_url),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get_access_token(&self, code: &str) -> Result<GoogleAccessToken, AuthError> {
        let response = self.http.post(GOOGLE_TOKEN_URI)
            .form(&[("code", code),
                    ("redirect_uri", self.redirect_uri.as_str()),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("grant_type", "authorization_code")])
            .send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::IdentityProvider(format!("token exchange returned {}: {}", status, body)));
        }
        Ok(response.json::<GoogleAccessToken>().await?)
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<GoogleUserInfo, AuthError> {
        let response = self.http.get(GOOGLE_USERINFO_URI)
            .bearer_auth(access_token)
            .send().await?
            .error_for_status()?;
        Ok(response.json::<GoogleUserInfo>().await?)
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {

    fn id(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, state: &str) -> String {
        let mut url = Url::parse(GOOGLE_AUTH_URI).expect("static google auth uri is valid");
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GOOGLE_SCOPE)
            .append_pair("state", state);
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, AuthError> {
        let access_token = self.get_access_token(code).await?;
        let user_info = self.get_user_info(&access_token.access_token).await?;
        let expires_at = access_token.expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        Ok(OAuthProfile {
            provider_account_id: user_info.sub,
            email: user_info.email,
            email_verified: user_info.email_verified,
            name: user_info.name,
            picture: user_info.picture,
            tokens: OAuthTokens {
                access_token: access_token.access_token,
                refresh_token: access_token.refresh_token,
                expires_at,
                token_type: access_token.token_type,
                scope: access_token.scope,
                id_token: access_token.id_token,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_carries_state_and_callback() {
        let provider = GoogleProvider::new("client-123", "secret", "https://example.com");
        let url = Url::parse(&provider.authorization_url("abc")).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert!(pairs.contains(&("client_id".to_string(), "client-123".to_string())));
        assert!(pairs.contains(&("state".to_string(), "abc".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "https://example.com/api/auth/callback/google".to_string()
        )));
        assert!(!pairs.iter().any(|(k, _)| k == "client_secret"));
    }

    #[test]
    fn userinfo_tolerates_missing_profile_fields() {
        let info: GoogleUserInfo = serde_json::from_str(r#"{"sub":"42","email":"a@x.com"}"#).unwrap();
        assert_eq!(info.sub, "42");
        assert!(info.name.is_none());
        assert!(!info.email_verified);
    }
}
