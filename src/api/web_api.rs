use actix_web::cookie::time::Duration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header;
use actix_web::{get, HttpRequest, HttpResponse, web};
use serde::Deserialize;

use crate::auth_flow::IssuedSession;
use crate::errors::AuthError;
use crate::SharedResources;

pub const SESSION_COOKIE: &str = "session-token";
pub const STATE_COOKIE: &str = "oauth-state";
const STATE_MAX_AGE_SECS: i64 = 15 * 60;

#[derive(Deserialize, Debug)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    #[serde(rename = "callbackUrl")]
    pub callback_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SignInPageQuery {
    pub error: Option<String>,
}

fn build_cookie(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(max_age_secs))
        .finish()
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build(name, "").path("/").finish();
    cookie.make_removal();
    cookie
}

fn session_cookie(data: &SharedResources, issued: &IssuedSession) -> Cookie<'static> {
    build_cookie(SESSION_COOKIE, issued.cookie_value.clone(), issued.max_age_secs, data.secure_cookies)
}

#[get("/signin/{provider}")]
pub async fn oauth_sign_in(data: web::Data<SharedResources>, provider: web::Path<String>) -> HttpResponse {
    let auth = &data.get_ref().auth;
    if provider.as_str() != auth.provider_id() {
        return HttpResponse::NotFound().json("Unknown provider");
    }

    let (oauth_url, state) = auth.begin_sign_in();
    HttpResponse::TemporaryRedirect()
        .cookie(build_cookie(STATE_COOKIE, state, STATE_MAX_AGE_SECS, data.secure_cookies))
        .insert_header((header::LOCATION, oauth_url))
        .finish()
}

#[get("/callback/{provider}")]
pub async fn oauth_callback(data: web::Data<SharedResources>, req: HttpRequest, provider: web::Path<String>, query: web::Query<CallbackQuery>) -> Result<HttpResponse, AuthError> {
    let auth = &data.get_ref().auth;
    if provider.as_str() != auth.provider_id() {
        return Ok(HttpResponse::NotFound().json("Unknown provider"));
    }

    let query = query.into_inner();
    if let Some(error) = query.error {
        return Err(AuthError::IdentityProvider(error));
    }
    let code = query.code
        .ok_or_else(|| AuthError::IdentityProvider("missing authorization code".to_string()))?;
    let state = query.state.unwrap_or_default();
    let expected_state = req.cookie(STATE_COOKIE).map(|c| c.value().to_string());

    let signed_in = auth.complete_sign_in(
        &code,
        &state,
        expected_state.as_deref(),
        query.callback_url.as_deref().unwrap_or_default(),
    ).await?;

    Ok(HttpResponse::Found()
        .cookie(session_cookie(&data, &signed_in.session))
        .cookie(removal_cookie(STATE_COOKIE))
        .insert_header((header::LOCATION, signed_in.redirect_to))
        .finish())
}

#[get("/session")]
pub async fn session(data: web::Data<SharedResources>, req: HttpRequest) -> Result<HttpResponse, AuthError> {
    let auth = &data.get_ref().auth;
    let cookie = req.cookie(SESSION_COOKIE);

    match auth.read_session(cookie.as_ref().map(|c| c.value())).await? {
        Some((session, issued)) => Ok(HttpResponse::Ok()
            .cookie(session_cookie(&data, &issued))
            .json(session)),
        None => {
            let mut response = HttpResponse::Ok();
            if cookie.is_some() {
                response.cookie(removal_cookie(SESSION_COOKIE));
            }
            Ok(response.json(serde_json::json!({})))
        }
    }
}

pub async fn sign_out(data: web::Data<SharedResources>) -> HttpResponse {
    let redirect_to = data.get_ref().auth.sign_out_redirect("");
    HttpResponse::Found()
        .cookie(removal_cookie(SESSION_COOKIE))
        .insert_header((header::LOCATION, redirect_to))
        .finish()
}

pub async fn sign_in_page(data: web::Data<SharedResources>, query: web::Query<SignInPageQuery>) -> HttpResponse {
    let provider = data.get_ref().auth.provider_id();
    let notice = match query.error.as_deref() {
        Some("OAuthAccountNotLinked") => "<p class=\"error\">This email is already linked to another sign in method.</p>",
        Some(_) => "<p class=\"error\">Sign in failed. Please try again.</p>",
        None => "",
    };

    let body = format!(
        "<!DOCTYPE html><html><head><title>Sign in</title></head><body>\
         <h1>Sign in</h1>{}<a href=\"/api/auth/signin/{}\">Continue with Google</a>\
         </body></html>",
        notice, provider
    );
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}
