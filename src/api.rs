pub mod web_api;

use actix_web::{get, Responder, web};

use crate::config::SIGN_IN_PAGE;

#[get("/ping")]
async fn debug_ping() -> impl Responder {
    // just to test that the server is running
    "Pong!"
}

/// Registers every route the server exposes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(debug_ping)
        .route(SIGN_IN_PAGE, web::get().to(web_api::sign_in_page))
        .service(web::scope("/api/auth")
            .service(web_api::oauth_sign_in)
            .service(web_api::oauth_callback)
            .service(web_api::session)
            .route("/signout", web::get().to(web_api::sign_out))
            .route("/signout", web::post().to(web_api::sign_out))
        );
}
