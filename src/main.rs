pub mod database;
pub mod api;
mod auth_flow;
mod callbacks;
mod config;
mod encrypted_signing;
mod errors;
mod events;
mod google_oauth;
mod session_store;
mod stripe_util;

pub mod data_structs {
    pub mod account;
    pub mod session;
    pub mod session_token;
    pub mod user;
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{App, HttpServer, web};
use actix_web::middleware::Logger;
use actix_web::rt::time;

use crate::auth_flow::AuthService;
use crate::config::{AppConfig, Secrets};
use crate::database::DatabasePool;
use crate::encrypted_signing::JWTSecretKey;
use crate::errors::AuthError;
use crate::google_oauth::GoogleProvider;
use crate::stripe_util::StripeHandler;

#[derive(Clone)]
pub struct SharedResources {
    auth: AuthService,
    secure_cookies: bool,
}

async fn load() -> Result<(AppConfig, SharedResources), AuthError> {
    log::info!("Loading configurations...");

    let config = AppConfig::load("config.yml")?;
    let secrets = Secrets::from_env()?;

    log::info!("Connecting to the database...");

    let database = DatabasePool::new(&config.mysql).await?;
    database.init().await?;

    let provider = GoogleProvider::new(
        &secrets.google_client_id,
        &secrets.google_client_secret,
        &config.base_url,
    );
    let stripe_handler = StripeHandler::new(&secrets.stripe_secret_key);
    let jwt_secret = JWTSecretKey::new(secrets.session_secret.clone(), config.session_max_age_secs);

    let auth = AuthService::new(
        Arc::new(database),
        Arc::new(stripe_handler),
        Arc::new(provider),
        jwt_secret,
        config.base_url.clone(),
    );

    let shared_resources = SharedResources {
        auth,
        secure_cookies: config.base_url.starts_with("https://"),
    };

    Ok((config, shared_resources))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, shared_resources) = match load().await {
        Ok(loaded) => loaded,
        Err(err) => {
            log::error!("Startup failed: {}", err);
            std::process::exit(1);
        }
    };
    let copied_resource = shared_resources.clone();

    log::info!("Starting billing reconciliation task");
    let reconcile_every = Duration::from_secs(config.reconcile_interval_secs);
    tokio::spawn(async move {
        let mut interval = time::interval(reconcile_every);
        loop {
            interval.tick().await;
            let task_start_time = Instant::now();
            let auth = &copied_resource.auth;
            let now = chrono::Utc::now().timestamp();
            match events::reconcile_billing_customers(auth.store(), auth.billing(), now).await {
                Ok(0) => {}
                Ok(repaired) => log::info!("provisioned billing customers for {} users", repaired),
                Err(err) => log::warn!("billing reconciliation failed: {}", err),
            }
            let task_time = task_start_time.elapsed();
            if task_time > reconcile_every {
                log::warn!("reconciliation task took {}ms to complete", task_time.as_millis());
            }
        }
    });

    log::info!("Starting HTTP server on {}:{}...", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(shared_resources.clone()))
            .wrap(Logger::new("%a \"%r\" %s %b \"%{User-Agent}i\" %T"))
            .configure(api::configure)
    })
        .bind((config.host.as_str(), config.port))?
        .run()
        .await
}
