use std::fs::File;
use std::io::Read;

use thiserror::Error;
use yaml_rust::{Yaml, YamlLoader};

pub const SIGN_IN_PAGE: &str = "/sign-in";

pub const GOOGLE_CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
pub const GOOGLE_CLIENT_SECRET_ENV: &str = "GOOGLE_CLIENT_SECRET";
pub const SESSION_SECRET_ENV: &str = "NEXTAUTH_SECRET";
pub const STRIPE_SECRET_KEY_ENV: &str = "STRIPE_SECRET_KEY";

const DEFAULT_SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("could not parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("{0} not found!")]
    MissingKey(&'static str),

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

/// Values that must never live in a checked-in file.
#[derive(Clone, PartialEq, Eq)]
pub struct Secrets {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub session_secret: String,
    pub stripe_secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub mysql: MySqlConfig,
    pub session_max_age_secs: i64,
    pub reconcile_interval_secs: u64,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("google_client_id", &self.google_client_id)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Secrets, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Secrets, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(ConfigError::MissingEnv(key)),
            }
        };

        Ok(Secrets {
            google_client_id: required(GOOGLE_CLIENT_ID_ENV)?,
            google_client_secret: required(GOOGLE_CLIENT_SECRET_ENV)?,
            session_secret: required(SESSION_SECRET_ENV)?,
            stripe_secret_key: required(STRIPE_SECRET_KEY_ENV)?,
        })
    }
}

pub fn read_file_as_str(file_path: &str) -> Result<String, ConfigError> {
    let mut buf: String = String::new();
    File::open(file_path)
        .and_then(|mut file| file.read_to_string(&mut buf))
        .map_err(|source| ConfigError::Io { path: file_path.to_string(), source })?;
    Ok(buf)
}

impl AppConfig {
    pub fn load(file_path: &str) -> Result<AppConfig, ConfigError> {
        let buf = read_file_as_str(file_path)?;
        Self::from_yaml_str(&buf, file_path)
    }

    pub fn from_yaml_str(buf: &str, path: &str) -> Result<AppConfig, ConfigError> {
        let docs = YamlLoader::load_from_str(buf)
            .map_err(|e| ConfigError::Parse { path: path.to_string(), reason: e.to_string() })?;
        let config = docs.first()
            .ok_or_else(|| ConfigError::Parse { path: path.to_string(), reason: "empty document".to_string() })?;

        let server = &config["server"];
        let creds = &config["mysql"];

        let mysql = MySqlConfig {
            host: str_key(creds, "host", "mysql.host")?,
            port: port_from(int_key(creds, "port", "mysql.port")?, "mysql.port")?,
            username: str_key(creds, "username", "mysql.username")?,
            password: str_key(creds, "password", "mysql.password")?,
            database: str_key(creds, "database", "mysql.database")?,
        };

        let base_url = str_key(config, "base_url", "base_url")?
            .trim_end_matches('/')
            .to_string();

        let session_max_age_secs = positive_or(
            &config["session"]["max_age_secs"],
            "session.max_age_secs",
            DEFAULT_SESSION_MAX_AGE_SECS,
        )?;
        let reconcile_interval_secs = positive_or(
            &config["billing"]["reconcile_interval_secs"],
            "billing.reconcile_interval_secs",
            DEFAULT_RECONCILE_INTERVAL_SECS as i64,
        )? as u64;

        Ok(AppConfig {
            host: server["host"].as_str().unwrap_or("0.0.0.0").to_string(),
            port: port_from(server["port"].as_i64().unwrap_or(8080), "server.port")?,
            base_url,
            mysql,
            session_max_age_secs,
            reconcile_interval_secs,
        })
    }
}

fn str_key(node: &Yaml, key: &str, name: &'static str) -> Result<String, ConfigError> {
    node[key].as_str()
        .map(str::to_string)
        .ok_or(ConfigError::MissingKey(name))
}

fn int_key(node: &Yaml, key: &str, name: &'static str) -> Result<i64, ConfigError> {
    node[key].as_i64().ok_or(ConfigError::MissingKey(name))
}

fn port_from(value: i64, name: &'static str) -> Result<u16, ConfigError> {
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::Invalid { key: name, reason: format!("{} is not a valid port", value) }),
    }
}

/// Optional integer setting that must be greater than zero when present.
fn positive_or(node: &Yaml, name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match node {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Integer(value) if *value > 0 => Ok(*value),
        other => Err(ConfigError::Invalid { key: name, reason: format!("expected a positive integer, got {:?}", other) }),
    }
}
