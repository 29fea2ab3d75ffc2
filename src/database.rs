use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Error, Executor, MySql, Pool};
use sqlx::mysql::{MySqlPoolOptions, MySqlQueryResult, MySqlRow};

use crate::config::MySqlConfig;
use crate::data_structs::account::Account;
use crate::data_structs::user::{NewUser, User, UserUpdate, UsernameClaim};
use crate::errors::AuthError;
use crate::session_store::SessionStore;

#[derive(Debug)]
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool<MySql>,
}

impl DatabasePool {

    pub async fn new(config: &MySqlConfig) -> Result<Self, AuthError> {
        let connection_url = format!(
            "mysql://{}:{}@{}:{}/{}",
            config.username, config.password, config.host, config.port, config.database
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&connection_url).await?;

        Ok(DatabasePool { pool })
    }

    pub async fn init(&self) -> Result<(), AuthError> {
        self.create_user_table().await?;
        self.create_account_table().await?;
        Ok(())
    }

    async fn create_user_table(&self) -> Result<MySqlQueryResult, Error> {
        self.pool.execute(r#"
        create table if not exists users (
            id                     char(36)                                      not null,
            email                  varchar(320)                                  null,
            name                   varchar(256)                                  null,
            image                  varchar(1024)                                 null,
            username               varchar(32)                                   null,
            email_verified         bigint                                        null,
            stripe_customer_id     varchar(64)                                   null,
            created_at             bigint                                        not null,
            billing_failed_at      bigint                                        null,
            PRIMARY KEY (id),
            UNIQUE KEY (email),
            UNIQUE KEY (username),
            UNIQUE KEY (stripe_customer_id)
        );
        "#).await
    }

    async fn create_account_table(&self) -> Result<MySqlQueryResult, Error> {
        self.pool.execute(r#"
        create table if not exists accounts
        (
            user_id              char(36)      not null,
            provider             varchar(64)   not null,
            provider_account_id  varchar(255)  not null,
            access_token         text          null,
            refresh_token        text          null,
            expires_at           bigint        null,
            token_type           varchar(32)   null,
            scope                varchar(512)  null,
            id_token             text          null,
            primary key (provider, provider_account_id),
            foreign key (user_id) references users (id) on delete cascade
        );
        "#).await
    }

    async fn fetch_user(&self, query: &str, value: &str) -> Result<Option<User>, AuthError> {
        let row: Option<MySqlRow> = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some(User::decode(&row)?)),
            None => Ok(None),
        }
    }
}

fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl SessionStore for DatabasePool {

    async fn create_user_with_account(&self, new_user: &NewUser, mut account: Account) -> Result<User, AuthError> {
        let user = User::from_new(uuid::Uuid::new_v4().to_string(), new_user);
        account.user_id = user.id.clone();

        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"
            INSERT INTO users (id, email, name, image, email_verified, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.image)
            .bind(&user.email_verified)
            .bind(user.created_at)
            .execute(&mut *tx).await?;

        sqlx::query(r#"
            INSERT INTO accounts
                (user_id, provider, provider_account_id, access_token, refresh_token,
                expires_at, token_type, scope, id_token)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&account.user_id)
            .bind(&account.provider)
            .bind(&account.provider_account_id)
            .bind(&account.access_token)
            .bind(&account.refresh_token)
            .bind(&account.expires_at)
            .bind(&account.token_type)
            .bind(&account.scope)
            .bind(&account.id_token)
            .execute(&mut *tx).await?;

        tx.commit().await?;

        log::info!("created user {} linked to {}", user.id, account.provider);
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AuthError> {
        self.fetch_user("SELECT * FROM users WHERE id=?", id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.fetch_user("SELECT * FROM users WHERE email=? LIMIT 1", email).await
    }

    async fn get_user_by_account(&self, provider: &str, provider_account_id: &str) -> Result<Option<User>, AuthError> {
        let row: Option<MySqlRow> = sqlx::query(r#"
            SELECT u.* FROM users u
            INNER JOIN accounts a ON a.user_id = u.id
            WHERE a.provider=? AND a.provider_account_id=?
        "#)
            .bind(provider)
            .bind(provider_account_id)
            .fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some(User::decode(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<User, AuthError> {
        if !update.is_empty() {
            // COALESCE keeps the stored value for every field left as None
            sqlx::query(r#"
                UPDATE users
                SET name=COALESCE(?, name),
                    image=COALESCE(?, image),
                    stripe_customer_id=COALESCE(?, stripe_customer_id)
                WHERE id=?
            "#)
                .bind(&update.name)
                .bind(&update.image)
                .bind(&update.stripe_customer_id)
                .bind(id)
                .execute(&self.pool).await?;
        }

        self.get_user(id).await?.ok_or(AuthError::UserNotFound)
    }

    async fn set_username_if_unset(&self, id: &str, username: &str) -> Result<UsernameClaim, AuthError> {
        let result = sqlx::query("UPDATE users SET username=? WHERE id=? AND username IS NULL")
            .bind(username)
            .bind(id)
            .execute(&self.pool).await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(UsernameClaim::Assigned),
            Ok(_) => Ok(UsernameClaim::AlreadySet),
            Err(err) if is_unique_violation(&err) => Ok(UsernameClaim::Taken),
            Err(err) => Err(err.into()),
        }
    }

    async fn users_missing_billing_customer(&self, created_before: i64, retry_before: i64, limit: u32) -> Result<Vec<User>, AuthError> {
        let rows: Vec<MySqlRow> = sqlx::query(r#"
            SELECT * FROM users
            WHERE stripe_customer_id IS NULL
                AND created_at < ?
                AND (billing_failed_at IS NULL OR billing_failed_at < ?)
            ORDER BY created_at
            LIMIT ?
        "#)
            .bind(created_before)
            .bind(retry_before)
            .bind(limit)
            .fetch_all(&self.pool).await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(User::decode(row)?);
        }
        Ok(users)
    }

    async fn record_billing_failure(&self, id: &str, at: i64) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET billing_failed_at=? WHERE id=?")
            .bind(at)
            .bind(id)
            .execute(&self.pool).await?;
        Ok(())
    }
}
