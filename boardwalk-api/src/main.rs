use crate::server::{ServerState, media::MediaStore};
use boardwalk_common::util::PositiveDuration;
use boardwalk_db::client::{DbClient, DbError};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Token lifetime must be positive, got {0} seconds")]
    TokenLifetime(i64),
    #[error("Media URL must not be the root path, got {0:?}")]
    MediaUrl(String),
    #[error("Error connecting to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Error migrating database: {0}")]
    Migrate(#[from] DbError),
    #[error("Error creating media directory: {0}")]
    MediaRoot(std::io::Error),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default = "default_media_root")]
    media_root: PathBuf,
    #[serde(default = "default_media_url")]
    media_url: String,
    token_lifetime_seconds: Option<i64>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_media_url() -> String {
    "/media".to_owned()
}

impl Env {
    fn token_lifetime(&self) -> Result<Option<PositiveDuration>, InitError> {
        self.token_lifetime_seconds
            .map(|seconds| {
                PositiveDuration::new(Duration::seconds(seconds))
                    .ok_or(InitError::TokenLifetime(seconds))
            })
            .transpose()
    }

    /// Media is nested under its own prefix, which therefore cannot be `/`.
    fn media_url(&self) -> Result<&str, InitError> {
        if self.media_url.trim_matches('/').is_empty() {
            Err(InitError::MediaUrl(self.media_url.clone()))
        } else {
            Ok(&self.media_url)
        }
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "boardwalk_api=debug,\
                boardwalk_common=debug,\
                boardwalk_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "Could not listen for ctrl-c, shutting down");
    } else {
        info!("Received ctrl-c, shutting down");
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let token_lifetime = env.token_lifetime()?;
    let media_url = env.media_url()?.to_owned();

    let pool = PgPoolOptions::new()
        .max_connections(env.database_max_connections)
        .connect(&env.database_url)
        .await?;
    let db_client = DbClient::new(pool);
    db_client.migrate().await?;

    tokio::fs::create_dir_all(&env.media_root)
        .await
        .map_err(InitError::MediaRoot)?;
    let media = MediaStore::new(env.media_root, media_url);

    let app = server::app(ServerState {
        db_client: Arc::new(db_client),
        media: Arc::new(media),
        token_lifetime,
    });

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn env(media_url: &str) -> Env {
        Env {
            server_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 8080,
            database_url: "postgres://localhost/boardwalk".to_owned(),
            database_max_connections: default_max_connections(),
            media_root: default_media_root(),
            media_url: media_url.to_owned(),
            token_lifetime_seconds: None,
        }
    }

    #[test]
    fn root_media_url_is_rejected() {
        for media_url in ["/", "", "//"] {
            assert!(matches!(env(media_url).media_url(), Err(InitError::MediaUrl(_))));
        }
        assert_eq!(env("/media").media_url().unwrap(), "/media");
    }

    #[test]
    fn token_lifetime_must_be_positive() {
        let mut env = env("/media");
        assert_eq!(env.token_lifetime().unwrap(), None);

        env.token_lifetime_seconds = Some(0);
        assert!(matches!(env.token_lifetime(), Err(InitError::TokenLifetime(0))));

        env.token_lifetime_seconds = Some(60);
        assert_eq!(env.token_lifetime().unwrap().map(|d| d.whole_seconds()), Some(60));
    }
}
