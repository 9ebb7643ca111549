use anyhow::Context;

/// Runtime configuration, read from the environment once at startup.
///
/// A missing value is a startup error; nothing below this layer reads the
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres DSN of the shared XP store.
    pub database_url: String,
    /// Identity provider base URL.
    pub auth_api_url: String,
    /// Identity provider api key.
    pub auth_api_key: String,
    /// Bearer token for the current session, if one is held. Absent simply
    /// means not signed in.
    pub access_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the XP store Postgres instance")?;
        let auth_api_url = std::env::var("AUTH_API_URL")
            .context("AUTH_API_URL must be set to the identity provider base URL")?;
        let auth_api_key = std::env::var("AUTH_API_KEY")
            .context("AUTH_API_KEY must be set to the identity provider api key")?;
        let access_token = std::env::var("AUTH_ACCESS_TOKEN").ok();

        Ok(Self {
            database_url,
            auth_api_url,
            auth_api_key,
            access_token,
        })
    }
}
