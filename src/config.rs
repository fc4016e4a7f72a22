use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, Result};

pub const CLIENT_ID_ENV: &str = "NEWSROOM_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "NEWSROOM_CLIENT_SECRET";
pub const REDIRECT_URI_ENV: &str = "NEWSROOM_REDIRECT_URI";
pub const AUTH_URL_ENV: &str = "NEWSROOM_AUTH_URL";
pub const TOKEN_URL_ENV: &str = "NEWSROOM_TOKEN_URL";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth client configuration, resolved from the environment at startup.
/// The endpoint URLs are overridable so tests can point at a local stub.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthConfig {
    pub fn from_env() -> Result<Self> {
        let client_id = required_env(CLIENT_ID_ENV)?;
        let client_secret = required_env(CLIENT_SECRET_ENV)?;
        let redirect_uri = required_env(REDIRECT_URI_ENV)?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            auth_url: optional_env(AUTH_URL_ENV).unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_url: optional_env(TOKEN_URL_ENV).unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    optional_env(name).ok_or_else(|| anyhow!("missing OAuth client configuration ({name})"))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
    Document,
}

impl Display for StoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Document => write!(f, "document"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "document" | "json" => Ok(Self::Document),
            other => Err(format!("invalid store backend: {other}")),
        }
    }
}
