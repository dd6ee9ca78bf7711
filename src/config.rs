use std::collections::HashMap;
use std::path::PathBuf;

pub const TMDB_MOVIE_SEARCH: &str = "https://api.themoviedb.org/3/search/movie";
pub const TMDB_MOVIE_DETAILS: &str = "https://api.themoviedb.org/3/movie";
pub const TMDB_IMG_URL: &str = "https://image.tmdb.org/t/p/w500";

/// Cookie signing needs at least this much key material.
pub const MIN_SECRET_LEN: usize = 32;

/// Source of environment variables, so configuration can be loaded in tests
/// without touching the process environment.
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvironmentProvider for HashMap<String, String> {
    fn get_var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("SECRET_KEY must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),
    #[error("BCRYPT_COST must be a number between 4 and 31, got {0:?}")]
    BadCost(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TmdbConfig {
    pub api_key: String,
    /// Provisioned alongside the key, not used by any request yet.
    pub access_token: Option<String>,
    pub search_url: String,
    pub details_url: String,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub secret_key: Option<String>,
    pub bcrypt_cost: u32,
    pub tmdb: TmdbConfig,
}

impl Config {
    pub fn from_env<E: EnvironmentProvider>(env: &E) -> Result<Self, ConfigError> {
        let var = |key: &str| env.get_var(key).filter(|value| !value.is_empty());

        let secret_key = var("SECRET_KEY");
        if let Some(secret) = &secret_key {
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::SecretTooShort(secret.len()));
            }
        }

        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(cost) => cost
                .parse::<u32>()
                .ok()
                .filter(|cost| (4..=31).contains(cost))
                .ok_or(ConfigError::BadCost(cost))?,
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Config {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_owned()),
            database_path: var("NEW_DB_URI")
                .unwrap_or_else(|| "movie_db".to_owned())
                .into(),
            secret_key,
            bcrypt_cost,
            tmdb: TmdbConfig {
                api_key: var("TMDB_API_KEY").ok_or(ConfigError::Missing("TMDB_API_KEY"))?,
                access_token: var("TMDB_ACCESS_TOKEN"),
                search_url: var("TMDB_SEARCH_URL").unwrap_or_else(|| TMDB_MOVIE_SEARCH.to_owned()),
                details_url: var("TMDB_DETAILS_URL")
                    .unwrap_or_else(|| TMDB_MOVIE_DETAILS.to_owned()),
                image_url: var("TMDB_IMG_URL").unwrap_or_else(|| TMDB_IMG_URL.to_owned()),
            },
        })
    }
}
