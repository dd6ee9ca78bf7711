//! Client for the movie metadata provider (TMDB).
//!
//! Every call is a single request: no retries, no caching. The API key is
//! owned by the client and attached to each request as a query parameter.

use crate::config::TmdbConfig;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request to movie database failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("movie database answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("movie database returned malformed data: {0}")]
    Malformed(&'static str),
}

/// A movie as the provider describes it. Fields we don't use are kept in
/// `extra` and handed through to templates untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MovieInfo {
    pub id: u64,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchPage {
    results: Vec<MovieInfo>,
}

#[async_trait]
pub trait MovieGateway: Send + Sync {
    async fn search_by_title(&self, title: &str) -> Result<Vec<MovieInfo>, GatewayError>;
    async fn get_details(&self, external_id: u64) -> Result<MovieInfo, GatewayError>;
    fn poster_url(&self, poster_path: &str) -> String;
}

pub struct TmdbClient {
    http: reqwest::Client,
    config: TmdbConfig,
}

impl TmdbClient {
    pub fn new(http: reqwest::Client, config: TmdbConfig) -> Self {
        TmdbClient { http, config }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request
            .query(&[("api_key", self.config.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MovieGateway for TmdbClient {
    async fn search_by_title(&self, title: &str) -> Result<Vec<MovieInfo>, GatewayError> {
        debug!("searching movie database for {:?}", title);
        let request = self
            .http
            .get(&self.config.search_url)
            .query(&[("query", title)]);
        let page: SearchPage = self.fetch(request).await?;
        Ok(page.results)
    }

    async fn get_details(&self, external_id: u64) -> Result<MovieInfo, GatewayError> {
        debug!("fetching details of movie {}", external_id);
        let url = format!(
            "{}/{}",
            self.config.details_url.trim_end_matches('/'),
            external_id
        );
        self.fetch(self.http.get(&url)).await
    }

    fn poster_url(&self, poster_path: &str) -> String {
        format!("{}{}", self.config.image_url, poster_path)
    }
}

/// In-memory provider for handler and catalog tests.
#[cfg(test)]
pub struct FakeGateway {
    movies: Vec<MovieInfo>,
}

#[cfg(test)]
impl FakeGateway {
    /// Searching for this title fails as if the provider were down.
    pub const OUTAGE: &'static str = "outage";

    pub fn new(movies: Vec<MovieInfo>) -> Self {
        FakeGateway { movies }
    }

    pub fn with_foo() -> Self {
        FakeGateway::new(vec![MovieInfo {
            id: 101,
            title: Some("Foo".to_owned()),
            overview: Some("desc".to_owned()),
            poster_path: Some("/x.jpg".to_owned()),
            release_date: Some("1999-03-01".to_owned()),
            ..MovieInfo::default()
        }])
    }
}

#[cfg(test)]
#[async_trait]
impl MovieGateway for FakeGateway {
    async fn search_by_title(&self, title: &str) -> Result<Vec<MovieInfo>, GatewayError> {
        if title == Self::OUTAGE {
            return Err(GatewayError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(self
            .movies
            .iter()
            .filter(|movie| movie.title.as_deref().map_or(false, |t| t.contains(title)))
            .cloned()
            .collect())
    }

    async fn get_details(&self, external_id: u64) -> Result<MovieInfo, GatewayError> {
        self.movies
            .iter()
            .find(|movie| movie.id == external_id)
            .cloned()
            .ok_or(GatewayError::Status(reqwest::StatusCode::NOT_FOUND))
    }

    fn poster_url(&self, poster_path: &str) -> String {
        format!("{}{}", crate::config::TMDB_IMG_URL, poster_path)
    }
}
