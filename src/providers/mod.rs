//! Geocoding providers behind a single call-and-status contract.
//!
//! Each vendor client turns its native payload into a [`ProviderResponse`]
//! whose `status` uses the Google vocabulary (`OK`, `ZERO_RESULTS`,
//! `OVER_QUERY_LIMIT`) so one classifier can interpret every provider.

mod arcgis;
mod bing;
mod google;
mod here;
mod mapquest;
mod tomtom;

use std::sync::Arc;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::location::BoundingBox;

pub use arcgis::ArcGisGeocoder;
pub use bing::BingGeocoder;
pub use google::GoogleGeocoder;
pub use here::HereGeocoder;
pub use mapquest::MapQuestGeocoder;
pub use tomtom::TomTomGeocoder;

pub const STATUS_OK: &str = "OK";
pub const STATUS_ZERO_RESULTS: &str = "ZERO_RESULTS";
pub const STATUS_NO_GEOMETRY: &str = "No Geometry";
pub const STATUS_OVER_QUERY_LIMIT: &str = "OVER_QUERY_LIMIT";

/// Provider names in default priority order.
pub const DEFAULT_PROVIDER_ORDER: [&str; 6] =
    ["google", "bing", "mapquest", "tomtom", "here", "arcgis"];

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("no API key configured for {0}")]
    MissingCredentials(&'static str),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// Normalized answer from one provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub status: String,
    pub quality: Option<String>,
    pub accuracy: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub confidence: Option<i64>,
    pub address: Option<String>,
    pub neighborhood: Option<String>,
    pub postal: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub raw: Value,
}

impl ProviderResponse {
    pub fn new(status: impl Into<String>, raw: Value) -> Self {
        Self {
            status: status.into(),
            raw,
            ..Self::default()
        }
    }

    pub fn rate_limited() -> Self {
        Self::new(STATUS_OVER_QUERY_LIMIT, Value::Null)
    }

    /// `OK` when coordinates are present, `No Geometry` otherwise.
    fn settle_status(mut self) -> Self {
        self.status = if self.lat.is_some() && self.lng.is_some() {
            STATUS_OK.to_string()
        } else {
            STATUS_NO_GEOMETRY.to_string()
        };
        self
    }
}

pub trait Provider: Send + Sync {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError>;
}

impl<F> Provider for F
where
    F: Fn(&str) -> Result<ProviderResponse, ProviderError> + Send + Sync,
{
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        self(query)
    }
}

/// Name-to-provider table, fixed once built.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<(String, Arc<dyn Provider>)>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let http = http_client(config)?;
        Ok(Self::empty()
            .with("google", GoogleGeocoder::new(http.clone(), &config.google))
            .with("bing", BingGeocoder::new(http.clone(), &config.bing))
            .with("mapquest", MapQuestGeocoder::new(http.clone(), &config.mapquest))
            .with("tomtom", TomTomGeocoder::new(http.clone(), &config.tomtom))
            .with("here", HereGeocoder::new(http.clone(), &config.here))
            .with("arcgis", ArcGisGeocoder::new(http, &config.arcgis)))
    }

    /// Registers `provider` under `name`, replacing an earlier entry in place.
    pub fn with(mut self, name: impl Into<String>, provider: impl Provider + 'static) -> Self {
        let name = name.into();
        let provider: Arc<dyn Provider> = Arc::new(provider);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = provider,
            None => self.entries.push((name, provider)),
        }
        self
    }

    pub fn resolve(&self, name: &str) -> AppResult<Arc<dyn Provider>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, provider)| Arc::clone(provider))
            .ok_or_else(|| AppError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

pub(crate) fn http_client(config: &AppConfig) -> AppResult<Client> {
    Client::builder()
        .timeout(config.http_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(AppError::from)
}

pub(crate) enum Fetched {
    Json(Value),
    RateLimited,
}

pub(crate) fn send_json(request: RequestBuilder) -> Result<Fetched, ProviderError> {
    let response = request.send()?;
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(Fetched::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    Ok(Fetched::Json(response.json()?))
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
