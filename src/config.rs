use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_USER_AGENT: &str = concat!("geoloc/", env!("CARGO_PKG_VERSION"));

pub const GOOGLE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const BING_ENDPOINT: &str = "https://dev.virtualearth.net/REST/v1/Locations";
pub const MAPQUEST_ENDPOINT: &str = "https://www.mapquestapi.com/geocoding/v1/address";
pub const TOMTOM_ENDPOINT: &str = "https://api.tomtom.com/search/2/geocode";
pub const HERE_ENDPOINT: &str = "https://geocode.search.hereapi.com/v1/geocode";
pub const ARCGIS_ENDPOINT: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates";

/// Credentials and endpoints for one geocoding vendor.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google: ProviderSettings,
    pub bing: ProviderSettings,
    pub mapquest: ProviderSettings,
    pub tomtom: ProviderSettings,
    pub here: ProviderSettings,
    pub arcgis: ProviderSettings,
    pub http_timeout: Duration,
    pub user_agent: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub has_google_key: bool,
    pub has_bing_key: bool,
    pub has_mapquest_key: bool,
    pub has_tomtom_key: bool,
    pub has_here_key: bool,
    pub has_arcgis_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self::from_lookup(env_var)
    }

    /// Builds the configuration from any key-value source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            google: provider_settings(&lookup, "GOOGLE", GOOGLE_ENDPOINT),
            bing: provider_settings(&lookup, "BING", BING_ENDPOINT),
            mapquest: provider_settings(&lookup, "MAPQUEST", MAPQUEST_ENDPOINT),
            tomtom: provider_settings(&lookup, "TOMTOM", TOMTOM_ENDPOINT),
            here: provider_settings(&lookup, "HERE", HERE_ENDPOINT),
            arcgis: provider_settings(&lookup, "ARCGIS", ARCGIS_ENDPOINT),
            http_timeout: Duration::from_secs(
                parse_u64(&lookup, "GEOLOC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).max(1),
            ),
            user_agent: non_blank(&lookup, "GEOLOC_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            http_timeout_secs: self.http_timeout.as_secs(),
            user_agent: self.user_agent.clone(),
            has_google_key: self.google.api_key.is_some(),
            has_bing_key: self.bing.api_key.is_some(),
            has_mapquest_key: self.mapquest.api_key.is_some(),
            has_tomtom_key: self.tomtom.api_key.is_some(),
            has_here_key: self.here.api_key.is_some(),
            has_arcgis_key: self.arcgis.api_key.is_some(),
        }
    }
}

fn provider_settings<F>(lookup: &F, prefix: &str, default_endpoint: &str) -> ProviderSettings
where
    F: Fn(&str) -> Option<String>,
{
    ProviderSettings {
        endpoint: non_blank(lookup, &format!("{prefix}_ENDPOINT"))
            .unwrap_or_else(|| default_endpoint.to_string()),
        api_key: non_blank(lookup, &format!("{prefix}_API_KEY")).map(SecretString::from),
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool(&env_var, "ALLOW_DOTENV", false)
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn builds_public_profile_without_secrets() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BING_API_KEY", "secret"),
            ("TOMTOM_API_KEY", "   "),
            ("ARCGIS_API_KEY", "arcgis-token"),
            ("GEOLOC_HTTP_TIMEOUT_SECS", "3"),
            ("ARCGIS_ENDPOINT", "http://localhost:9/arcgis"),
        ]));
        let public = config.public_profile();

        assert!(public.has_bing_key);
        assert!(!public.has_tomtom_key);
        assert!(public.has_arcgis_key);
        assert!(!public.has_google_key);
        assert_eq!(public.http_timeout_secs, 3);
        assert_eq!(config.arcgis.endpoint, "http://localhost:9/arcgis");
        assert!(config.bing.api_key.is_some());

        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("arcgis-token"));
    }

    #[test]
    fn falls_back_to_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GEOLOC_HTTP_TIMEOUT_SECS", "0"),
            ("GEOLOC_USER_AGENT", " "),
        ]));

        assert_eq!(config.google.endpoint, GOOGLE_ENDPOINT);
        assert_eq!(config.http_timeout, Duration::from_secs(1));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.here.api_key.is_none());

        let config = AppConfig::from_lookup(lookup(&[("GEOLOC_HTTP_TIMEOUT_SECS", "soon")]));
        assert_eq!(
            config.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
    }
}
