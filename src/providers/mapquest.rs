use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_ZERO_RESULTS,
};
use crate::config::ProviderSettings;

/// MapQuest Geocoding API v1.
pub struct MapQuestGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl MapQuestGeocoder {
    pub fn new(http: Client, settings: &ProviderSettings) -> Self {
        Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
struct Response {
    info: Option<Info>,
    #[serde(default)]
    results: Vec<ResponseResult>,
}

#[derive(Deserialize)]
struct Info {
    statuscode: i64,
}

#[derive(Deserialize)]
struct ResponseResult {
    #[serde(default)]
    locations: Vec<Location>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    street: Option<String>,
    admin_area6: Option<String>,
    admin_area5: Option<String>,
    admin_area4: Option<String>,
    admin_area3: Option<String>,
    admin_area1: Option<String>,
    postal_code: Option<String>,
    geocode_quality: Option<String>,
    geocode_quality_code: Option<String>,
    lat_lng: Option<LatLng>,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl Provider for MapQuestGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("mapquest"))?;
        let request = self.http.get(&self.endpoint).query(&[
            ("key", api_key.expose_secret()),
            ("location", query),
            ("maxResults", "1"),
        ]);

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        if let Some(code) = parsed.info.map(|info| info.statuscode).filter(|code| *code != 0) {
            return Ok(ProviderResponse::new(format!("MapQuest status {code}"), raw));
        }
        let Some(first) = parsed
            .results
            .into_iter()
            .flat_map(|result| result.locations)
            .next()
        else {
            return Ok(ProviderResponse::new(STATUS_ZERO_RESULTS, raw));
        };

        let mut response = ProviderResponse::new("", raw);
        response.quality = non_empty(first.geocode_quality);
        response.accuracy = non_empty(first.geocode_quality_code);
        response.address = non_empty(first.street);
        response.neighborhood = non_empty(first.admin_area6);
        response.city = non_empty(first.admin_area5);
        response.county = non_empty(first.admin_area4);
        response.state = non_empty(first.admin_area3);
        response.country = non_empty(first.admin_area1);
        response.postal = non_empty(first.postal_code);
        if let Some(lat_lng) = first.lat_lng {
            response.lat = Some(lat_lng.lat);
            response.lng = Some(lat_lng.lng);
        }
        Ok(response.settle_status())
    }
}
