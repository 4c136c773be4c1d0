use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_ZERO_RESULTS,
};
use crate::config::ProviderSettings;
use crate::location::BoundingBox;

/// HERE Geocoding & Search API v7.
pub struct HereGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HereGeocoder {
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
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    result_type: Option<String>,
    locality_type: Option<String>,
    address: Option<Address>,
    position: Option<Position>,
    map_view: Option<MapView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Address {
    label: Option<String>,
    country_code: Option<String>,
    state_code: Option<String>,
    state: Option<String>,
    county: Option<String>,
    city: Option<String>,
    district: Option<String>,
    postal_code: Option<String>,
}

#[derive(Deserialize)]
struct Position {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct MapView {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl Provider for HereGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("here"))?;
        let request = self.http.get(&self.endpoint).query(&[
            ("q", query),
            ("apiKey", api_key.expose_secret()),
            ("limit", "1"),
        ]);

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        let Some(first) = parsed.items.into_iter().next() else {
            return Ok(ProviderResponse::new(STATUS_ZERO_RESULTS, raw));
        };

        let mut response = ProviderResponse::new("", raw);
        response.quality = non_empty(first.result_type);
        response.accuracy = non_empty(first.locality_type);
        if let Some(position) = first.position {
            response.lat = Some(position.lat);
            response.lng = Some(position.lng);
        }
        response.bbox = first
            .map_view
            .map(|view| BoundingBox::from_edges(view.north, view.east, view.south, view.west));
        if let Some(address) = first.address {
            response.address = non_empty(address.label);
            response.state = non_empty(address.state_code).or(non_empty(address.state));
            response.county = non_empty(address.county);
            response.city = non_empty(address.city);
            response.neighborhood = non_empty(address.district);
            response.country = non_empty(address.country_code);
            response.postal = non_empty(address.postal_code);
        }
        Ok(response.settle_status())
    }
}
