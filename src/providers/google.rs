use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::trace;

use super::{non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_OK};
use crate::config::ProviderSettings;
use crate::location::BoundingBox;

/// Google Geocoding API. Its native `status` field is passed through as-is.
pub struct GoogleGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl GoogleGeocoder {
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
    status: String,
    #[serde(default)]
    results: Vec<ResponseResult>,
}

#[derive(Deserialize)]
struct ResponseResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    formatted_address: Option<String>,
    geometry: Option<Geometry>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Deserialize)]
struct Geometry {
    location: Option<LatLng>,
    location_type: Option<String>,
    viewport: Option<Viewport>,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct Viewport {
    northeast: LatLng,
    southwest: LatLng,
}

impl ResponseResult {
    fn component(&self, kind: &str) -> Option<&AddressComponent> {
        self.address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == kind))
    }

    fn long_name(&self, kind: &str) -> Option<String> {
        non_empty(self.component(kind).map(|c| c.long_name.clone()))
    }

    fn short_name(&self, kind: &str) -> Option<String> {
        non_empty(self.component(kind).map(|c| c.short_name.clone()))
    }
}

impl Provider for GoogleGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("google"))?;
        let request = self
            .http
            .get(&self.endpoint)
            .query(&[("address", query), ("key", api_key.expose_secret())]);

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        trace!(status = %parsed.status, results = parsed.results.len(), "google response");

        let mut response = ProviderResponse::new(parsed.status.clone(), raw);
        if parsed.status != STATUS_OK {
            return Ok(response);
        }
        let Some(first) = parsed.results.into_iter().next() else {
            return Ok(response);
        };

        response.quality = first.types.first().cloned();
        response.state = first.short_name("administrative_area_level_1");
        response.county = first.long_name("administrative_area_level_2");
        response.city = first
            .long_name("locality")
            .or_else(|| first.long_name("postal_town"));
        response.country = first.short_name("country");
        response.neighborhood = first.long_name("neighborhood");
        response.postal = first.long_name("postal_code");
        response.address = non_empty(first.formatted_address.clone());
        if let Some(geometry) = first.geometry {
            response.accuracy = geometry.location_type;
            if let Some(location) = geometry.location {
                response.lat = Some(location.lat);
                response.lng = Some(location.lng);
            }
            response.bbox = geometry.viewport.map(|view| {
                BoundingBox::from_edges(
                    view.northeast.lat,
                    view.northeast.lng,
                    view.southwest.lat,
                    view.southwest.lng,
                )
            });
        }
        Ok(response)
    }
}
