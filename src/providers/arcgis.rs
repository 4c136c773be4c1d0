use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_ZERO_RESULTS,
};
use crate::config::ProviderSettings;
use crate::location::BoundingBox;

/// ArcGIS World Geocoding Service. Works without a token; one is sent when configured.
pub struct ArcGisGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl ArcGisGeocoder {
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
    candidates: Vec<Candidate>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    message: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    address: Option<String>,
    location: Option<Point>,
    score: Option<f64>,
    #[serde(default)]
    attributes: Attributes,
    extent: Option<Extent>,
}

#[derive(Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct Attributes {
    #[serde(rename = "Addr_type")]
    addr_type: Option<String>,
    city: Option<String>,
    subregion: Option<String>,
    region: Option<String>,
    region_abbr: Option<String>,
    postal: Option<String>,
    nbrhd: Option<String>,
    country: Option<String>,
}

#[derive(Deserialize)]
struct Extent {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl Provider for ArcGisGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let mut request = self.http.get(&self.endpoint).query(&[
            ("SingleLine", query),
            ("f", "json"),
            ("maxLocations", "1"),
            ("outFields", "*"),
        ]);
        if let Some(token) = &self.api_key {
            request = request.query(&[("token", token.expose_secret())]);
        }

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Ok(ProviderResponse::new(
                format!("ArcGIS error {}: {message}", error.code),
                raw,
            ));
        }
        let Some(first) = parsed.candidates.into_iter().next() else {
            return Ok(ProviderResponse::new(STATUS_ZERO_RESULTS, raw));
        };

        let mut response = ProviderResponse::new("", raw);
        response.address = non_empty(first.address);
        response.confidence = first.score.map(|score| score.round() as i64);
        if let Some(point) = first.location {
            response.lat = Some(point.y);
            response.lng = Some(point.x);
        }
        response.bbox = first
            .extent
            .map(|ext| BoundingBox::from_edges(ext.ymax, ext.xmax, ext.ymin, ext.xmin));
        let attributes = first.attributes;
        response.quality = non_empty(attributes.addr_type);
        response.city = non_empty(attributes.city);
        response.county = non_empty(attributes.subregion);
        response.state = non_empty(attributes.region_abbr).or(non_empty(attributes.region));
        response.postal = non_empty(attributes.postal);
        response.neighborhood = non_empty(attributes.nbrhd);
        response.country = non_empty(attributes.country);
        Ok(response.settle_status())
    }
}
