use reqwest::blocking::Client;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_ZERO_RESULTS,
};
use crate::config::ProviderSettings;
use crate::location::BoundingBox;

/// TomTom Search API geocode endpoint; the query travels in the URL path.
pub struct TomTomGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl TomTomGeocoder {
    pub fn new(http: Client, settings: &ProviderSettings) -> Self {
        Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        }
    }

    fn query_url(&self, query: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| ProviderError::Endpoint(format!("{}: {err}", self.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Endpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .push(&format!("{query}.json"));
        Ok(url)
    }
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    results: Vec<ResponseResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseResult {
    #[serde(rename = "type")]
    kind: Option<String>,
    entity_type: Option<String>,
    address: Option<Address>,
    position: Option<Position>,
    viewport: Option<Viewport>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Address {
    freeform_address: Option<String>,
    municipality: Option<String>,
    municipality_subdivision: Option<String>,
    country_secondary_subdivision: Option<String>,
    country_subdivision: Option<String>,
    country_code: Option<String>,
    postal_code: Option<String>,
}

#[derive(Deserialize)]
struct Position {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewport {
    top_left_point: Position,
    btm_right_point: Position,
}

impl Provider for TomTomGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("tomtom"))?;
        let request = self
            .http
            .get(self.query_url(query)?)
            .query(&[("key", api_key.expose_secret()), ("limit", "1")]);

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        let Some(first) = parsed.results.into_iter().next() else {
            return Ok(ProviderResponse::new(STATUS_ZERO_RESULTS, raw));
        };

        let mut response = ProviderResponse::new("", raw);
        response.quality = non_empty(first.entity_type).or(non_empty(first.kind.clone()));
        response.accuracy = non_empty(first.kind);
        if let Some(position) = first.position {
            response.lat = Some(position.lat);
            response.lng = Some(position.lon);
        }
        response.bbox = first.viewport.map(|view| {
            BoundingBox::from_edges(
                view.top_left_point.lat,
                view.btm_right_point.lon,
                view.btm_right_point.lat,
                view.top_left_point.lon,
            )
        });
        if let Some(address) = first.address {
            response.address = non_empty(address.freeform_address);
            response.city = non_empty(address.municipality);
            response.neighborhood = non_empty(address.municipality_subdivision);
            response.county = non_empty(address.country_secondary_subdivision);
            response.state = non_empty(address.country_subdivision);
            response.country = non_empty(address.country_code);
            response.postal = non_empty(address.postal_code);
        }
        Ok(response.settle_status())
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::json_encoded;
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::providers::STATUS_OK;

    fn geocoder(server: &Server) -> TomTomGeocoder {
        TomTomGeocoder::new(
            Client::new(),
            &ProviderSettings {
                endpoint: server.url("/search/2/geocode").to_string(),
                api_key: Some(SecretString::from("tt".to_string())),
            },
        )
    }

    #[test]
    fn encodes_query_into_path() {
        let server = Server::run();
        let url = geocoder(&server).query_url("salem, or").unwrap();
        assert!(url.path().ends_with("/search/2/geocode/salem,%20or.json"));
    }

    #[test]
    fn maps_viewport_to_bbox() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/search/2/geocode/salem,%20or.json"),
                request::query(url_decoded(contains(("key", "tt")))),
            ])
            .respond_with(json_encoded(json!({
                "summary": {"numResults": 1},
                "results": [{
                    "type": "Geography",
                    "entityType": "Municipality",
                    "address": {
                        "municipality": "Salem",
                        "countrySecondarySubdivision": "Marion",
                        "countrySubdivision": "OR",
                        "countryCode": "US",
                        "freeformAddress": "Salem, OR"
                    },
                    "position": {"lat": 44.94012, "lon": -123.03508},
                    "viewport": {
                        "topLeftPoint": {"lat": 45.01, "lon": -123.12},
                        "btmRightPoint": {"lat": 44.86, "lon": -122.95}
                    }
                }]
            }))),
        );

        let response = geocoder(&server).geocode("salem, or").unwrap();
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.quality.as_deref(), Some("Municipality"));
        assert_eq!(response.state.as_deref(), Some("OR"));
        let bbox = response.bbox.unwrap();
        assert_eq!(bbox.northeast, [45.01, -122.95]);
        assert_eq!(bbox.southwest, [44.86, -123.12]);
    }
}
