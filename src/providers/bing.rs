use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    non_empty, send_json, Fetched, Provider, ProviderError, ProviderResponse, STATUS_ZERO_RESULTS,
};
use crate::config::ProviderSettings;
use crate::location::BoundingBox;

/// Bing Maps Locations API.
pub struct BingGeocoder {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl BingGeocoder {
    pub fn new(http: Client, settings: &ProviderSettings) -> Self {
        Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(default)]
    resource_sets: Vec<ResourceSet>,
}

#[derive(Deserialize)]
struct ResourceSet {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    point: Option<Point>,
    /// south, west, north, east
    bbox: Option<[f64; 4]>,
    address: Option<Address>,
    confidence: Option<String>,
    entity_type: Option<String>,
}

#[derive(Deserialize)]
struct Point {
    coordinates: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Address {
    formatted_address: Option<String>,
    admin_district: Option<String>,
    admin_district2: Option<String>,
    locality: Option<String>,
    neighborhood: Option<String>,
    postal_code: Option<String>,
    country_region: Option<String>,
    country_region_iso2: Option<String>,
}

impl Provider for BingGeocoder {
    fn geocode(&self, query: &str) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials("bing"))?;
        let request = self.http.get(&self.endpoint).query(&[
            ("q", query),
            ("key", api_key.expose_secret()),
            ("maxResults", "1"),
            ("include", "ciso2"),
        ]);

        let raw = match send_json(request)? {
            Fetched::Json(raw) => raw,
            Fetched::RateLimited => return Ok(ProviderResponse::rate_limited()),
        };
        let parsed: Response = serde_json::from_value(raw.clone())?;
        let Some(first) = parsed
            .resource_sets
            .into_iter()
            .flat_map(|set| set.resources)
            .next()
        else {
            return Ok(ProviderResponse::new(STATUS_ZERO_RESULTS, raw));
        };

        let mut response = ProviderResponse::new("", raw);
        response.quality = first.entity_type;
        response.accuracy = first.confidence;
        if let Some(point) = first.point {
            if let [lat, lng, ..] = point.coordinates[..] {
                response.lat = Some(lat);
                response.lng = Some(lng);
            }
        }
        response.bbox = first
            .bbox
            .map(|[south, west, north, east]| BoundingBox::from_edges(north, east, south, west));
        if let Some(address) = first.address {
            response.state = non_empty(address.admin_district);
            response.county = non_empty(address.admin_district2);
            response.city = non_empty(address.locality);
            response.neighborhood = non_empty(address.neighborhood);
            response.postal = non_empty(address.postal_code);
            response.country =
                non_empty(address.country_region_iso2).or(non_empty(address.country_region));
            response.address = non_empty(address.formatted_address);
        }
        Ok(response.settle_status())
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::providers::{STATUS_NO_GEOMETRY, STATUS_OK, STATUS_OVER_QUERY_LIMIT};

    fn geocoder(server: &Server) -> BingGeocoder {
        BingGeocoder::new(
            Client::new(),
            &ProviderSettings {
                endpoint: server.url("/REST/v1/Locations").to_string(),
                api_key: Some(SecretString::from("bing-key".to_string())),
            },
        )
    }

    #[test]
    fn maps_first_resource() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/REST/v1/Locations"),
                request::query(url_decoded(contains(("q", "austin, tx")))),
            ])
            .respond_with(json_encoded(json!({
                "statusCode": 200,
                "resourceSets": [{
                    "estimatedTotal": 1,
                    "resources": [{
                        "name": "Austin, TX",
                        "point": {"type": "Point", "coordinates": [30.2711286, -97.7436995]},
                        "bbox": [30.0986, -97.9383, 30.5168, -97.5614],
                        "entityType": "PopulatedPlace",
                        "confidence": "High",
                        "address": {
                            "adminDistrict": "TX",
                            "adminDistrict2": "Travis County",
                            "countryRegion": "United States",
                            "countryRegionIso2": "US",
                            "formattedAddress": "Austin, TX",
                            "locality": "Austin"
                        }
                    }]
                }]
            }))),
        );

        let response = geocoder(&server).geocode("austin, tx").unwrap();
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.state.as_deref(), Some("TX"));
        assert_eq!(response.country.as_deref(), Some("US"));
        assert_eq!(response.accuracy.as_deref(), Some("High"));
        assert_eq!(response.lng, Some(-97.7436995));
        let bbox = response.bbox.unwrap();
        assert_eq!(bbox.northeast, [30.5168, -97.5614]);
        assert_eq!(bbox.southwest, [30.0986, -97.9383]);
    }

    #[test]
    fn empty_resource_sets_mean_zero_results() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/REST/v1/Locations"))
                .respond_with(json_encoded(json!({
                    "statusCode": 200,
                    "resourceSets": [{"estimatedTotal": 0, "resources": []}]
                }))),
        );

        let response = geocoder(&server).geocode("nowhere").unwrap();
        assert_eq!(response.status, STATUS_ZERO_RESULTS);
    }

    #[test]
    fn resource_without_point_has_no_geometry() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/REST/v1/Locations"))
                .respond_with(json_encoded(json!({
                    "resourceSets": [{"resources": [{"entityType": "Unknown"}]}]
                }))),
        );

        let response = geocoder(&server).geocode("somewhere").unwrap();
        assert_eq!(response.status, STATUS_NO_GEOMETRY);
    }

    #[test]
    fn throttling_and_auth_failures() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::query(url_decoded(contains(("q", "busy")))))
                .respond_with(status_code(429)),
        );
        server.expect(
            Expectation::matching(request::query(url_decoded(contains(("q", "denied")))))
                .respond_with(status_code(401)),
        );

        let bing = geocoder(&server);
        assert_eq!(bing.geocode("busy").unwrap().status, STATUS_OVER_QUERY_LIMIT);
        assert!(matches!(
            bing.geocode("denied").unwrap_err(),
            ProviderError::Status(401)
        ));
    }
}
