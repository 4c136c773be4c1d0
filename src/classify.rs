use crate::location::{Coordinate, LocationRecord};
use crate::providers::{ProviderError, ProviderResponse};

const SUCCESS: &str = "OK";
const NO_RESULTS: [&str; 3] = ["No requests", "No Geometry", "ZERO_RESULTS"];
const OVER_LIMIT: [&str; 1] = ["OVER_QUERY_LIMIT"];

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Box<LocationRecord>),
    NoResult,
    RateLimited,
    Unknown(String),
}

/// Interprets a provider answer. Statuses are compared verbatim.
pub fn classify(
    location: &str,
    provider: &str,
    result: Result<ProviderResponse, ProviderError>,
) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(err) => return Outcome::Unknown(err.to_string()),
    };

    let status = response.status.as_str();
    if status == SUCCESS {
        Outcome::Success(Box::new(into_record(location, provider, response)))
    } else if NO_RESULTS.contains(&status) {
        Outcome::NoResult
    } else if OVER_LIMIT.contains(&status) {
        Outcome::RateLimited
    } else {
        Outcome::Unknown(response.status)
    }
}

fn into_record(location: &str, provider: &str, response: ProviderResponse) -> LocationRecord {
    LocationRecord {
        location: location.to_string(),
        quality: response.quality,
        accuracy: response.accuracy,
        state: response.state,
        city: response.city,
        county: response.county,
        country: response.country,
        lat: response.lat.and_then(Coordinate::from_f64),
        lng: response.lng.and_then(Coordinate::from_f64),
        confidence: response.confidence,
        address: response.address,
        neighborhood: response.neighborhood,
        postal: response.postal,
        bbox: response.bbox,
        content: Some(response.raw),
        provider: provider.to_string(),
        meta_id: None,
    }
}
