use std::fs;
use std::time::Duration;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;
use tempfile::tempdir;

use geoloc::config::ProviderSettings;
use geoloc::{
    bootstrap, AppConfig, BatchGeocoder, InputFormat, InputMode, InputReader, ProviderRegistry,
};

fn google_config(server: &Server) -> AppConfig {
    let unused = || ProviderSettings {
        endpoint: server.url("/unused").to_string(),
        api_key: None,
    };
    AppConfig {
        google: ProviderSettings {
            endpoint: server.url("/maps/api/geocode/json").to_string(),
            api_key: Some(SecretString::from("test-key".to_string())),
        },
        bing: unused(),
        mapquest: unused(),
        tomtom: unused(),
        here: unused(),
        arcgis: unused(),
        http_timeout: Duration::from_secs(5),
        user_agent: "geoloc-tests".into(),
    }
}

fn expect_address(server: &Server, address: &'static str, body: serde_json::Value) {
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/maps/api/geocode/json"),
            request::query(url_decoded(contains(("address", address)))),
            request::query(url_decoded(contains(("key", "test-key")))),
        ])
        .respond_with(json_encoded(body)),
    );
}

fn fresno() -> serde_json::Value {
    json!({
        "status": "OK",
        "results": [{
            "types": ["locality", "political"],
            "formatted_address": "Fresno, CA, USA",
            "address_components": [
                {"long_name": "Fresno", "short_name": "Fresno", "types": ["locality", "political"]},
                {"long_name": "Fresno County", "short_name": "Fresno County", "types": ["administrative_area_level_2", "political"]},
                {"long_name": "California", "short_name": "CA", "types": ["administrative_area_level_1", "political"]},
                {"long_name": "United States", "short_name": "US", "types": ["country", "political"]}
            ],
            "geometry": {
                "location": {"lat": 36.7377981, "lng": -119.7871247},
                "location_type": "APPROXIMATE",
                "viewport": {
                    "northeast": {"lat": 36.9230316, "lng": -119.6365034},
                    "southwest": {"lat": 36.6441969, "lng": -119.9312569}
                }
            }
        }]
    })
}

#[test]
fn geocodes_csv_into_sqlite_until_rate_limited() {
    let server = Server::run();
    expect_address(&server, "fresno, ca", fresno());
    expect_address(
        &server,
        "nowhere, nv",
        json!({"status": "ZERO_RESULTS", "results": []}),
    );
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "austin, tx")))))
            .respond_with(status_code(429)),
    );

    let dir = tempdir().unwrap();
    let input = dir.path().join("places.csv");
    fs::write(
        &input,
        "id,state,place\n\
         1,CA,Fresno\n\
         2,Nevada,close to Nowhere\n\
         1,California,fresno\n\
         4,Atlantis,Somewhere\n\
         5,TX,Austin\n\
         6,TX,Dallas\n",
    )
    .unwrap();

    let store = bootstrap(dir.path().join("out/locs.db"), "locations").unwrap();
    let registry = ProviderRegistry::from_config(&google_config(&server)).unwrap();
    let geocoder = BatchGeocoder::new(&store, &registry, "google", Duration::ZERO).unwrap();
    let format = InputFormat::new(InputMode::Build).with_meta_column(Some("id".into()));
    let rows = InputReader::from_path(&input, &format).unwrap();

    let summary = geocoder.run(rows).unwrap();

    assert!(summary.halted);
    assert_eq!(summary.total_rows, 5);
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.no_result, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.provider_calls, 3);

    let stored = store.load_all().unwrap();
    assert_eq!(stored.len(), 1);
    let record = &stored[0].record;
    assert_eq!(record.location, "fresno, ca");
    assert_eq!(record.provider, "google");
    assert_eq!(record.meta_id, Some(1));
    assert_eq!(record.state.as_deref(), Some("CA"));
    assert_eq!(record.county.as_deref(), Some("Fresno County"));
    assert_eq!(record.lat.unwrap().to_string(), "36.7377981");
    assert_eq!(record.lng.unwrap().to_string(), "-119.7871247");
    assert_eq!(record.content.as_ref().unwrap()["status"], "OK");
}

#[test]
fn rerunning_a_file_skips_resolved_rows() {
    let server = Server::run();
    expect_address(&server, "Fresno, CA", fresno());

    let dir = tempdir().unwrap();
    let input = dir.path().join("places.tsv");
    fs::write(&input, "location\tnote\n  Fresno, CA  \tfirst\n").unwrap();
    let db_path = dir.path().join("locs.db");
    let format = InputFormat::new(InputMode::Direct).tab_delimited(true);
    let registry = ProviderRegistry::from_config(&google_config(&server)).unwrap();

    for expected_calls in [1, 0] {
        let store = bootstrap(&db_path, "locations").unwrap();
        let geocoder = BatchGeocoder::new(&store, &registry, "google", Duration::ZERO).unwrap();
        let summary = geocoder
            .run(InputReader::from_path(&input, &format).unwrap())
            .unwrap();
        assert_eq!(summary.provider_calls, expected_calls);
        assert_eq!(store.count().unwrap(), 1);
    }
}
