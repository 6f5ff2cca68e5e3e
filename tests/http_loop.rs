//! Poll loop against a mocked HTTP status endpoint.

use energy_logger::devices::statusjsn::{Profile, ALL_COMPONENTS};
use energy_logger::devices::{StatusJsonConfig, StatusJsonMeter};
use energy_logger::logger::data::SENTINEL;
use energy_logger::logger::{run, LoopConfig, LoopSummary};
use chrono::{NaiveDateTime, Utc};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn status_document() -> serde_json::Value {
    let values = [230.0, 1.5, 50.0, 0.0, 327.0, 10.0, 345.0, 0.95, 1.25, 0.5];
    let set: Vec<_> = values.iter().map(|v| json!({ "v": v })).collect();
    json!({
        "clock": { "systemtime": { "year": 2025, "month": 6, "day": 1, "hour": 8, "minute": 0, "second": 0 } },
        "sensor_values": [ { "values": [ set ] } ],
    })
}

fn meter_for(server: &MockServer, profile: Profile) -> StatusJsonMeter {
    StatusJsonMeter::new(StatusJsonConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(300),
        profile,
        ..StatusJsonConfig::default()
    })
    .unwrap()
}

fn loop_config(csv: &Path, ticks: u64) -> LoopConfig {
    LoopConfig {
        csv: csv.to_path_buf(),
        rate: Duration::from_millis(50),
        max_ticks: Some(ticks),
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

#[tokio::test]
async fn timeout_on_fourth_tick_writes_sentinel_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/statusjsn.js"))
        .and(query_param("components", ALL_COMPONENTS.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_document()))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/statusjsn.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(status_document())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let csv = dir.path().join("energy.csv");
    let mut meter = meter_for(&server, Profile::Energy);
    assert_eq!(meter.url(), format!("{}/statusjsn.js", server.uri()));

    let before = Utc::now().timestamp_millis();
    let summary = run(&mut meter, &loop_config(&csv, 4), std::future::pending())
        .await
        .unwrap();
    let after = Utc::now().timestamp_millis();
    assert_eq!(summary, LoopSummary { ticks: 4, failures: 1 });

    let rows = read_rows(&csv);
    assert_eq!(rows.len(), 5, "header plus four data rows");

    let header = &rows[0];
    assert_eq!(header[0], "Unix Timestamp (ms)");
    assert_eq!(header[header.len() - 1], "Elapsed Time (µs)");
    assert!(rows.iter().all(|row| row.len() == header.len()));

    for row in &rows[1..4] {
        assert_eq!(row[2], "230.0");
        assert_eq!(row[5], "327.75");
        assert_eq!(row[10], "1250.0");
    }

    let sentinel = &rows[4];
    assert!(sentinel[2..header.len() - 1].iter().all(|cell| cell == SENTINEL));
    let unix_ms: i64 = sentinel[0].parse().unwrap();
    assert!((before..=after).contains(&unix_ms), "{unix_ms} outside {before}..={after}");
    let utc = NaiveDateTime::parse_from_str(&sentinel[1], "%Y-%m-%d %H:%M:%S%.3f").unwrap();
    assert_eq!(utc.and_utc().timestamp_millis(), unix_ms);
    let elapsed: u128 = sentinel[header.len() - 1].parse().unwrap();
    assert!(elapsed >= 300_000, "elapsed time covers the timeout: {elapsed}");

    let stamps: Vec<i64> = rows[1..].iter().map(|row| row[0].parse().unwrap()).collect();
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "{stamps:?}");
    assert!(stamps.iter().all(|ms| (before..=after).contains(ms)), "{stamps:?}");
}

#[tokio::test]
async fn error_status_and_bad_body_are_sentinel_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"sensor_values": []}"#))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let csv = dir.path().join("energy.csv");
    let mut meter = meter_for(&server, Profile::Energy);

    let summary = run(&mut meter, &loop_config(&csv, 2), std::future::pending())
        .await
        .unwrap();
    assert_eq!(summary.failures, 2);

    let rows = read_rows(&csv);
    assert_eq!(rows.len(), 3);
    for row in &rows[1..] {
        assert_eq!(row.len(), rows[0].len());
        assert!(row[2..row.len() - 1].iter().all(|cell| cell == SENTINEL));
    }
}

#[tokio::test]
async fn restarted_logger_appends_without_second_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_document()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let csv = dir.path().join("full.csv");

    for _ in 0..2 {
        let mut meter = meter_for(&server, Profile::Full);
        run(&mut meter, &loop_config(&csv, 2), std::future::pending())
            .await
            .unwrap();
    }

    let rows = read_rows(&csv);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows.iter().filter(|row| row[0] == "Unix Timestamp (ms)").count(), 1);
    assert!(rows[1..].iter().all(|row| row[2] == "2025-06-01 08:00:00"));
}
