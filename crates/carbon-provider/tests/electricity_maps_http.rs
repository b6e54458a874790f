//! ElectricityMapsProvider against a local HTTP listener.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use carbon_core::ManualClock;
use carbon_provider::{
    CallContext, ElectricityMapsProvider, Provider, ProviderError, RetryConfig, RetryProvider,
};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Canned {
    status: u16,
    body: String,
}

fn ok(body: impl Into<String>) -> Canned {
    Canned {
        status: 200,
        body: body.into(),
    }
}

/// Serve `responses` in order, one per connection, recording each request head.
async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();

    tokio::spawn(async move {
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                read += n;
                if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            log.lock()
                .unwrap()
                .push(String::from_utf8_lossy(&buf[..read]).to_string());

            let response = format!(
                "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                canned.status,
                canned.body.len(),
                canned.body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });

    (base, requests)
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn provider_for(base: &str) -> ElectricityMapsProvider {
    ElectricityMapsProvider::new("test-key")
        .unwrap()
        .with_urls(format!("{base}/latest"), format!("{base}/forecast"))
        .with_clock(Arc::new(ManualClock::new(t0())))
}

#[tokio::test]
async fn current_ci_is_converted_to_kg() {
    let (base, requests) = serve(vec![ok(r#"{"zone":"DE","carbonIntensity":312}"#)]).await;
    let provider = provider_for(&base);

    let ci = provider
        .get_current_ci(&CallContext::background(), "DE")
        .await
        .unwrap();
    assert!((ci - 0.312).abs() < 1e-12);

    let requests = requests.lock().unwrap();
    assert!(requests[0].starts_with("GET /latest?zone=DE "), "{}", requests[0]);
    assert!(requests[0].contains("auth-token: test-key"));
}

#[tokio::test]
async fn forecast_is_filtered_to_horizon_and_sorted() {
    let at = |h: i64| (t0() + TimeDelta::hours(h)).to_rfc3339();
    let body = format!(
        r#"{{"zone":"DE","forecast":[
            {{"datetime":"{}","carbonIntensity":500}},
            {{"datetime":"{}","carbonIntensity":200}},
            {{"datetime":"{}","carbonIntensity":300}},
            {{"datetime":"{}","carbonIntensity":100}}
        ]}}"#,
        at(-1),
        at(2),
        at(1),
        at(30),
    );
    let (base, requests) = serve(vec![ok(body)]).await;
    let provider = provider_for(&base);

    let points = provider
        .get_forecast_ci(&CallContext::background(), "DE", 24)
        .await
        .unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp, t0() + TimeDelta::hours(1));
    assert!((points[0].ci - 0.3).abs() < 1e-12);
    assert_eq!(points[1].timestamp, t0() + TimeDelta::hours(2));
    assert!((points[1].ci - 0.2).abs() < 1e-12);
    assert!(requests.lock().unwrap()[0].starts_with("GET /forecast?zone=DE "));
}

#[tokio::test]
async fn error_status_carries_truncated_body() {
    let (base, _) = serve(vec![Canned {
        status: 503,
        body: "x".repeat(5000),
    }])
    .await;
    let provider = provider_for(&base);

    let err = provider
        .get_current_ci(&CallContext::background(), "DE")
        .await
        .unwrap_err();
    match &err {
        ProviderError::HttpStatus { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body.len(), 4096);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn non_positive_intensity_is_invalid_data() {
    let (base, _) = serve(vec![ok(r#"{"carbonIntensity":0}"#)]).await;
    let err = provider_for(&base)
        .get_current_ci(&CallContext::background(), "DE")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidData(_)));
}

#[tokio::test]
async fn malformed_json_is_invalid_data() {
    let (base, _) = serve(vec![ok("not json")]).await;
    let err = provider_for(&base)
        .get_forecast_ci(&CallContext::background(), "DE", 24)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidData(_)));
}

#[tokio::test]
async fn retry_layer_recovers_from_transient_status() {
    let (base, requests) = serve(vec![
        Canned {
            status: 429,
            body: "slow down".into(),
        },
        ok(r#"{"carbonIntensity":250}"#),
    ])
    .await;
    let provider = RetryProvider::new(
        Arc::new(provider_for(&base)),
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        },
    );

    let ci = provider
        .get_current_ci(&CallContext::background(), "DE")
        .await
        .unwrap();
    assert!((ci - 0.25).abs() < 1e-12);
    assert_eq!(requests.lock().unwrap().len(), 2);
}
