mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{build_test_context, get, post, post_json, send, Options};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vitals_common::lifecycle::Component;
use vitals_common::{HASH_HEADER, REAL_IP_HEADER};
use vitals_server::config::ServerConfig;
use vitals_server::service::MetricService;
use vitals_server::state::AppState;
use vitals_storage::memory::{MemConfig, MemStorage};
use vitals_storage::Storage;

#[tokio::test]
async fn gauge_round_trip() {
    let ctx = build_test_context(Options::default());
    let (status, body) = post_json(&ctx.app, "/update/", r#"{"id":"G","type":"gauge","value":1.5}"#).await;
    assert_eq!(status, StatusCode::OK);
    let echoed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(echoed["value"], 1.5);

    let (status, body) = post_json(&ctx.app, "/value/", r#"{"id":"G","type":"gauge"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""value":1.5"#), "{body}");
}

#[tokio::test]
async fn counter_accumulates() {
    let ctx = build_test_context(Options::default());
    for delta in [2, 3, 5] {
        let body = format!(r#"{{"id":"C","type":"counter","delta":{delta}}}"#);
        assert_eq!(post_json(&ctx.app, "/update/", &body).await.0, StatusCode::OK);
    }
    assert_eq!(get(&ctx.app, "/value/counter/C").await, (StatusCode::OK, "10".to_string()));
}

#[tokio::test]
async fn mixed_batch() {
    let ctx = build_test_context(Options::default());
    let batch = r#"[{"id":"G","type":"gauge","value":7.0},{"id":"C","type":"counter","delta":4}]"#;
    let (status, body) = post_json(&ctx.app, "/updates/", batch).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (_, gauge) = post_json(&ctx.app, "/value/", r#"{"id":"G","type":"gauge"}"#).await;
    assert!(gauge.contains(r#""value":7.0"#), "{gauge}");
    assert_eq!(get(&ctx.app, "/value/counter/C").await.1, "4");
}

#[tokio::test]
async fn unknown_metric_is_404() {
    let ctx = build_test_context(Options::default());
    assert_eq!(
        get(&ctx.app, "/value/gauge/missing").await,
        (StatusCode::NOT_FOUND, "not exists".to_string())
    );
    let (status, _) = post_json(&ctx.app, "/value/", r#"{"id":"missing","type":"counter"}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_content_encoding_is_415() {
    let ctx = build_test_context(Options::default());
    let req = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "br")
        .body(Body::from("[]"))
        .unwrap();
    assert_eq!(send(&ctx.app, req).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn forged_signature_is_400() {
    let ctx = build_test_context(Options {
        key: true,
        ..Options::default()
    });
    let req = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(HASH_HEADER, "00".repeat(32))
        .body(Body::from(r#"[{"id":"C","type":"counter","delta":1}]"#))
        .unwrap();
    assert_eq!(send(&ctx.app, req).await.0, StatusCode::BAD_REQUEST);
    assert!(ctx.storage.counter("C").await.is_err());
}

#[tokio::test]
async fn path_updates_and_reads() {
    let ctx = build_test_context(Options::default());
    assert_eq!(post(&ctx.app, "/update/gauge/Alloc/12.50").await, (StatusCode::OK, "12.5".to_string()));
    assert_eq!(post(&ctx.app, "/update/counter/Hits/3").await.1, "3");
    assert_eq!(post(&ctx.app, "/update/counter/Hits/-1").await.1, "2");
    assert_eq!(get(&ctx.app, "/value/gauge/Alloc").await.1, "12.5");

    assert_eq!(post(&ctx.app, "/update/counter/Hits/1.5").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(post(&ctx.app, "/update/gauge/Alloc/abc").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(post(&ctx.app, "/update/histogram/X/1").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(get(&ctx.app, "/value/histogram/X").await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_payloads_are_400() {
    let ctx = build_test_context(Options::default());
    assert_eq!(post_json(&ctx.app, "/update/", "{not json").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(
        post_json(&ctx.app, "/update/", r#"{"id":"C","type":"counter"}"#).await.0,
        StatusCode::BAD_REQUEST
    );

    let (status, body) = post_json(
        &ctx.app,
        "/updates/",
        r#"[{"id":"G","type":"gauge","value":1},{"id":"","type":"timer"}]"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("metric[1]"), "{body}");
    assert!(ctx.storage.gauge("G").await.is_err());
}

#[tokio::test]
async fn non_finite_gauges_are_400() {
    let ctx = build_test_context(Options::default());
    for raw in ["NaN", "nan", "inf", "-inf", "infinity"] {
        let (status, body) = post(&ctx.app, &format!("/update/gauge/X/{raw}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{raw}");
        assert!(body.contains("finite"), "{raw}: {body}");
    }
    // JSON has no NaN literal and out-of-range numbers fail to parse.
    for batch in [
        r#"[{"id":"X","type":"gauge","value":NaN}]"#,
        r#"[{"id":"X","type":"gauge","value":1e999}]"#,
    ] {
        assert_eq!(post_json(&ctx.app, "/updates/", batch).await.0, StatusCode::BAD_REQUEST);
    }
    assert!(ctx.storage.gauge("X").await.is_err());
    assert!(ctx.storage.gauges().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_gauge_keeps_snapshot_restorable() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemConfig {
        file_path: Some(dir.path().join("metrics-db.json")),
        store_interval: Duration::ZERO,
        restore: false,
    };
    let storage = Arc::new(MemStorage::new(config.clone()).unwrap());
    storage.start(CancellationToken::new()).await.unwrap();
    let security = vitals_server::security_from_config(&ServerConfig::default()).unwrap();
    let state = AppState::new(Arc::new(MetricService::new(storage.clone())), security);
    let app = vitals_server::app::build_http_app(state);

    assert_eq!(post(&app, "/update/gauge/X/NaN").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(post(&app, "/update/gauge/Y/2.5").await.0, StatusCode::OK);
    assert_eq!(post(&app, "/update/gauge/Y/inf").await.0, StatusCode::BAD_REQUEST);
    storage.stop().await.unwrap();
    drop(app);
    drop(storage);

    let restored = MemStorage::new(MemConfig { restore: true, ..config }).unwrap();
    restored.start(CancellationToken::new()).await.unwrap();
    assert_eq!(restored.gauge("Y").await.unwrap(), 2.5);
    assert!(restored.gauge("X").await.is_err());
}

#[tokio::test]
async fn json_endpoints_require_json() {
    let ctx = build_test_context(Options::default());
    let req = Request::post("/update/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"id":"G","type":"gauge","value":1}"#))
        .unwrap();
    assert_eq!(send(&ctx.app, req).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn ping_and_index() {
    let ctx = build_test_context(Options::default());
    assert_eq!(get(&ctx.app, "/ping").await.0, StatusCode::OK);

    post(&ctx.app, "/update/gauge/b/2").await;
    post(&ctx.app, "/update/counter/a/1").await;
    let (status, page) = get(&ctx.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let a = page.find("a: 1").unwrap();
    let b = page.find("b: 2").unwrap();
    assert!(a < b);
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let ctx = build_test_context(Options::default());
    let req = Request::get("/ping").body(Body::empty()).unwrap();
    let (_, headers, _) = send(&ctx.app, req).await;
    let trace_id = headers["X-Trace-Id"].to_str().unwrap();
    assert_eq!(trace_id.len(), 16);
}

#[tokio::test]
async fn trusted_subnet_gates_requests() {
    let ctx = build_test_context(Options {
        trusted_subnet: Some("10.1.0.0/16"),
        ..Options::default()
    });
    let inside = Request::get("/ping")
        .header(REAL_IP_HEADER, "10.1.2.3")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&ctx.app, inside).await.0, StatusCode::OK);

    let outside = Request::get("/ping")
        .header(REAL_IP_HEADER, "192.168.0.1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&ctx.app, outside).await.0, StatusCode::FORBIDDEN);

    let anonymous = Request::get("/ping").body(Body::empty()).unwrap();
    assert_eq!(send(&ctx.app, anonymous).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sealed_batch_is_accepted() {
    let ctx = build_test_context(Options {
        key: true,
        encrypted: true,
        ..Options::default()
    });
    let json = br#"[{"id":"PollCount","type":"counter","delta":3},{"id":"Alloc","type":"gauge","value":42.5}]"#;
    let hash = common::signer().sign(json);
    let body = common::encrypter().encrypt(&common::gzip(json)).unwrap();

    let req = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(HASH_HEADER, hash)
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&ctx.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.storage.counter("PollCount").await.unwrap(), 3);
    assert_eq!(ctx.storage.gauge("Alloc").await.unwrap(), 42.5);
}

#[tokio::test]
async fn undecryptable_body_is_400() {
    let ctx = build_test_context(Options {
        encrypted: true,
        ..Options::default()
    });
    let req = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(common::gzip(b"[]")))
        .unwrap();
    assert_eq!(send(&ctx.app, req).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_are_gzipped_and_signed() {
    let ctx = build_test_context(Options {
        key: true,
        ..Options::default()
    });
    post(&ctx.app, "/update/gauge/G/2.5").await;

    let req = Request::get("/value/gauge/G")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&ctx.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
    let plain = common::gunzip(&body);
    assert_eq!(plain, b"2.5");
    let signature = headers[HASH_HEADER].to_str().unwrap();
    assert!(common::signer().verify(&plain, signature).is_ok());

    let missing = Request::get("/value/gauge/nope")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&ctx.app, missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(&body[..], b"not exists");
}
