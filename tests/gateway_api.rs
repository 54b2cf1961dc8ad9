mod common;

use std::collections::BTreeSet;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{body_json, TestApp, API_KEY};

// ---------------------------------------------------------------------------
// Health and catalog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_database_and_request_id() {
    let app = TestApp::new();
    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-request-id").is_some());

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["db_healthy"], true);
}

#[tokio::test]
async fn lots_are_listed_by_id() {
    let app = TestApp::new();
    for id in ["BJ55", "A70", "HG9"] {
        app.add_lot(id);
    }

    let response = app.get("/parkinglot").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|lot| lot["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A70", "BJ55", "HG9"]);
    assert_eq!(json[0]["name"], "Car park A70");
}

// ---------------------------------------------------------------------------
// POST /parkinglot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn readings_come_back_newest_first() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 10, 40);

    let response = app
        .post_json("/parkinglot", json!({"parking_lot_id": "A70", "count": 3}), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let rows = body_json(response).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    let lots: Vec<i64> = rows
        .iter()
        .map(|r| r["lots_available"].as_i64().unwrap())
        .collect();
    assert_eq!(lots, vec![40, 41, 42]);
    assert!(rows[0]["recorded_at"].as_str().unwrap() > rows[1]["recorded_at"].as_str().unwrap());
}

#[tokio::test]
async fn unknown_lot_has_no_readings() {
    let app = TestApp::new();
    let response = app
        .post_json("/parkinglot", json!({"parking_lot_id": "ZZ99", "count": 5}), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn malformed_reading_requests_are_rejected() {
    let app = TestApp::new();
    let bodies = [
        json!({"parking_lot_id": "A70", "count": 0}),
        json!({"parking_lot_id": "A70", "count": 100_000}),
        json!({"parking_lot_id": "A-70", "count": 5}),
        json!({"parking_lot_id": "A70"}),
        json!({"count": 5}),
    ];
    for body in bodies {
        let response = app.post_json("/parkinglot", body.clone(), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_REQUEST");
        assert_eq!(json["retryable"], false);
    }
}

#[tokio::test]
async fn listed_lots_cover_every_lot_with_readings() {
    let app = TestApp::new();
    for (id, readings) in [("A70", 3), ("BJ55", 0), ("HG9", 7)] {
        app.add_lot(id);
        app.add_readings(id, readings, 10);
    }

    let listed: BTreeSet<String> = body_json(app.get("/parkinglot").await)
        .await
        .as_array()
        .unwrap()
        .iter()
        .map(|lot| lot["id"].as_str().unwrap().to_string())
        .collect();

    for id in ["A70", "BJ55", "HG9", "Q1"] {
        let rows = body_json(
            app.post_json("/parkinglot", json!({"parking_lot_id": id, "count": 50}), None)
                .await,
        )
        .await;
        for row in rows.as_array().unwrap() {
            assert!(listed.contains(row["lot_id"].as_str().unwrap()));
        }
    }
}

#[tokio::test]
async fn forecast_flag_needs_a_key() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 24, 100);
    app.deploy_model("A70");

    let body = json!({"parking_lot_id": "A70", "count": 5, "forecast": true});
    let response = app.post_json("/parkinglot", body.clone(), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.post_json("/parkinglot", body, Some(API_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["lot_id"], "A70");
    assert_eq!(json["step_minutes"], 15);
    assert!(json["starts_at"].is_string());
    assert_eq!(json["predictions"].as_array().unwrap().len(), 8);
    assert!(json.get("selected").is_none());
}

// ---------------------------------------------------------------------------
// POST /predict
// ---------------------------------------------------------------------------

#[tokio::test]
async fn predict_enforces_api_key() {
    let app = TestApp::new();
    let body = json!({"model_name": "A70"});

    let response = app.post_json("/predict", body.clone(), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "FORBIDDEN");

    let response = app.post_json("/predict", body, Some("wrong")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn predict_unknown_model_is_not_found() {
    let app = TestApp::new();
    let response = app
        .post_json("/predict", json!({"model_name": "A70"}), Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "MODEL_NOT_FOUND");
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn predict_returns_one_value_per_step() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 24, 100);
    app.deploy_model("A70");

    let first = body_json(
        app.post_json("/predict", json!({"model_name": "A70"}), Some(API_KEY))
            .await,
    )
    .await;
    let predictions = first["predictions"][0].as_array().unwrap();
    assert_eq!(predictions.len(), 8);
    assert!(predictions.iter().all(|p| p.as_f64().unwrap() > 0.0));

    // unchanged history and artifact
    let second = body_json(
        app.post_json("/predict", json!({"model_name": "A70"}), Some(API_KEY))
            .await,
    )
    .await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn short_history_is_unavailable_not_padded() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 2, 100);
    app.deploy_model("A70");

    let response = app
        .post_json("/predict", json!({"model_name": "A70"}), Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INSUFFICIENT_HISTORY");
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn inconsistent_artifact_is_a_schema_mismatch() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 24, 100);
    app.store
        .insert(common::manifest("A70"), common::passthrough_weights(6));

    let response = app
        .post_json("/predict", json!({"model_name": "A70"}), Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "SCHEMA_MISMATCH");
}

// ---------------------------------------------------------------------------
// POST /availability
// ---------------------------------------------------------------------------

async fn arrival(app: &TestApp, lot: &str, secs: u64) -> Value {
    let response = app
        .post_json(
            "/availability",
            json!({"parking_lot_id": lot, "driving_time_seconds": secs}),
            Some(API_KEY),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn arrival_degrades_when_model_is_missing() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 3, 55);

    let json = arrival(&app, "A70", 1800).await;
    assert_eq!(json["live"]["status"], "reported");
    assert_eq!(json["live"]["lots_available"], 55);
    assert_eq!(json["prediction"]["status"], "unavailable");
    assert_eq!(json["prediction"]["kind"], "MODEL_NOT_FOUND");
    assert_eq!(json["preferred"], "live");
}

#[tokio::test]
async fn short_drives_prefer_the_live_reading() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 24, 100);
    app.deploy_model("A70");

    let json = arrival(&app, "A70", 299).await;
    assert_eq!(json["prediction"]["status"], "skipped");
    assert_eq!(json["preferred"], "live");
}

#[tokio::test]
async fn longer_drives_use_the_forecast() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 24, 100);
    app.deploy_model("A70");

    let json = arrival(&app, "A70", 3 * 3600).await;
    assert_eq!(json["prediction"]["status"], "predicted");
    assert_eq!(json["prediction"]["step"], 7);
    assert_eq!(json["preferred"], "forecast");
}

#[tokio::test]
async fn arrival_slots_follow_a_half_hourly_model() {
    let app = TestApp::new();
    app.add_lot("A70");
    app.add_readings("A70", 36, 100);
    app.store
        .insert(common::half_hourly_manifest("A70"), common::passthrough_weights(4));

    let json = arrival(&app, "A70", 3 * 3600).await;
    assert_eq!(json["prediction"]["status"], "predicted");
    assert_eq!(json["prediction"]["step"], 3);
    // the next half-hour boundary plus three 30-minute steps
    let offset = json["prediction"]["slot_offset_minutes"].as_u64().unwrap();
    assert!((90..120).contains(&offset), "{offset}");
}

#[tokio::test]
async fn arrival_requires_api_key() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/availability",
            json!({"parking_lot_id": "A70", "driving_time_seconds": 600}),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/availability",
            json!({"parking_lot_id": "A70", "driving_time_seconds": -5}),
            Some(API_KEY),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// GET /models
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_coverage_lists_missing_lots() {
    let app = TestApp::new();
    for id in ["A70", "BJ55", "HG9"] {
        app.add_lot(id);
    }
    app.deploy_model("BJ55");

    let response = app.get("/models").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"deployed": ["BJ55"], "missing": ["A70", "HG9"]})
    );
}
