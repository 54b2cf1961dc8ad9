#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use carpark_forecast::artifact::{ArtifactManifest, ArtifactStore, MemoryArtifactStore};
use carpark_forecast::config::ServiceConfig;
use carpark_forecast::features::{FeatureKind, FeatureSchema, MinMaxScaler, Scalers};
use carpark_forecast::gateway::{self, AppState, API_KEY_HEADER};
use carpark_forecast::model::ModelFormat;
use carpark_forecast::repository::MemoryRepository;
use carpark_forecast::types::{OccupancyReading, ParkingLot};

pub const API_KEY: &str = "test-key";

pub fn test_config() -> ServiceConfig {
    ServiceConfig::from_lookup(|name| match name {
        "DATABASE_URL" => Some("postgres://localhost/unused".into()),
        "API_KEYS" => Some(format!("other-key,{API_KEY}")),
        _ => None,
    })
    .unwrap()
}

pub struct TestApp {
    pub repo: Arc<MemoryRepository>,
    pub store: Arc<MemoryArtifactStore>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryArtifactStore::new());
        Self::with_store(store.clone(), store)
    }

    /// App reading artifacts from `artifacts`; `store` stays available for
    /// seeding when the two are the same.
    pub fn with_store(store: Arc<MemoryArtifactStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let state = AppState::new(test_config(), artifacts, repo.clone());
        Self {
            repo,
            store,
            router: gateway::router(state),
        }
    }

    pub fn add_lot(&self, id: &str) {
        self.repo.upsert_lot(ParkingLot {
            id: id.into(),
            name: format!("Car park {id}"),
            total_lots: 200,
            lots_available: 0,
            updated_at: None,
        });
    }

    /// `count` readings five minutes apart, the newest one minute old.
    pub fn add_readings(&self, id: &str, count: usize, lots_available: i32) {
        let newest = Utc::now() - Duration::minutes(1);
        for i in 0..count {
            self.repo
                .record(OccupancyReading {
                    lot_id: id.into(),
                    recorded_at: newest - Duration::minutes(5 * i as i64),
                    lots_available: lots_available + i as i32,
                    total_lots: 200,
                })
                .unwrap();
        }
    }

    pub fn deploy_model(&self, id: &str) {
        self.store.insert(manifest(id), passthrough_weights(8));
    }

    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: Value, api_key: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Single-unit LSTM that passes the last scaled occupancy through to every
/// horizon step.
pub fn passthrough_weights(horizon: usize) -> Vec<u8> {
    json!({
        "layers": [
            {
                "type": "lstm",
                "units": 1,
                "kernel": [[0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 0.0]],
                "recurrent_kernel": [[0.0, 0.0, 0.0, 0.0]],
                "bias": [20.0, -20.0, 0.0, 20.0]
            },
            {
                "type": "dense",
                "units": horizon,
                "kernel": [vec![1.0; horizon]],
                "bias": vec![0.0; horizon]
            }
        ]
    })
    .to_string()
    .into_bytes()
}

pub fn manifest(id: &str) -> ArtifactManifest {
    ArtifactManifest {
        lot_id: id.into(),
        format: ModelFormat::LstmJson,
        payload: "model.json".into(),
        schema: FeatureSchema {
            version: 1,
            features: vec![FeatureKind::LotsAvailable, FeatureKind::TimeOfDay],
            window: 4,
            horizon: 8,
            step_minutes: 15,
        },
        scalers: Scalers {
            input: Some(MinMaxScaler {
                data_min: vec![0.0, 0.0],
                data_max: vec![200.0, 1.0],
            }),
            target: Some(MinMaxScaler {
                data_min: vec![0.0; 8],
                data_max: vec![200.0; 8],
            }),
        },
        time_origin: None,
    }
}

/// [`manifest`] on a 30-minute grid with four steps.
pub fn half_hourly_manifest(id: &str) -> ArtifactManifest {
    let mut manifest = manifest(id);
    manifest.schema.step_minutes = 30;
    manifest.schema.horizon = 4;
    manifest.scalers.target = Some(MinMaxScaler {
        data_min: vec![0.0; 4],
        data_max: vec![200.0; 4],
    });
    manifest
}
