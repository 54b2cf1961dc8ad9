//! Per-lot model artifacts and the process-wide model cache.
//!
//! An artifact is a directory named after the lot holding `manifest.json`
//! and the payload file the manifest points at. Artifacts are immutable once
//! deployed, so a loaded model stays cached until the process exits.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::features::{FeatureKind, FeatureSchema, Scalers};
use crate::model::{load_forecaster, Forecaster, ModelFormat};
use crate::types::is_valid_lot_id;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub lot_id: String,
    pub format: ModelFormat,
    /// File name of the payload, relative to the manifest.
    pub payload: String,
    pub schema: FeatureSchema,
    #[serde(default)]
    pub scalers: Scalers,
    #[serde(default)]
    pub time_origin: Option<DateTime<Utc>>,
}

/// Manifest plus payload bytes, as fetched from a store.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub manifest: ArtifactManifest,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// `Ok(None)` when nothing is deployed for `lot_id`.
    async fn fetch(&self, lot_id: &str) -> Result<Option<RawArtifact>, ForecastError>;

    /// Lots with a deployed artifact, sorted.
    async fn list_lot_ids(&self) -> Result<Vec<String>, ForecastError>;
}

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, lot_id: &str) -> Result<Option<RawArtifact>, ForecastError> {
        if !is_valid_lot_id(lot_id) {
            return Ok(None);
        }
        let dir = self.root.join(lot_id);
        let manifest_bytes = match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ForecastError::artifact_store(e)),
        };
        let manifest: ArtifactManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| ForecastError::schema(lot_id, format!("unreadable manifest: {e}")))?;

        let payload_name = Path::new(&manifest.payload);
        if payload_name.file_name() != Some(payload_name.as_os_str()) {
            return Err(ForecastError::schema(
                lot_id,
                format!("payload {:?} is not a plain file name", manifest.payload),
            ));
        }
        let payload = match tokio::fs::read(dir.join(payload_name)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ForecastError::schema(
                    lot_id,
                    format!("payload {} missing", manifest.payload),
                ))
            }
            Err(e) => return Err(ForecastError::artifact_store(e)),
        };

        Ok(Some(RawArtifact { manifest, payload }))
    }

    async fn list_lot_ids(&self) -> Result<Vec<String>, ForecastError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ForecastError::artifact_store(e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(ForecastError::artifact_store)?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let has_manifest = tokio::fs::try_exists(entry.path().join(MANIFEST_FILE))
                .await
                .unwrap_or(false);
            if is_valid_lot_id(&name) && has_manifest {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-process store, used to seed artifacts without touching disk.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, RawArtifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, manifest: ArtifactManifest, payload: Vec<u8>) {
        self.artifacts
            .write()
            .insert(manifest.lot_id.clone(), RawArtifact { manifest, payload });
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn fetch(&self, lot_id: &str) -> Result<Option<RawArtifact>, ForecastError> {
        Ok(self.artifacts.read().get(lot_id).cloned())
    }

    async fn list_lot_ids(&self) -> Result<Vec<String>, ForecastError> {
        let mut ids: Vec<_> = self.artifacts.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// A validated, ready-to-run model.
pub struct LoadedModel {
    pub lot_id: String,
    pub schema: FeatureSchema,
    pub scalers: Scalers,
    pub time_origin: Option<DateTime<Utc>>,
    pub forecaster: Box<dyn Forecaster>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("lot_id", &self.lot_id)
            .field("schema", &self.schema)
            .field("backend", &self.forecaster.backend())
            .finish()
    }
}

impl LoadedModel {
    /// Checks the manifest against the feature contract and decodes the
    /// payload.
    pub fn from_raw(lot_id: &str, raw: RawArtifact) -> Result<Self, ForecastError> {
        let RawArtifact { manifest, payload } = raw;
        if manifest.lot_id != lot_id {
            return Err(ForecastError::schema(
                lot_id,
                format!("manifest is bound to lot {}", manifest.lot_id),
            ));
        }
        manifest
            .schema
            .validate()
            .and_then(|()| manifest.scalers.validate(&manifest.schema))
            .map_err(|reason| ForecastError::schema(lot_id, reason))?;
        if manifest.schema.uses(FeatureKind::TimeIndex) && manifest.time_origin.is_none() {
            return Err(ForecastError::schema(lot_id, "time_index feature without time_origin"));
        }

        let schema = &manifest.schema;
        let forecaster = load_forecaster(
            manifest.format,
            &payload,
            schema.window,
            schema.width(),
            schema.horizon,
        )
        .map_err(|e| ForecastError::schema(lot_id, format!("{e:#}")))?;

        Ok(Self {
            lot_id: manifest.lot_id,
            schema: manifest.schema,
            scalers: manifest.scalers,
            time_origin: manifest.time_origin,
            forecaster,
        })
    }
}

/// Lazily populated, never evicted. Concurrent misses on the same lot may
/// load twice; the first insert wins.
#[derive(Default)]
pub struct ModelCache {
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, lot_id: &str) -> Option<Arc<LoadedModel>> {
        self.models.read().get(lot_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    fn insert(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let mut models = self.models.write();
        models
            .entry(model.lot_id.clone())
            .or_insert_with(|| Arc::new(model))
            .clone()
    }

    pub async fn get_or_load(
        &self,
        store: &dyn ArtifactStore,
        lot_id: &str,
    ) -> Result<Arc<LoadedModel>, ForecastError> {
        if let Some(model) = self.get(lot_id) {
            return Ok(model);
        }

        let raw = store
            .fetch(lot_id)
            .await?
            .ok_or_else(|| ForecastError::ModelNotFound {
                lot_id: lot_id.to_string(),
            })?;

        let owned_id = lot_id.to_string();
        let model = tokio::task::spawn_blocking(move || LoadedModel::from_raw(&owned_id, raw))
            .await
            .map_err(ForecastError::artifact_store)??;

        tracing::info!(
            lot_id,
            backend = model.forecaster.backend(),
            window = model.schema.window,
            horizon = model.schema.horizon,
            features = model.schema.width(),
            "loaded forecast model"
        );
        Ok(self.insert(model))
    }
}
