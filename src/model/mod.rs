//! Forecast model backends.

mod lstm;
#[cfg(feature = "torch")]
mod torch;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use lstm::LstmNetwork;
#[cfg(feature = "torch")]
pub use torch::TorchForecaster;

/// A trained multi-step forecaster.
pub trait Forecaster: Send + Sync {
    /// Predicts `horizon` scaled values from `window` scaled feature rows,
    /// oldest row first.
    fn predict(&self, window: &[Vec<f32>]) -> Result<Vec<f32>>;

    fn backend(&self) -> &'static str;
}

/// Payload encoding named by the artifact manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// Layer weights exported as JSON.
    LstmJson,
    /// TorchScript module, needs the `torch` feature.
    Torchscript,
}

/// Decodes `payload` into a forecaster that takes `width` features per row
/// over `window` rows and emits `horizon` values.
pub fn load_forecaster(
    format: ModelFormat,
    payload: &[u8],
    window: usize,
    width: usize,
    horizon: usize,
) -> Result<Box<dyn Forecaster>> {
    match format {
        ModelFormat::LstmJson => Ok(Box::new(LstmNetwork::from_json(payload, width, horizon)?)),
        #[cfg(feature = "torch")]
        ModelFormat::Torchscript => Ok(Box::new(TorchForecaster::from_bytes(
            payload, window, width, horizon,
        )?)),
        #[cfg(not(feature = "torch"))]
        ModelFormat::Torchscript => {
            let _ = window;
            anyhow::bail!("torchscript artifacts need a build with the `torch` feature")
        }
    }
}
