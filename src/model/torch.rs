use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tch::{kind::Kind, CModule, Device, Tensor};

use super::Forecaster;

/// TorchScript module exported from the training pipeline, input
/// `[1, window, width]`, output `[1, horizon]`.
pub struct TorchForecaster {
    // CModule is not Sync
    model: Mutex<CModule>,
    device: Device,
    window: usize,
    width: usize,
    horizon: usize,
}

impl TorchForecaster {
    pub fn from_bytes(payload: &[u8], window: usize, width: usize, horizon: usize) -> Result<Self> {
        let device = Device::Cpu;
        let mut reader = std::io::Cursor::new(payload);
        let model = CModule::load_data_on_device(&mut reader, device)
            .context("failed to load TorchScript module")?;

        // Probe output shape with a dummy forward
        let dummy = Tensor::zeros([1, window as i64, width as i64], (Kind::Float, device));
        let out = model.forward_ts(&[dummy])?;
        let sz = out.size();
        if sz != [1, horizon as i64] {
            bail!("unexpected model output size: {:?}, expected [1, {horizon}]", sz);
        }

        Ok(Self {
            model: Mutex::new(model),
            device,
            window,
            width,
            horizon,
        })
    }
}

impl Forecaster for TorchForecaster {
    fn predict(&self, window: &[Vec<f32>]) -> Result<Vec<f32>> {
        if window.len() != self.window || window.iter().any(|row| row.len() != self.width) {
            bail!(
                "input shape mismatch: expected {} rows of {} features",
                self.window,
                self.width
            );
        }

        let flat: Vec<f32> = window.iter().flatten().copied().collect();
        let input = Tensor::from_slice(&flat)
            .reshape([1, self.window as i64, self.width as i64])
            .to_device(self.device);

        let out = self.model.lock().forward_ts(&[input])?;
        let sz = out.size();
        if sz != [1, self.horizon as i64] {
            bail!("unexpected model output size: {:?}", sz);
        }

        Ok((0..self.horizon as i64)
            .map(|i| out.double_value(&[0, i]) as f32)
            .collect())
    }

    fn backend(&self) -> &'static str {
        "torchscript"
    }
}
