use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use super::Forecaster;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
        }
    }
}

/// Keras layout: `kernel` is `[inputs][4 * units]`, `recurrent_kernel` is
/// `[units][4 * units]`, gates ordered input, forget, cell, output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Layer {
    Lstm {
        units: usize,
        kernel: Vec<Vec<f32>>,
        recurrent_kernel: Vec<Vec<f32>>,
        bias: Vec<f32>,
        #[serde(default)]
        return_sequences: bool,
    },
    Dense {
        units: usize,
        kernel: Vec<Vec<f32>>,
        bias: Vec<f32>,
        #[serde(default)]
        activation: Activation,
    },
}

#[derive(Debug, Deserialize)]
struct NetworkJson {
    layers: Vec<Layer>,
}

enum Signal {
    Sequence(Vec<Vec<f32>>),
    Vector(Vec<f32>),
}

/// Recurrent network evaluated on the CPU from exported weights.
#[derive(Debug)]
pub struct LstmNetwork {
    layers: Vec<Layer>,
    input_width: usize,
    horizon: usize,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn check_matrix(name: &str, m: &[Vec<f32>], rows: usize, cols: usize) -> Result<()> {
    ensure!(m.len() == rows, "{name} has {} rows, expected {rows}", m.len());
    for row in m {
        ensure!(row.len() == cols, "{name} row has {} columns, expected {cols}", row.len());
    }
    Ok(())
}

impl LstmNetwork {
    pub fn from_json(payload: &[u8], input_width: usize, horizon: usize) -> Result<Self> {
        let net: NetworkJson =
            serde_json::from_slice(payload).context("failed to parse network weights")?;
        ensure!(!net.layers.is_empty(), "network has no layers");

        // walk the shapes through the stack
        let mut width = input_width;
        let mut sequence = true;
        for (i, layer) in net.layers.iter().enumerate() {
            match layer {
                Layer::Lstm {
                    units,
                    kernel,
                    recurrent_kernel,
                    bias,
                    return_sequences,
                } => {
                    ensure!(sequence, "layer {i}: lstm needs a sequence input");
                    check_matrix(&format!("layer {i} kernel"), kernel, width, 4 * units)?;
                    check_matrix(
                        &format!("layer {i} recurrent_kernel"),
                        recurrent_kernel,
                        *units,
                        4 * units,
                    )?;
                    ensure!(bias.len() == 4 * units, "layer {i}: bias has {} entries", bias.len());
                    width = *units;
                    sequence = *return_sequences;
                }
                Layer::Dense {
                    units,
                    kernel,
                    bias,
                    ..
                } => {
                    ensure!(!sequence, "layer {i}: dense needs a vector input");
                    check_matrix(&format!("layer {i} kernel"), kernel, width, *units)?;
                    ensure!(bias.len() == *units, "layer {i}: bias has {} entries", bias.len());
                    width = *units;
                }
            }
        }
        if sequence {
            bail!("network ends in a sequence, expected a vector");
        }
        ensure!(
            width == horizon,
            "network emits {width} values, schema horizon is {horizon}"
        );

        Ok(Self {
            layers: net.layers,
            input_width,
            horizon,
        })
    }

    fn lstm(
        xs: &[Vec<f32>],
        units: usize,
        kernel: &[Vec<f32>],
        recurrent: &[Vec<f32>],
        bias: &[f32],
        return_sequences: bool,
    ) -> Signal {
        let mut h = vec![0.0f32; units];
        let mut c = vec![0.0f32; units];
        let mut outputs = Vec::with_capacity(if return_sequences { xs.len() } else { 0 });

        for x in xs {
            let mut z = bias.to_vec();
            for (xi, row) in x.iter().zip(kernel) {
                for (zj, w) in z.iter_mut().zip(row) {
                    *zj += xi * w;
                }
            }
            for (hu, row) in h.iter().zip(recurrent) {
                for (zj, w) in z.iter_mut().zip(row) {
                    *zj += hu * w;
                }
            }
            for u in 0..units {
                let input = sigmoid(z[u]);
                let forget = sigmoid(z[units + u]);
                let cell = z[2 * units + u].tanh();
                let output = sigmoid(z[3 * units + u]);
                c[u] = forget * c[u] + input * cell;
                h[u] = output * c[u].tanh();
            }
            if return_sequences {
                outputs.push(h.clone());
            }
        }

        if return_sequences {
            Signal::Sequence(outputs)
        } else {
            Signal::Vector(h)
        }
    }

    fn dense(x: &[f32], kernel: &[Vec<f32>], bias: &[f32], activation: Activation) -> Vec<f32> {
        let mut y = bias.to_vec();
        for (xi, row) in x.iter().zip(kernel) {
            for (yj, w) in y.iter_mut().zip(row) {
                *yj += xi * w;
            }
        }
        y.into_iter().map(|v| activation.apply(v)).collect()
    }
}

impl Forecaster for LstmNetwork {
    fn predict(&self, window: &[Vec<f32>]) -> Result<Vec<f32>> {
        ensure!(!window.is_empty(), "empty input window");
        for row in window {
            ensure!(
                row.len() == self.input_width,
                "feature length mismatch: got {}, expected {}",
                row.len(),
                self.input_width
            );
        }

        let mut signal = Signal::Sequence(window.to_vec());
        for layer in &self.layers {
            signal = match (layer, signal) {
                (
                    Layer::Lstm {
                        units,
                        kernel,
                        recurrent_kernel,
                        bias,
                        return_sequences,
                    },
                    Signal::Sequence(xs),
                ) => Self::lstm(&xs, *units, kernel, recurrent_kernel, bias, *return_sequences),
                (
                    Layer::Dense {
                        kernel,
                        bias,
                        activation,
                        ..
                    },
                    Signal::Vector(x),
                ) => Signal::Vector(Self::dense(&x, kernel, bias, *activation)),
                _ => bail!("layer input shape changed after load"),
            };
        }

        match signal {
            Signal::Vector(out) if out.len() == self.horizon => Ok(out),
            Signal::Vector(out) => bail!("unexpected output length {}", out.len()),
            Signal::Sequence(_) => bail!("network produced a sequence"),
        }
    }

    fn backend(&self) -> &'static str {
        "lstm_json"
    }
}
