//! Reconstruction-error anomaly model.
//!
//! A single-hidden-layer autoencoder (`d -> k` ReLU, `k -> d` sigmoid) trained
//! with Adam on mean squared error. Inputs are min-max scaled with ranges
//! learned at fit time, so rows outside the training range reconstruct badly
//! and score high.

use super::{check_width, AnomalyScorer};
use crate::error::{PipelineError, Result};
use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

/// Autoencoder training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoencoderConfig {
    /// Width of the compressed representation
    pub encoding_dim: usize,
    /// Training passes over the data
    pub epochs: usize,
    /// Rows per gradient step
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            encoding_dim: 1,
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

/// Adam first and second moment estimates for one parameter tensor
struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, lr: f64, t: i32) {
        let m_correction = 1.0 - BETA1.powi(t);
        let v_correction = 1.0 - BETA2.powi(t);

        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let m_hat = *m / m_correction;
                let v_hat = *v / v_correction;
                *p -= lr * m_hat / (v_hat.sqrt() + EPSILON);
            });
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Glorot-uniform weight initialization
fn glorot<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

/// Autoencoder anomaly model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Autoencoder {
    config: AutoencoderConfig,
    /// Per-feature minimum seen at fit time
    mins: Array1<f64>,
    /// Per-feature range seen at fit time (1.0 for constant features)
    ranges: Array1<f64>,
    encoder_weights: Array2<f64>,
    encoder_bias: Array1<f64>,
    decoder_weights: Array2<f64>,
    decoder_bias: Array1<f64>,
    /// Mean training loss of the last epoch
    final_loss: f64,
    fitted: bool,
}

impl Default for Autoencoder {
    fn default() -> Self {
        Self::new(AutoencoderConfig::default())
    }
}

impl Autoencoder {
    pub fn new(config: AutoencoderConfig) -> Self {
        Self {
            config,
            mins: Array1::zeros(0),
            ranges: Array1::zeros(0),
            encoder_weights: Array2::zeros((0, 0)),
            encoder_bias: Array1::zeros(0),
            decoder_weights: Array2::zeros((0, 0)),
            decoder_bias: Array1::zeros(0),
            final_loss: 0.0,
            fitted: false,
        }
    }

    fn scale(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.mins) / &self.ranges
    }

    /// Forward pass on scaled input: (pre-activation hidden, hidden, output)
    fn forward(&self, x: &Array2<f64>) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let z1 = x.dot(&self.encoder_weights) + &self.encoder_bias;
        let hidden = z1.mapv(|v| v.max(0.0));
        let output = (hidden.dot(&self.decoder_weights) + &self.decoder_bias).mapv(sigmoid);
        (z1, hidden, output)
    }

    /// Reconstruct rows, returned in the scaled feature space
    pub fn reconstruct(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(PipelineError::NotFitted(self.name().to_string()));
        }
        check_width(self.mins.len(), features)?;
        let (_, _, output) = self.forward(&self.scale(features));
        Ok(output)
    }
}

impl AnomalyScorer for Autoencoder {
    fn fit(&mut self, features: &Array2<f64>) -> Result<()> {
        let (n_rows, n_features) = features.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(PipelineError::format(
                "cannot fit autoencoder on an empty feature table",
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let encoding_dim = self.config.encoding_dim.max(1);
        let batch_size = self.config.batch_size.max(1);
        let lr = self.config.learning_rate;

        self.mins = features.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let maxs = features.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
        self.ranges = (&maxs - &self.mins).mapv(|r| if r > 0.0 { r } else { 1.0 });

        self.encoder_weights = glorot(n_features, encoding_dim, &mut rng);
        self.encoder_bias = Array1::zeros(encoding_dim);
        self.decoder_weights = glorot(encoding_dim, n_features, &mut rng);
        self.decoder_bias = Array1::zeros(n_features);

        let mut w1_moments = Moments::like(&self.encoder_weights);
        let mut b1_moments = Moments::like(&self.encoder_bias);
        let mut w2_moments = Moments::like(&self.decoder_weights);
        let mut b2_moments = Moments::like(&self.decoder_bias);

        let x = self.scale(features);
        let mut order: Vec<usize> = (0..n_rows).collect();
        let mut step = 0i32;

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let (z1, hidden, output) = self.forward(&xb);
                let diff = &output - &xb;
                let count = diff.len() as f64;
                epoch_loss += diff.mapv(|d| d * d).sum() / count * batch.len() as f64;

                // Backpropagate mean squared error through sigmoid and ReLU
                let d_output = diff * (2.0 / count);
                let dz2 = d_output * output.mapv(|y| y * (1.0 - y));
                let grad_w2 = hidden.t().dot(&dz2);
                let grad_b2 = dz2.sum_axis(Axis(0));
                let d_hidden = dz2.dot(&self.decoder_weights.t());
                let dz1 = d_hidden * z1.mapv(|z| if z > 0.0 { 1.0 } else { 0.0 });
                let grad_w1 = xb.t().dot(&dz1);
                let grad_b1 = dz1.sum_axis(Axis(0));

                step += 1;
                w1_moments.step(&mut self.encoder_weights, &grad_w1, lr, step);
                b1_moments.step(&mut self.encoder_bias, &grad_b1, lr, step);
                w2_moments.step(&mut self.decoder_weights, &grad_w2, lr, step);
                b2_moments.step(&mut self.decoder_bias, &grad_b2, lr, step);
            }

            self.final_loss = epoch_loss / n_rows as f64;
            if epoch % 10 == 0 {
                debug!(epoch, loss = self.final_loss, "Autoencoder epoch");
            }
        }

        self.fitted = true;
        debug!(
            epochs = self.config.epochs,
            encoding_dim,
            loss = self.final_loss,
            "Autoencoder fitted"
        );
        Ok(())
    }

    fn score(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        let reconstructed = self.reconstruct(features)?;
        let scaled = self.scale(features);
        let errors = (&scaled - &reconstructed).mapv(|d| d * d);

        Ok(errors
            .mean_axis(Axis(1))
            .map(|e| e.to_vec())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "autoencoder"
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn normal_transfers() -> Array2<f64> {
        Array2::from_shape_fn((40, 2), |(i, j)| match j {
            0 => 100.0 + ((i * 7) % 40) as f64 * 2.5,
            _ => 10.0 + (i % 5) as f64,
        })
    }

    fn config() -> AutoencoderConfig {
        AutoencoderConfig {
            encoding_dim: 1,
            epochs: 200,
            batch_size: 8,
            learning_rate: 0.01,
            seed: 7,
        }
    }

    #[test]
    fn test_outlier_has_largest_error() {
        let mut model = Autoencoder::new(config());
        model.fit(&normal_transfers()).unwrap();

        let unseen = array![[100.0, 10.0], [150.0, 12.0], [100000.0, 1.0], [180.0, 13.0]];
        let scores = model.score(&unseen).unwrap();

        assert_eq!(scores.len(), 4);
        assert!(scores.iter().all(|&s| s >= 0.0));
        for (i, &s) in scores.iter().enumerate() {
            if i != 2 {
                assert!(scores[2] > s * 100.0, "outlier {} vs row {} {}", scores[2], i, s);
            }
        }
    }

    #[test]
    fn test_training_reduces_error() {
        let data = normal_transfers();

        let mut untrained = Autoencoder::new(AutoencoderConfig {
            epochs: 0,
            ..config()
        });
        untrained.fit(&data).unwrap();
        let mut trained = Autoencoder::new(config());
        trained.fit(&data).unwrap();

        let mean = |scores: Vec<f64>| scores.iter().sum::<f64>() / scores.len() as f64;
        let before = mean(untrained.score(&data).unwrap());
        let after = mean(trained.score(&data).unwrap());

        assert!(after < before, "after {} should be < before {}", after, before);
        assert!(trained.final_loss.is_finite());
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = normal_transfers();
        let mut first = Autoencoder::new(config());
        let mut second = Autoencoder::new(config());
        first.fit(&data).unwrap();
        second.fit(&data).unwrap();

        assert_eq!(first.score(&data).unwrap(), second.score(&data).unwrap());
    }

    #[test]
    fn test_shape_mismatch() {
        let mut model = Autoencoder::new(AutoencoderConfig {
            epochs: 2,
            ..config()
        });
        model.fit(&normal_transfers()).unwrap();

        let err = model.score(&array![[1.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_empty_fit_fails() {
        let mut model = Autoencoder::default();
        let err = model.fit(&Array2::zeros((0, 2))).unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }
}
