//! A pooled linear classifier that can be loaded from a raw checkpoint.

use ndarray::{s, Array1, Array2, Array4};
use sdmaps_export::{Checkpoint, ExportError, Model, ModelError, ModelParams};

/// Channel-mean pooling followed by a linear layer and a softmax.
///
/// Checkpoint layout: little-endian `f32` weights, `n_labels x n_input`
/// row-major, then `n_labels` biases.
#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearModel {
    /// Model from explicit weights `(n_labels, n_input)` and biases.
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self, ExportError> {
        if weights.nrows() != bias.len() {
            return Err(ExportError::Format(format!(
                "{} weight rows but {} biases",
                weights.nrows(),
                bias.len()
            )));
        }
        Ok(Self { weights, bias })
    }

    /// Decode a checkpoint shaped by `params`.
    pub fn from_checkpoint(params: &ModelParams, checkpoint: &Checkpoint) -> Result<Self, ExportError> {
        let (n_labels, n_input) = (params.n_labels, params.n_input);
        let expected = 4 * (n_labels * n_input + n_labels);
        if checkpoint.bytes.len() != expected {
            return Err(ExportError::Format(format!(
                "checkpoint {} has {} bytes, expected {} for {} inputs and {} labels",
                checkpoint.path.display(),
                checkpoint.bytes.len(),
                expected,
                n_input,
                n_labels
            )));
        }
        let values: Vec<f32> = checkpoint
            .bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let (w, b) = values.split_at(n_labels * n_input);
        let weights = Array2::from_shape_vec((n_labels, n_input), w.to_vec())
            .map_err(|e| ExportError::Format(e.to_string()))?;
        Self::new(weights, Array1::from_vec(b.to_vec()))
    }

    /// Expected input channels.
    pub fn n_input(&self) -> usize {
        self.weights.ncols()
    }

    /// Output classes.
    pub fn n_labels(&self) -> usize {
        self.weights.nrows()
    }
}

impl Model for LinearModel {
    fn forward(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let (n, channels, _, _) = batch.dim();
        if channels != self.n_input() {
            return Err(format!("model expects {} channels, batch has {}", self.n_input(), channels).into());
        }
        let pooled = Array2::from_shape_fn((n, channels), |(i, c)| batch.slice(s![i, c, .., ..]).mean().unwrap_or(0.0));
        let mut scores = pooled.dot(&self.weights.t()) + &self.bias;
        for mut row in scores.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, v| m.max(*v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            if sum > 0.0 {
                row /= sum;
            }
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_forward_is_softmax_of_pooled_logits() {
        let mut model = LinearModel::new(array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]], array![0.0, 0.0, 0.0]).unwrap();
        let mut batch = Array4::zeros((1, 2, 2, 2));
        batch.slice_mut(s![0, 0, .., ..]).fill(2.0);
        let out = model.forward(&batch).unwrap();
        let z = 2f32.exp() + 2.0;
        assert_relative_eq!(out[[0, 0]], 2f32.exp() / z, epsilon = 1e-6);
        assert_relative_eq!(out[[0, 1]], 1.0 / z, epsilon = 1e-6);
        assert_relative_eq!(out.row(0).sum(), 1.0, epsilon = 1e-6);
        assert!(model.forward(&Array4::zeros((1, 3, 1, 1))).is_err());
    }

    #[test]
    fn test_from_checkpoint() {
        let values = [1.0f32, 2.0, 3.0, 4.0, 0.5, -0.5];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let checkpoint = Checkpoint {
            name: "m".to_string(),
            path: PathBuf::from("m.ckpt"),
            bytes: Arc::new(bytes),
        };
        let params = ModelParams {
            name: "m".to_string(),
            path: PathBuf::from("m.ckpt"),
            n_input: 2,
            n_labels: 2,
        };
        let model = LinearModel::from_checkpoint(&params, &checkpoint).unwrap();
        assert_eq!((model.n_labels(), model.n_input()), (2, 2));

        let bad = ModelParams { n_input: 3, ..params };
        assert!(LinearModel::from_checkpoint(&bad, &checkpoint).is_err());
    }
}
