//! Boundary with the trained network.

use ndarray::{Array2, Array4};

/// Error type returned by model implementations.
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

/// A trained classifier in inference mode.
///
/// `forward` maps a `(batch, channels, size, size)` input to a
/// `(batch, n_classes)` score matrix whose row order follows the input.
pub trait Model {
    /// Score one batch.
    fn forward(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>, ModelError>;
}

impl<F> Model for F
where
    F: FnMut(&Array4<f32>) -> Result<Array2<f32>, ModelError>,
{
    fn forward(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        self(batch)
    }
}
