//! Channel-wise concatenation of several providers.

use crate::provider::PatchProvider;
use crate::{RasterError, Result};
use ndarray::{concatenate, Array3, ArrayView3, Axis};
use sdmaps_common::PointId;
use tracing::debug;

/// Ordered list of providers producing one input tensor per occurrence.
///
/// The geo provider conventionally comes first, then rasters. Every provider
/// must produce patches of the assembler's size.
pub struct PatchAssembler {
    size: usize,
    providers: Vec<Box<dyn PatchProvider>>,
}

impl std::fmt::Debug for PatchAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchAssembler")
            .field("size", &self.size)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PatchAssembler {
    /// Empty assembler for `size × size` patches.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            providers: Vec::new(),
        }
    }

    /// Append a provider. Its patch size must match.
    pub fn push(&mut self, provider: Box<dyn PatchProvider>) -> Result<()> {
        if provider.patch_size() != self.size {
            return Err(RasterError::PatchSizeMismatch {
                expected: self.size,
                actual: provider.patch_size(),
            });
        }
        debug!(
            "Assembler: adding provider {} ({} channels)",
            provider.name(),
            provider.channels()
        );
        self.providers.push(provider);
        Ok(())
    }

    /// Patch side in pixels.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of channels.
    pub fn channels(&self) -> usize {
        self.providers.iter().map(|p| p.channels()).sum()
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when no provider was added.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Concatenate every provider's patch along the channel axis.
    pub fn get(&self, id: PointId, lat: f64, lon: f64) -> Result<Array3<f32>> {
        if self.providers.is_empty() {
            return Err(RasterError::NoProviders);
        }
        let patches = self
            .providers
            .iter()
            .map(|p| p.get(id, lat, lon))
            .collect::<Result<Vec<_>>>()?;

        if let Some(bad) = patches
            .iter()
            .find(|p| p.shape()[1] != self.size || p.shape()[2] != self.size)
        {
            return Err(RasterError::PatchSizeMismatch {
                expected: self.size,
                actual: bad.shape()[1].max(bad.shape()[2]),
            });
        }

        let views: Vec<ArrayView3<f32>> = patches.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).map_err(|_| RasterError::PatchSizeMismatch {
            expected: self.size,
            actual: 0,
        })
    }
}
