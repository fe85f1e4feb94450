//! Multi-output covariance blocks and their additive composition.
//!
//! The following blocks are implemented:
//! * spectral mixture LMC (one spectral component shared across channels
//!   through per-channel mixing weights),
//! * white noise (one variance per channel).
//!
//! Blocks are summed through [`CovFunction::compose`], an explicit composite
//! builder; each block keeps a typed parameter record addressed by block
//! index.

mod noise;
mod spectral;

pub use noise::Noise;
pub use spectral::{SpectralMixture, SpectralMixtureLmc};

use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed covariance block of a composed multi-output kernel.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum KernelBlock<F: Float> {
    /// One spectral mixture LMC component
    SpectralMixtureLmc(SpectralMixtureLmc<F>),
    /// Per-channel white noise
    Noise(Noise<F>),
}

impl<F: Float> KernelBlock<F> {
    /// Covariance contribution between (channel `i`, x) and (channel `j`, x')
    /// given `tau = x - x'`.
    pub fn value(&self, i: usize, j: usize, tau: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        match self {
            KernelBlock::SpectralMixtureLmc(kernel) => kernel.value(i, j, tau),
            KernelBlock::Noise(kernel) => kernel.value(i, j, tau),
        }
    }
}

impl<F: Float> fmt::Display for KernelBlock<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelBlock::SpectralMixtureLmc(kernel) => kernel.fmt(f),
            KernelBlock::Noise(kernel) => kernel.fmt(f),
        }
    }
}

/// A multi-output covariance function: the additive combination of spectral
/// components and one trailing noise block.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct CovFunction<F: Float> {
    blocks: Vec<KernelBlock<F>>,
}

impl<F: Float> CovFunction<F> {
    /// Compose an ordered sequence of spectral components and a noise block
    /// into one covariance function. The noise block is stored last, at block
    /// index `components.len()`.
    pub fn compose(components: Vec<SpectralMixtureLmc<F>>, noise: Noise<F>) -> CovFunction<F> {
        let mut blocks: Vec<KernelBlock<F>> = components
            .into_iter()
            .map(KernelBlock::SpectralMixtureLmc)
            .collect();
        blocks.push(KernelBlock::Noise(noise));
        CovFunction { blocks }
    }

    /// Number of blocks, noise included
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Get block at `idx`
    pub fn block(&self, idx: usize) -> Option<&KernelBlock<F>> {
        self.blocks.get(idx)
    }

    /// Get mutable block at `idx`
    pub fn block_mut(&mut self, idx: usize) -> Option<&mut KernelBlock<F>> {
        self.blocks.get_mut(idx)
    }

    /// Covariance between (channel `i`, `x`) and (channel `j`, `xp`), summed
    /// over all blocks.
    pub fn value(
        &self,
        i: usize,
        x: &ArrayBase<impl Data<Elem = F>, Ix1>,
        j: usize,
        xp: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let tau = x - xp;
        self.blocks
            .iter()
            .fold(F::zero(), |acc, block| acc + block.value(i, j, &tau))
    }

    /// Full covariance matrix over stacked multi-channel inputs given as
    /// (channel index, inputs) pairs; rows are stacked in the given order.
    pub fn covariance(&self, inputs: &[(usize, Array2<F>)]) -> Array2<F> {
        let n: usize = inputs.iter().map(|(_, x)| x.nrows()).sum();
        let mut cov = Array2::zeros((n, n));
        let mut row = 0;
        for (i, xi) in inputs {
            for xrow in xi.rows() {
                let mut col = 0;
                for (j, xj) in inputs {
                    for xpcol in xj.rows() {
                        cov[[row, col]] = self.value(*i, &xrow, *j, &xpcol);
                        col += 1;
                    }
                }
                row += 1;
            }
        }
        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn two_channel_cov() -> CovFunction<f64> {
        let mut component = SpectralMixtureLmc::new(1, 2, 1);
        component.set_constant(array![[1., 2.]]).unwrap();
        let mut noise = Noise::new(1, 2);
        noise.set_noise(array![0.5, 0.25]).unwrap();
        CovFunction::compose(vec![component], noise)
    }

    #[test]
    fn test_compose_orders_blocks() {
        let cov = two_channel_cov();
        assert_eq!(cov.n_blocks(), 2);
        assert!(matches!(
            cov.block(0),
            Some(KernelBlock::SpectralMixtureLmc(_))
        ));
        assert!(matches!(cov.block(1), Some(KernelBlock::Noise(_))));
        assert!(cov.block(2).is_none());
    }

    #[test]
    fn test_value_sums_blocks() {
        let cov = two_channel_cov();
        let x = array![0.];
        // same point, same channel: B[0,0] * 1 + noise[0]
        assert_abs_diff_eq!(cov.value(0, &x, 0, &x), 1. + 0.5, epsilon = 1e-12);
        // cross channel at zero lag: B[0,1] only
        assert_abs_diff_eq!(cov.value(0, &x, 1, &x), 2., epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_matrix_is_symmetric() {
        let cov = two_channel_cov();
        let inputs = vec![(0, array![[0.], [1.]]), (1, array![[0.5]])];
        let k = cov.covariance(&inputs);
        assert_eq!(k.dim(), (3, 3));
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(k[[i, j]], k[[j, i]], epsilon = 1e-12);
            }
        }
    }
}
