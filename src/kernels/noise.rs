use crate::errors::{MogpError, Result};
use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A white noise covariance block holding one variance per output channel.
///
/// Contributes `noise[i]` when both points coincide on the same channel and
/// zero everywhere else.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Noise<F: Float> {
    input_dims: usize,
    output_dims: usize,
    /// Noise variance per channel
    noise: Array1<F>,
}

impl<F: Float> Noise<F> {
    /// Create a noise block with a small default variance on every channel.
    pub fn new(input_dims: usize, output_dims: usize) -> Noise<F> {
        Noise {
            input_dims,
            output_dims,
            noise: Array1::from_elem(output_dims, F::cast(1e-2)),
        }
    }

    /// Number of input dimensions
    pub fn input_dims(&self) -> usize {
        self.input_dims
    }

    /// Number of output channels
    pub fn output_dims(&self) -> usize {
        self.output_dims
    }

    /// Get per-channel noise variances
    pub fn noise(&self) -> &Array1<F> {
        &self.noise
    }

    /// Set per-channel noise variances; one non-negative value per channel.
    pub fn set_noise(&mut self, noise: Array1<F>) -> Result<()> {
        if noise.len() != self.output_dims {
            return Err(MogpError::InvalidValueError(format!(
                "noise should have {} entries (one per channel), got {}",
                self.output_dims,
                noise.len()
            )));
        }
        if noise.iter().any(|v| *v < F::zero()) {
            return Err(MogpError::InvalidValueError(format!(
                "noise variances should be non-negative, got {noise}"
            )));
        }
        self.noise = noise;
        Ok(())
    }

    /// Covariance contribution between (channel `i`, x) and (channel `j`, x')
    /// given `tau = x - x'`.
    pub fn value(&self, i: usize, j: usize, tau: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        if i == j && tau.iter().all(|v| *v == F::zero()) {
            self.noise[i]
        } else {
            F::zero()
        }
    }
}

impl<F: Float> fmt::Display for Noise<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Noise")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_noise_is_diagonal() {
        let mut block = Noise::<f64>::new(1, 2);
        block.set_noise(array![0.3, 0.7]).unwrap();
        assert_eq!(block.value(0, 0, &array![0.]), 0.3);
        assert_eq!(block.value(1, 1, &array![0.]), 0.7);
        assert_eq!(block.value(0, 1, &array![0.]), 0.);
        assert_eq!(block.value(0, 0, &array![0.1]), 0.);
    }

    #[test]
    fn test_noise_rejects_bad_values() {
        let mut block = Noise::<f64>::new(1, 2);
        assert!(block.set_noise(array![0.3]).is_err());
        assert!(block.set_noise(array![0.3, -0.1]).is_err());
    }
}
