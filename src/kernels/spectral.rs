use crate::errors::{MogpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A spectral mixture LMC covariance block over `input_dims` inputs and
/// `output_dims` channels with `rq` latent functions.
///
/// The block covariance between (channel i, x) and (channel j, x') is
/// `B[i, j] * exp(-0.5 * sum_d scale_d * tau_d^2) * cos(sum_d mean_d * tau_d)`
/// with `tau = x - x'` and `B[i, j] = sum_r constant[r, i] * constant[r, j]`.
///
/// `mean` is kept in angular frequency units and `scale` in precision units;
/// the parameter estimator owns the conversion from plain spectral peak
/// frequencies and widths.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SpectralMixtureLmc<F: Float> {
    input_dims: usize,
    output_dims: usize,
    rq: usize,
    /// Mixing weights, one row per latent function, one column per channel
    constant: Array2<F>,
    /// Angular frequency center per input dimension
    mean: Array1<F>,
    /// Width (precision) per input dimension
    scale: Array1<F>,
}

impl<F: Float> SpectralMixtureLmc<F> {
    /// Create a block with unit weights, zero frequency centers and unit widths.
    pub fn new(input_dims: usize, output_dims: usize, rq: usize) -> SpectralMixtureLmc<F> {
        SpectralMixtureLmc {
            input_dims,
            output_dims,
            rq,
            constant: Array2::ones((rq, output_dims)),
            mean: Array1::zeros(input_dims),
            scale: Array1::ones(input_dims),
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

    /// Number of latent functions
    pub fn rq(&self) -> usize {
        self.rq
    }

    /// Get mixing weights
    pub fn constant(&self) -> &Array2<F> {
        &self.constant
    }

    /// Get frequency centers
    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Get widths
    pub fn scale(&self) -> &Array1<F> {
        &self.scale
    }

    /// Set mixing weights. The channel dimension must match the block; the
    /// row count follows the initialization strategy that produced the matrix.
    pub fn set_constant(&mut self, constant: Array2<F>) -> Result<()> {
        if constant.ncols() != self.output_dims {
            return Err(MogpError::InvalidValueError(format!(
                "constant should have {} columns (one per channel), got {}",
                self.output_dims,
                constant.ncols()
            )));
        }
        self.constant = constant;
        Ok(())
    }

    /// Set frequency centers (angular units).
    pub fn set_mean(&mut self, mean: Array1<F>) -> Result<()> {
        if mean.is_empty() {
            return Err(MogpError::InvalidValueError(
                "mean should not be empty".to_string(),
            ));
        }
        self.mean = mean;
        Ok(())
    }

    /// Set widths. Widths are variances hence must be non-negative.
    pub fn set_scale(&mut self, scale: Array1<F>) -> Result<()> {
        if scale.is_empty() {
            return Err(MogpError::InvalidValueError(
                "scale should not be empty".to_string(),
            ));
        }
        if scale.iter().any(|v| *v < F::zero()) {
            return Err(MogpError::InvalidValueError(format!(
                "scale should be non-negative, got {scale}"
            )));
        }
        self.scale = scale;
        Ok(())
    }

    /// Covariance contribution between (channel `i`, x) and (channel `j`, x')
    /// given `tau = x - x'`.
    pub fn value(&self, i: usize, j: usize, tau: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        let b = self
            .constant
            .rows()
            .into_iter()
            .fold(F::zero(), |acc, row| acc + row[i] * row[j]);
        let decay = tau
            .iter()
            .zip(self.scale.iter())
            .fold(F::zero(), |acc, (t, s)| acc + *s * *t * *t);
        let phase = tau
            .iter()
            .zip(self.mean.iter())
            .fold(F::zero(), |acc, (t, m)| acc + *m * *t);
        b * F::exp(F::cast(-0.5) * decay) * F::cos(phase)
    }
}

impl<F: Float> fmt::Display for SpectralMixtureLmc<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SpectralMixtureLMC")
    }
}

/// A single-output spectral mixture kernel with `q` components:
/// `k(tau) = sum_q w_q * exp(-2 pi^2 tau' diag(v_q) tau) * cos(2 pi mu_q' tau)`.
///
/// Used to fit one channel at a time when seeding a multi-output model from
/// independent fits, and as the signal model of the nonparametric spectral
/// estimator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SpectralMixture<F: Float> {
    q: usize,
    input_dims: usize,
    /// Component magnitudes (q,)
    weights: Array1<F>,
    /// Component frequency centers (q, input_dims)
    means: Array2<F>,
    /// Component frequency variances (q, input_dims)
    scales: Array2<F>,
}

impl<F: Float> SpectralMixture<F> {
    /// Create a kernel with unit weights, zero frequencies and unit variances.
    pub fn new(q: usize, input_dims: usize) -> SpectralMixture<F> {
        SpectralMixture {
            q,
            input_dims,
            weights: Array1::ones(q),
            means: Array2::zeros((q, input_dims)),
            scales: Array2::ones((q, input_dims)),
        }
    }

    /// Number of spectral components
    pub fn q(&self) -> usize {
        self.q
    }

    /// Number of input dimensions
    pub fn input_dims(&self) -> usize {
        self.input_dims
    }

    /// Get component magnitudes
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Get component frequency centers
    pub fn means(&self) -> &Array2<F> {
        &self.means
    }

    /// Get component frequency variances
    pub fn scales(&self) -> &Array2<F> {
        &self.scales
    }

    pub(crate) fn weights_mut(&mut self) -> &mut Array1<F> {
        &mut self.weights
    }

    pub(crate) fn means_mut(&mut self) -> &mut Array2<F> {
        &mut self.means
    }

    pub(crate) fn scales_mut(&mut self) -> &mut Array2<F> {
        &mut self.scales
    }

    /// Length of the flattened hyperparameter vector: per component one weight,
    /// `input_dims` means and `input_dims` scales.
    pub fn n_params(q: usize, input_dims: usize) -> usize {
        q * (1 + 2 * input_dims)
    }

    /// Rebuild a kernel from a flattened hyperparameter vector laid out as
    /// `[w_0, mu_0, v_0, w_1, mu_1, v_1, ...]`.
    pub fn from_params(q: usize, input_dims: usize, params: &[F]) -> Result<SpectralMixture<F>> {
        if params.len() != Self::n_params(q, input_dims) {
            return Err(MogpError::InvalidValueError(format!(
                "expected {} hyperparameters, got {}",
                Self::n_params(q, input_dims),
                params.len()
            )));
        }
        let mut kernel = SpectralMixture::new(q, input_dims);
        let stride = 1 + 2 * input_dims;
        for qi in 0..q {
            let chunk = &params[qi * stride..(qi + 1) * stride];
            kernel.weights[qi] = chunk[0];
            for d in 0..input_dims {
                kernel.means[[qi, d]] = chunk[1 + d];
                kernel.scales[[qi, d]] = chunk[1 + input_dims + d];
            }
        }
        Ok(kernel)
    }

    /// Flatten hyperparameters into the optimizer layout.
    pub fn to_params(&self) -> Array1<F> {
        let stride = 1 + 2 * self.input_dims;
        let mut params = Array1::zeros(self.q * stride);
        for qi in 0..self.q {
            params[qi * stride] = self.weights[qi];
            for d in 0..self.input_dims {
                params[qi * stride + 1 + d] = self.means[[qi, d]];
                params[qi * stride + 1 + self.input_dims + d] = self.scales[[qi, d]];
            }
        }
        params
    }

    /// Kernel value at lag `tau`.
    pub fn value(&self, tau: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        let two_pi = F::cast(2.) * F::cast(std::f64::consts::PI);
        let mut sum = F::zero();
        for qi in 0..self.q {
            let decay = tau
                .iter()
                .zip(self.scales.row(qi).iter())
                .fold(F::zero(), |acc, (t, v)| acc + *v * *t * *t);
            let phase = tau
                .iter()
                .zip(self.means.row(qi).iter())
                .fold(F::zero(), |acc, (t, m)| acc + *m * *t);
            sum = sum
                + self.weights[qi]
                    * F::exp(F::cast(-2.) * F::cast(std::f64::consts::PI.powi(2)) * decay)
                    * F::cos(two_pi * phase);
        }
        sum
    }
}

impl<F: Float> fmt::Display for SpectralMixture<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SpectralMixture(q={})", self.q)
    }
}
