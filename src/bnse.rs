//! Bayesian nonparametric spectral estimation.
//!
//! A one-dimensional signal is modeled as a zero-mean Gaussian process with a
//! one-component spectral mixture kernel plus observation noise. Once the
//! kernel hyperparameters are fitted by exact marginal likelihood, the
//! windowed Fourier transform of the signal is jointly Gaussian with the
//! observations and its posterior mean is available in closed form, giving a
//! posterior power spectral density over a frequency grid. Spectral peaks
//! (magnitude, center frequency, width) extracted from that density seed the
//! hyperparameters of multi-output spectral mixture models.

use crate::errors::{MogpError, Result};
use crate::optimization::{into_f64, optimize_params, prepare_multistart, CobylaParams};
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use log::warn;
use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_stats::QuantileExt;
use rayon::prelude::*;

/// Number of points of the posterior spectral density frequency grid
pub const BNSE_FREQ_GRID_SIZE: usize = 500;
/// Number of multistart restarts for the spectral estimator fit
pub(crate) const BNSE_N_START: usize = 5;
/// Default max number of likelihood evaluations per restart
pub(crate) const BNSE_MAX_EVAL: usize = 200;

/// Spectral peak triples per channel and input dimension, each array of shape
/// (channels, input_dims, q).
#[derive(Clone, Debug)]
pub struct PsdPeaks<F: Float> {
    /// Peak magnitudes
    pub amplitudes: Array3<F>,
    /// Peak center frequencies (plain frequency units)
    pub means: Array3<F>,
    /// Peak widths (frequency variances)
    pub variances: Array3<F>,
}

impl<F: Float> PsdPeaks<F> {
    /// Allocate zeroed peak arrays for `channels` channels, `input_dims`
    /// dimensions and `q` components.
    pub fn zeros(channels: usize, input_dims: usize, q: usize) -> PsdPeaks<F> {
        PsdPeaks {
            amplitudes: Array3::zeros((channels, input_dims, q)),
            means: Array3::zeros((channels, input_dims, q)),
            variances: Array3::zeros((channels, input_dims, q)),
        }
    }
}

/// Posterior spectral density estimator for one scalar signal.
#[derive(Clone, Debug)]
pub struct BnseEstimator<F: Float> {
    /// Input locations
    x: Array1<F>,
    /// Centered observations
    y: Array1<F>,
    /// Window precision, fixed from the input span
    alpha: F,
    /// Largest resolvable frequency, from the median input spacing
    nyquist: F,
    /// Signal magnitude
    sigma: F,
    /// Kernel decay
    gamma: F,
    /// Kernel frequency center
    theta: F,
    /// Observation noise magnitude
    sigma_n: F,
}

impl<F: Float> BnseEstimator<F> {
    /// Create an estimator over observations `y` at locations `x`.
    ///
    /// Observations are centered; hyperparameters start at data-driven
    /// values and are refined by [`BnseEstimator::fit`].
    pub fn new(x: Array1<F>, y: Array1<F>) -> Result<BnseEstimator<F>> {
        if x.len() != y.len() {
            return Err(MogpError::InvalidValueError(format!(
                "x and y should have the same length, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 4 {
            return Err(MogpError::SpectralEstimationError(format!(
                "at least 4 samples are required, got {}",
                x.len()
            )));
        }
        let xmin = *x.min().unwrap();
        let xmax = *x.max().unwrap();
        let range = xmax - xmin;
        if range <= F::zero() {
            return Err(MogpError::SpectralEstimationError(
                "input locations are all identical".to_string(),
            ));
        }
        let spacing = median_spacing(&x)?;
        let nyquist = F::cast(0.5) / spacing;

        let n = F::cast(x.len());
        // center both axes: the spectral window sits at t = 0
        let xmean = x.mean().unwrap();
        let x = x.mapv(|v| v - xmean);
        let ymean = y.mean().unwrap();
        let y = y.mapv(|v| v - ymean);
        let sigma = y.mapv(|v| v * v).mean().unwrap().sqrt();
        if sigma == F::zero() {
            return Err(MogpError::SpectralEstimationError(
                "constant signal has an empty spectrum".to_string(),
            ));
        }

        let half_span = range / F::cast(2.);
        let alpha = F::cast(0.5) / (half_span * half_span);
        let init_scale = F::cast(2.) * range / n;
        let gamma = F::cast(0.5) / (init_scale * init_scale);
        let theta = F::cast(0.01) * nyquist;
        let sigma_n = sigma / F::cast(10.);

        Ok(BnseEstimator {
            x,
            y,
            alpha,
            nyquist,
            sigma,
            gamma,
            theta,
            sigma_n,
        })
    }

    /// Largest resolvable frequency
    pub fn nyquist(&self) -> F {
        self.nyquist
    }

    /// Override kernel hyperparameters (signal magnitude, decay, frequency
    /// center, noise magnitude) instead of fitting them.
    pub fn set_hyperparameters(&mut self, sigma: F, gamma: F, theta: F, sigma_n: F) -> Result<()> {
        if sigma <= F::zero() || gamma <= F::zero() || sigma_n <= F::zero() || theta < F::zero() {
            return Err(MogpError::InvalidValueError(
                "hyperparameters should be positive".to_string(),
            ));
        }
        self.sigma = sigma;
        self.gamma = gamma;
        self.theta = theta;
        self.sigma_n = sigma_n;
        Ok(())
    }

    /// Fit kernel hyperparameters by exact negative log marginal likelihood
    /// minimization with multistart COBYLA on log10 scale.
    pub fn fit(&mut self, maxeval: usize) -> Result<()> {
        let t_diff = outer_differences(&self.x);
        let y = self.y.to_owned().insert_axis(Axis(1));

        let param0 = ndarray::arr1(&[self.sigma, self.gamma, self.theta, self.sigma_n]);
        let bounds = vec![
            (self.sigma * F::cast(1e-2), self.sigma * F::cast(1e2)),
            (self.gamma * F::cast(1e-3), self.gamma * F::cast(1e3)),
            (self.nyquist * F::cast(1e-3), self.nyquist),
            (self.sigma * F::cast(1e-4), self.sigma * F::cast(10.)),
        ];
        let (param0s, bounds) = prepare_multistart(BNSE_N_START, &param0, &bounds);

        let base: f64 = 10.;
        let objfn = |p: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
            let decoded = p.iter().map(|v| base.powf(*v)).collect::<Vec<_>>();
            if decoded.iter().any(|v| v.is_nan()) {
                return f64::INFINITY;
            }
            let (sigma, gamma, theta, sigma_n) = (
                F::cast(decoded[0]),
                F::cast(decoded[1]),
                F::cast(decoded[2]),
                F::cast(decoded[3]),
            );
            match negative_log_likelihood(&t_diff, &y, sigma, gamma, theta, sigma_n) {
                Ok(nll) => into_f64(&nll),
                Err(_) => f64::INFINITY,
            }
        };

        let opt = (0..param0s.nrows())
            .into_par_iter()
            .map(|i| {
                optimize_params(
                    objfn,
                    &param0s.row(i).to_owned(),
                    &bounds,
                    CobylaParams {
                        maxeval,
                        ..CobylaParams::default()
                    },
                )
            })
            .reduce(
                || (f64::INFINITY, Array1::ones(param0.len())),
                |a, b| if b.0 < a.0 { b } else { a },
            );
        if !opt.0.is_finite() {
            return Err(MogpError::LikelihoodComputationError(
                "spectral estimator likelihood could not be evaluated".to_string(),
            ));
        }
        let fitted = opt.1.mapv(|v| F::cast(base.powf(v)));
        self.sigma = fitted[0];
        self.gamma = fitted[1];
        self.theta = fitted[2];
        self.sigma_n = fitted[3];
        Ok(())
    }

    /// Posterior mean power spectral density at the given frequencies.
    pub fn posterior_psd(&self, freqs: &Array1<F>) -> Result<Array1<F>> {
        let t_diff = outer_differences(&self.x);
        let k = covariance(
            &t_diff,
            self.sigma,
            self.gamma,
            self.theta,
            self.sigma_n,
        );
        let l = k.cholesky()?;
        let z = l.solve_triangular(&self.y.to_owned().insert_axis(Axis(1)), UPLO::Lower)?;
        let h = l.t().solve_triangular_into(z, UPLO::Upper)?;
        let h = h.remove_axis(Axis(1));

        let pi = F::cast(std::f64::consts::PI);
        let two_pi = F::cast(2.) * pi;
        let ag = self.alpha + self.gamma;
        let prefactor = self.sigma * self.sigma / F::cast(2.) * (pi / ag).sqrt();

        let mut psd = Array1::zeros(freqs.len());
        for (slot, xi) in freqs.iter().enumerate() {
            let mut re = F::zero();
            let mut im = F::zero();
            for (t, hv) in self.x.iter().zip(h.iter()) {
                let envelope = F::exp(-self.alpha * self.gamma * *t * *t / ag);
                let mut rc = F::zero();
                let mut rs = F::zero();
                for sign in [F::one(), -F::one()] {
                    let lobe = *xi + sign * self.theta;
                    let amp = F::exp(-pi * pi * lobe * lobe / ag);
                    let phase = two_pi * *t * (lobe * self.gamma / ag - sign * self.theta);
                    rc = rc + amp * F::cos(phase);
                    rs = rs + amp * F::sin(phase);
                }
                re = re + prefactor * envelope * rc * *hv;
                im = im + prefactor * envelope * rs * *hv;
            }
            psd[slot] = re * re + im * im;
        }
        Ok(psd)
    }

    /// Extract up to `q` spectral peaks from the posterior density over the
    /// default frequency grid. Returns (magnitudes, frequencies, variances)
    /// vectors of length `q`; missing peaks are zero-filled.
    pub fn peaks(&self, q: usize) -> Result<(Array1<F>, Array1<F>, Array1<F>)> {
        let freqs = Array1::linspace(F::zero(), self.nyquist, BNSE_FREQ_GRID_SIZE);
        let psd = self.posterior_psd(&freqs)?;
        Ok(grid_peaks(&freqs, &psd, q))
    }
}

/// Extract up to `q` (magnitude, frequency, variance) peak triples from a
/// density sampled over a uniform frequency grid. Peaks are the interior
/// local maxima ranked by magnitude, their widths the Laplace curvature
/// widths; missing components are zero-filled.
pub(crate) fn grid_peaks<F: Float>(
    freqs: &Array1<F>,
    psd: &Array1<F>,
    q: usize,
) -> (Array1<F>, Array1<F>, Array1<F>) {
    let step = freqs[1] - freqs[0];

    let mut maxima: Vec<usize> = (1..psd.len() - 1)
        .filter(|&i| psd[i] > psd[i - 1] && psd[i] >= psd[i + 1])
        .collect();
    if maxima.is_empty() {
        maxima.push(psd.argmax().unwrap());
    }
    maxima.sort_by(|&a, &b| psd[b].partial_cmp(&psd[a]).unwrap());

    let mut amplitudes = Array1::zeros(q);
    let mut means = Array1::zeros(q);
    let mut variances = Array1::zeros(q);
    for (slot, &i) in maxima.iter().take(q).enumerate() {
        amplitudes[slot] = psd[i];
        means[slot] = freqs[i];
        let curvature = if i > 0 && i + 1 < psd.len() {
            (psd[i + 1] - F::cast(2.) * psd[i] + psd[i - 1]) / (step * step)
        } else {
            F::zero()
        };
        variances[slot] = if curvature < F::zero() {
            psd[i] / curvature.abs()
        } else {
            step * step
        };
    }
    if maxima.len() < q {
        warn!(
            "spectral density exposes {} peaks, {} requested; remaining components zero-filled",
            maxima.len(),
            q
        );
    }
    (amplitudes, means, variances)
}

/// Pairwise differences x_i - x_j as a full square matrix
fn outer_differences<F: Float>(x: &Array1<F>) -> Array2<F> {
    let n = x.len();
    let mut diff = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            diff[[i, j]] = x[i] - x[j];
        }
    }
    diff
}

/// Spectral mixture covariance matrix with noise and stability jitter
fn covariance<F: Float>(t_diff: &Array2<F>, sigma: F, gamma: F, theta: F, sigma_n: F) -> Array2<F> {
    let two_pi = F::cast(2.) * F::cast(std::f64::consts::PI);
    let nugget = F::cast(100.0) * F::epsilon();
    let mut k = t_diff.mapv(|tau| {
        sigma * sigma * F::exp(-gamma * tau * tau) * F::cos(two_pi * theta * tau)
    });
    let noise = sigma_n * sigma_n + nugget;
    for i in 0..k.nrows() {
        k[[i, i]] = k[[i, i]] + noise;
    }
    k
}

/// Exact negative log marginal likelihood of the spectral mixture GP
fn negative_log_likelihood<F: Float>(
    t_diff: &Array2<F>,
    y: &Array2<F>,
    sigma: F,
    gamma: F,
    theta: F,
    sigma_n: F,
) -> Result<F> {
    let k = covariance(t_diff, sigma, gamma, theta, sigma_n);
    let l = k.cholesky()?;
    let z = l.solve_triangular(y, UPLO::Lower)?;
    let n = F::cast(y.nrows());
    let half = F::cast(0.5);
    let fit = half * z.mapv(|v| v * v).sum();
    let logdet: F = l.diag().mapv(|v| v.ln()).sum();
    let norm = half * n * F::cast(2.) * F::cast(std::f64::consts::PI).ln();
    Ok(fit + logdet + norm)
}

/// Median spacing between sorted input locations
pub(crate) fn median_spacing<F: Float>(x: &Array1<F>) -> Result<F> {
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut spacings: Vec<F> = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|v| *v > F::zero())
        .collect();
    if spacings.is_empty() {
        return Err(MogpError::SpectralEstimationError(
            "input locations are all identical".to_string(),
        ));
    }
    spacings.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(spacings[spacings.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn sinusoid(freq: f64, n: usize) -> (Array1<f64>, Array1<f64>) {
        let x = Array::linspace(0., 10., n);
        let y = x.mapv(|v: f64| (2. * std::f64::consts::PI * freq * v).sin());
        (x, y)
    }

    #[test]
    fn test_new_rejects_degenerate_input() {
        let x = Array1::from_elem(10, 1.0);
        let y = Array1::zeros(10);
        assert!(BnseEstimator::new(x, y).is_err());
        let (x, _) = sinusoid(0.5, 20);
        let y = Array1::from_elem(20, 3.0);
        assert!(BnseEstimator::new(x, y).is_err());
    }

    #[test]
    fn test_nyquist_from_spacing() {
        let (x, y) = sinusoid(0.5, 51);
        let est = BnseEstimator::new(x, y).unwrap();
        // spacing 0.2 -> nyquist 2.5
        assert_abs_diff_eq!(est.nyquist(), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_psd_peaks_at_signal_frequency() {
        let (x, y) = sinusoid(0.5, 80);
        let mut est = BnseEstimator::new(x, y).unwrap();
        // hyperparameters matching the signal; no fit needed for the density
        est.set_hyperparameters(0.7, 0.05, 0.5, 0.05).unwrap();
        let (amplitudes, means, _) = est.peaks(1).unwrap();
        assert!(amplitudes[0] > 0.);
        assert_abs_diff_eq!(means[0], 0.5, epsilon = 0.1);
    }

    #[test]
    fn test_fit_recovers_dominant_frequency() {
        let (x, y) = sinusoid(0.4, 60);
        let mut est = BnseEstimator::new(x, y).unwrap();
        est.fit(BNSE_MAX_EVAL).unwrap();
        let (_, means, variances) = est.peaks(1).unwrap();
        assert_abs_diff_eq!(means[0], 0.4, epsilon = 0.15);
        assert!(variances[0] >= 0.);
    }

    #[test]
    fn test_peaks_pad_missing_components() {
        let (x, y) = sinusoid(0.5, 60);
        let mut est = BnseEstimator::new(x, y).unwrap();
        est.set_hyperparameters(0.7, 0.05, 0.5, 0.05).unwrap();
        let (amplitudes, _, _) = est.peaks(8).unwrap();
        assert_eq!(amplitudes.len(), 8);
        assert_eq!(amplitudes[7], 0.);
    }
}
