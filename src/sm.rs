//! Independent single-output spectral mixture fits.
//!
//! Each channel of a dataset is fitted on its own with a Q-component spectral
//! mixture kernel by exact marginal likelihood. The fitted per-channel
//! weights, frequency centers and frequency variances are collected per
//! component and used as initial values of a multi-output model.

use crate::bnse::{grid_peaks, median_spacing, BnseEstimator, BNSE_FREQ_GRID_SIZE, BNSE_MAX_EVAL};
use crate::dataset::{Channel, DataSet};
use crate::errors::{MogpError, Result};
use crate::kernels::SpectralMixture;
use crate::optimization::{into_f64, optimize_params, prepare_multistart, CobylaParams};
use crate::utils::DiffMatrix;
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use log::info;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use std::str::FromStr;

/// Number of multistart restarts for each per-channel fit
pub(crate) const SM_N_START: usize = 5;

/// Initialization scheme of the per-channel spectral mixture fits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmInit {
    /// Seed from the channel's nonparametric spectral density peaks
    Bnse,
    /// Seed from discrete periodogram peaks
    Ls,
    /// Seed from seeded uniform draws
    Random,
}

impl FromStr for SmInit {
    type Err = MogpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BNSE" => Ok(SmInit::Bnse),
            "LS" => Ok(SmInit::Ls),
            "RANDOM" => Ok(SmInit::Random),
            _ => Err(MogpError::InvalidValueError(format!(
                "possible init schemes are 'BNSE', 'LS' or 'random', got '{s}'"
            ))),
        }
    }
}

/// Optimizer backing the per-channel spectral mixture fits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmMethod {
    /// Derivative-free COBYLA minimization
    Cobyla,
}

impl FromStr for SmMethod {
    type Err = MogpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COBYLA" => Ok(SmMethod::Cobyla),
            _ => Err(MogpError::InvalidValueError(format!(
                "possible optimization methods are 'COBYLA', got '{s}'"
            ))),
        }
    }
}

/// Per-component fit results across channels; each array has shape
/// (channels, input_dims). The scalar per-channel weight is broadcast across
/// the input-dimension axis.
#[derive(Clone, Debug)]
pub struct SmComponent<F: Float> {
    /// Component magnitudes
    pub weight: Array2<F>,
    /// Component frequency centers
    pub mean: Array2<F>,
    /// Component frequency variances
    pub scale: Array2<F>,
}

/// Fit one independent Q-component spectral mixture kernel per channel and
/// collect the fitted hyperparameters per component.
///
/// `maxiter` bounds the likelihood evaluations of each restart; `plot`
/// reports the fitted spectral content of each channel through the log.
pub fn estimate_from_sm<F: Float>(
    dataset: &DataSet<F>,
    q: usize,
    init: SmInit,
    method: SmMethod,
    maxiter: usize,
    plot: bool,
) -> Result<Vec<SmComponent<F>>> {
    if q == 0 {
        return Err(MogpError::InvalidValueError(
            "at least one component is required".to_string(),
        ));
    }
    let SmMethod::Cobyla = method;

    let m = dataset.len();
    let d = dataset.input_dims();
    let mut components: Vec<SmComponent<F>> = (0..q)
        .map(|_| SmComponent {
            weight: Array2::zeros((m, d)),
            mean: Array2::zeros((m, d)),
            scale: Array2::zeros((m, d)),
        })
        .collect();

    for (ch_idx, channel) in dataset.iter().enumerate() {
        let kernel = fit_channel(channel, ch_idx, q, init, maxiter)?;
        for (qi, component) in components.iter_mut().enumerate() {
            component
                .weight
                .row_mut(ch_idx)
                .fill(kernel.weights()[qi]);
            component.mean.row_mut(ch_idx).assign(&kernel.means().row(qi));
            component.scale.row_mut(ch_idx).assign(&kernel.scales().row(qi));
        }
        if plot {
            info!(
                "channel {}: weights={} means={} scales={}",
                channel.name(),
                kernel.weights(),
                kernel.means(),
                kernel.scales()
            );
        }
    }
    Ok(components)
}

/// Fit one channel with a Q-component spectral mixture kernel plus noise.
fn fit_channel<F: Float>(
    channel: &Channel<F>,
    ch_idx: usize,
    q: usize,
    init: SmInit,
    maxiter: usize,
) -> Result<SpectralMixture<F>> {
    let d = channel.input_dims();
    let variance = channel.variance();
    if variance == F::zero() {
        return Err(MogpError::SpectralEstimationError(format!(
            "channel {} is constant",
            channel.name()
        )));
    }
    let sigma = variance.sqrt();

    let nyquists = (0..d)
        .map(|dim| Ok(F::cast(0.5) / median_spacing(&channel.x().column(dim).to_owned())?))
        .collect::<Result<Vec<F>>>()?;

    let kernel0 = initial_kernel(channel, ch_idx, q, init, &nyquists)?;
    let sigma_n0 = sigma / F::cast(10.);

    // Hyperparameter vector: flattened kernel params then the noise magnitude
    let n_kernel_params = SpectralMixture::<F>::n_params(q, d);
    let mut param0 = Array1::zeros(n_kernel_params + 1);
    param0
        .slice_mut(ndarray::s![..n_kernel_params])
        .assign(&kernel0.to_params());
    param0[n_kernel_params] = sigma_n0;

    let mut bounds = Vec::with_capacity(n_kernel_params + 1);
    for _ in 0..q {
        bounds.push((variance * F::cast(1e-4), variance * F::cast(1e2)));
        for &nyq in &nyquists {
            bounds.push((nyq * F::cast(1e-4), nyq));
        }
        for &nyq in &nyquists {
            bounds.push((nyq * nyq * F::cast(1e-6), nyq * nyq));
        }
    }
    bounds.push((sigma * F::cast(1e-4), sigma));

    // Clamp the seed inside the bounds before switching to log10 scale
    for (p, (lo, hi)) in param0.iter_mut().zip(bounds.iter()) {
        if *p < *lo {
            *p = *lo;
        }
        if *p > *hi {
            *p = *hi;
        }
    }

    let t_diff = DiffMatrix::new(channel.x());
    let y = channel.y().to_owned().insert_axis(Axis(1));

    let (param0s, bounds) = prepare_multistart(SM_N_START, &param0, &bounds);
    let base: f64 = 10.;
    let objfn = |p: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
        let decoded: Vec<F> = p.iter().map(|v| F::cast(base.powf(*v))).collect();
        if decoded.iter().any(|v| v.is_nan()) {
            return f64::INFINITY;
        }
        let kernel = match SpectralMixture::from_params(q, d, &decoded[..n_kernel_params]) {
            Ok(kernel) => kernel,
            Err(_) => return f64::INFINITY,
        };
        let sigma_n = decoded[n_kernel_params];
        match negative_log_likelihood(&kernel, sigma_n, &t_diff, &y) {
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
                    maxeval: maxiter,
                    ..CobylaParams::default()
                },
            )
        })
        .reduce(
            || (f64::INFINITY, Array1::ones(param0.len())),
            |a, b| if b.0 < a.0 { b } else { a },
        );
    if !opt.0.is_finite() {
        return Err(MogpError::LikelihoodComputationError(format!(
            "channel {} spectral mixture likelihood could not be evaluated",
            channel.name()
        )));
    }
    let fitted = opt.1.mapv(|v| F::cast(base.powf(v)));
    SpectralMixture::from_params(q, d, &fitted.to_vec()[..n_kernel_params])
}

/// Initial kernel values for one channel fit
fn initial_kernel<F: Float>(
    channel: &Channel<F>,
    ch_idx: usize,
    q: usize,
    init: SmInit,
    nyquists: &[F],
) -> Result<SpectralMixture<F>> {
    let d = channel.input_dims();
    let variance = channel.variance();
    let mut kernel = SpectralMixture::new(q, d);

    match init {
        SmInit::Random => {
            let mut rng = Xoshiro256Plus::seed_from_u64(42 + ch_idx as u64);
            for qi in 0..q {
                for dim in 0..d {
                    let nyq = nyquists[dim];
                    kernel.means_mut()[[qi, dim]] = F::cast(rng.gen_range(0.0..1.0)) * nyq;
                    kernel.scales_mut()[[qi, dim]] =
                        F::cast(rng.gen_range(0.0..1.0)) * nyq * nyq / F::cast(q * q);
                }
            }
            kernel
                .weights_mut()
                .assign(&Array1::from_elem(q, variance / F::cast(q)));
        }
        SmInit::Bnse | SmInit::Ls => {
            let mut amplitude_sums = Array1::<F>::zeros(q);
            for dim in 0..d {
                let x = channel.x().column(dim).to_owned();
                let (amplitudes, means, variances) = match init {
                    SmInit::Bnse => {
                        let mut estimator = BnseEstimator::new(x, channel.y().to_owned())?;
                        estimator.fit(BNSE_MAX_EVAL)?;
                        estimator.peaks(q)?
                    }
                    _ => periodogram_peaks(&x, channel.y(), nyquists[dim], q),
                };
                for qi in 0..q {
                    amplitude_sums[qi] = amplitude_sums[qi] + amplitudes[qi];
                    kernel.means_mut()[[qi, dim]] = means[qi];
                    kernel.scales_mut()[[qi, dim]] = variances[qi];
                }
            }
            let total = amplitude_sums.sum();
            let weights = if total > F::zero() {
                amplitude_sums.mapv(|a| a / total * variance)
            } else {
                Array1::from_elem(q, variance / F::cast(q))
            };
            kernel.weights_mut().assign(&weights);
        }
    }
    Ok(kernel)
}

/// Discrete periodogram peaks over a uniform frequency grid; valid for
/// irregular sampling.
fn periodogram_peaks<F: Float>(
    x: &Array1<F>,
    y: &Array1<F>,
    nyquist: F,
    q: usize,
) -> (Array1<F>, Array1<F>, Array1<F>) {
    let two_pi = F::cast(2.) * F::cast(std::f64::consts::PI);
    let ymean = y.mean().unwrap();
    let freqs = Array1::linspace(F::zero(), nyquist, BNSE_FREQ_GRID_SIZE);
    let n = F::cast(y.len());
    let mut power = Array1::zeros(freqs.len());
    for (k, xi) in freqs.iter().enumerate() {
        let mut re = F::zero();
        let mut im = F::zero();
        for (t, v) in x.iter().zip(y.iter()) {
            let phase = two_pi * *xi * *t;
            re = re + (*v - ymean) * F::cos(phase);
            im = im + (*v - ymean) * F::sin(phase);
        }
        power[k] = (re * re + im * im) / n;
    }
    grid_peaks(&freqs, &power, q)
}

/// Exact negative log marginal likelihood of a spectral mixture GP over one
/// channel
fn negative_log_likelihood<F: Float>(
    kernel: &SpectralMixture<F>,
    sigma_n: F,
    t_diff: &DiffMatrix<F>,
    y: &Array2<F>,
) -> Result<F> {
    let nugget = F::cast(100.0) * F::epsilon();
    let zero_lag = Array1::zeros(t_diff.d.ncols());
    let diagonal = kernel.value(&zero_lag) + sigma_n * sigma_n + nugget;
    let mut k = Array2::<F>::eye(t_diff.n_obs).mapv(|v| v * diagonal);
    for (r, ij) in t_diff.d_indices.outer_iter().enumerate() {
        let value = kernel.value(&t_diff.d.row(r));
        k[[ij[0], ij[1]]] = value;
        k[[ij[1], ij[0]]] = value;
    }
    let l = k.cholesky()?;
    let z = l.solve_triangular(y, UPLO::Lower)?;
    let n = F::cast(y.nrows());
    let half = F::cast(0.5);
    let fit = half * z.mapv(|v| v * v).sum();
    let logdet: F = l.diag().mapv(|v| v.ln()).sum();
    let norm = half * n * F::cast(2.) * F::cast(std::f64::consts::PI).ln();
    Ok(fit + logdet + norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;
    use paste::paste;

    fn dataset(freqs: &[f64], n: usize) -> DataSet<f64> {
        let channels = freqs
            .iter()
            .enumerate()
            .map(|(i, freq)| {
                let x = Array::linspace(0., 10., n).insert_axis(Axis(1));
                let y = x
                    .column(0)
                    .mapv(|v: f64| (2. * std::f64::consts::PI * freq * v).sin());
                Channel::new(format!("ch{i}"), x, y).unwrap()
            })
            .collect();
        DataSet::new(channels).unwrap()
    }

    #[test]
    fn test_init_scheme_parsing() {
        assert_eq!("BNSE".parse::<SmInit>().unwrap(), SmInit::Bnse);
        assert_eq!("LS".parse::<SmInit>().unwrap(), SmInit::Ls);
        assert_eq!("random".parse::<SmInit>().unwrap(), SmInit::Random);
        assert!("fourier".parse::<SmInit>().is_err());
        assert_eq!("COBYLA".parse::<SmMethod>().unwrap(), SmMethod::Cobyla);
        assert!("BFGS".parse::<SmMethod>().is_err());
    }

    #[test]
    fn test_periodogram_finds_tone() {
        let x = Array::linspace(0., 10., 100);
        let y = x.mapv(|v: f64| (2. * std::f64::consts::PI * 0.8 * v).sin());
        let (amplitudes, means, _) = periodogram_peaks(&x, &y, 4.95, 1);
        assert!(amplitudes[0] > 0.);
        assert_abs_diff_eq!(means[0], 0.8, epsilon = 0.1);
    }

    #[test]
    fn test_estimate_from_sm_shapes() {
        let dataset = dataset(&[0.3, 0.6], 40);
        let components =
            estimate_from_sm(&dataset, 2, SmInit::Ls, SmMethod::Cobyla, 60, false).unwrap();
        assert_eq!(components.len(), 2);
        for component in &components {
            assert_eq!(component.weight.dim(), (2, 1));
            assert_eq!(component.mean.dim(), (2, 1));
            assert_eq!(component.scale.dim(), (2, 1));
            assert!(component.weight.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_estimate_from_sm_rejects_zero_components() {
        let dataset = dataset(&[0.3], 30);
        assert!(estimate_from_sm(&dataset, 0, SmInit::Ls, SmMethod::Cobyla, 30, false).is_err());
    }

    #[test]
    fn test_plot_flag_logs_spectral_summary() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dataset = dataset(&[0.4], 30);
        let components =
            estimate_from_sm(&dataset, 1, SmInit::Ls, SmMethod::Cobyla, 40, true).unwrap();
        assert_eq!(components.len(), 1);
    }

    macro_rules! test_sm_init {
        ($init:ident) => {
            paste! {
                #[test]
                fn [<test_estimate_from_sm_ $init:snake _init>]() {
                    let dataset = dataset(&[0.5], 30);
                    let components = estimate_from_sm(
                        &dataset,
                        1,
                        SmInit::$init,
                        SmMethod::Cobyla,
                        40,
                        false,
                    )
                    .unwrap();
                    assert_eq!(components.len(), 1);
                    assert!(components[0].weight.iter().all(|v| v.is_finite()));
                    assert!(components[0].scale.iter().all(|v| *v >= 0.));
                }
            }
        };
    }

    test_sm_init!(Bnse);
    test_sm_init!(Ls);
    test_sm_init!(Random);
}
