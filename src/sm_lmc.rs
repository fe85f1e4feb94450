//! Spectral mixture LMC multi-output model.
//!
//! The model sums Q spectral mixture LMC covariance blocks and one noise
//! block over all channels of a dataset. Kernel hyperparameters can be
//! seeded from data before the downstream likelihood optimization, either
//! from the nonparametric posterior spectral density of the channels (the
//! peak magnitudes, positions and widths initialize the mixing weights,
//! frequency centers and widths) or from independent per-channel spectral
//! mixture fits. With both strategies the noise variance of each channel
//! starts at 1/30 of its observed output variance.

use crate::bnse::PsdPeaks;
use crate::dataset::DataSet;
use crate::errors::{MogpError, Result};
use crate::kernels::{CovFunction, Noise, SpectralMixtureLmc};
use crate::model::{ExecContext, Likelihood, ModelBase};
use crate::sm::{estimate_from_sm, SmComponent, SmInit, SmMethod};
use linfa::{Float, ParamGuard};
use ndarray::{s, Array1, Array2, Axis};

/// Default max number of likelihood evaluations of each per-channel fit
pub const SM_DEFAULT_MAX_ITER: usize = 2000;
/// Initial noise variance as a fraction of the observed channel variance
const NOISE_VARIANCE_DIVISOR: f64 = 30.;

/// A set of validated spectral mixture LMC model parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SmLmcValidParams<F: Float> {
    /// Number of spectral components
    q: usize,
    /// Number of latent functions per component
    rq: usize,
    /// Observation likelihood; exact Gaussian when not given
    likelihood: Option<Likelihood<F>>,
    /// Variational rather than sampling inference
    variational: bool,
    /// Sparse approximation flag
    sparse: bool,
    /// Model name
    name: String,
}

impl<F: Float> Default for SmLmcValidParams<F> {
    fn default() -> SmLmcValidParams<F> {
        SmLmcValidParams {
            q: 1,
            rq: 1,
            likelihood: None,
            variational: false,
            sparse: false,
            name: "SM-LMC".to_string(),
        }
    }
}

impl<F: Float> SmLmcValidParams<F> {
    /// Number of spectral components
    pub fn q(&self) -> usize {
        self.q
    }

    /// Number of latent functions per component
    pub fn rq(&self) -> usize {
        self.rq
    }

    /// Given likelihood, if any
    pub fn likelihood(&self) -> Option<&Likelihood<F>> {
        self.likelihood.as_ref()
    }

    /// Whether inference should run variationally
    pub fn variational(&self) -> bool {
        self.variational
    }

    /// Whether inference should use a sparse approximation
    pub fn sparse(&self) -> bool {
        self.sparse
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The set of parameters that can be specified to build a
/// [spectral mixture LMC model](SmLmc).
#[derive(Clone, Debug)]
pub struct SmLmcParams<F: Float>(SmLmcValidParams<F>);

impl<F: Float> SmLmcParams<F> {
    /// A constructor for model parameters given a component count
    pub fn new(q: usize) -> SmLmcParams<F> {
        Self(SmLmcValidParams {
            q,
            ..Default::default()
        })
    }

    /// Set the number of latent functions per component.
    pub fn rq(mut self, rq: usize) -> Self {
        self.0.rq = rq;
        self
    }

    /// Set the observation likelihood.
    pub fn likelihood(mut self, likelihood: Likelihood<F>) -> Self {
        self.0.likelihood = Some(likelihood);
        self
    }

    /// Use variational inference rather than sampling.
    pub fn variational(mut self, variational: bool) -> Self {
        self.0.variational = variational;
        self
    }

    /// Use a sparse approximation.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.0.sparse = sparse;
        self
    }

    /// Set the model name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.0.name = name.into();
        self
    }

    /// Check the parameters and build the model over `dataset`.
    pub fn build<'d>(&self, dataset: &'d DataSet<F>) -> Result<SmLmc<'d, F>> {
        let checked = self.check_ref()?;
        Ok(checked.build(dataset))
    }
}

impl<F: Float> ParamGuard for SmLmcParams<F> {
    type Checked = SmLmcValidParams<F>;
    type Error = MogpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.q == 0 {
            return Err(MogpError::InvalidValueError(
                "at least one spectral component is required".to_string(),
            ));
        }
        if self.0.rq != 1 {
            return Err(MogpError::InvalidValueError(format!(
                "Rq != 1 is not (yet) supported, got {}",
                self.0.rq
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl<F: Float> SmLmcValidParams<F> {
    /// Build the model over `dataset`: Q spectral blocks plus one noise
    /// block, composed within the scoped execution context.
    pub fn build<'d>(&self, dataset: &'d DataSet<F>) -> SmLmc<'d, F> {
        let _context = ExecContext::acquire();
        let input_dims = dataset.input_dims();
        let output_dims = dataset.output_dims();
        let components = (0..self.q)
            .map(|_| SpectralMixtureLmc::new(input_dims, output_dims, self.rq))
            .collect();
        let noise = Noise::new(input_dims, output_dims);
        let kernel = CovFunction::compose(components, noise);
        let likelihood = self.likelihood.clone().unwrap_or_default();
        SmLmc {
            base: ModelBase::new(
                self.name.clone(),
                dataset,
                kernel,
                likelihood,
                self.variational,
                self.sparse,
            ),
            q: self.q,
            rq: self.rq,
        }
    }
}

/// A spectral mixture LMC model over a multi-channel dataset.
#[derive(Debug)]
pub struct SmLmc<'d, F: Float> {
    base: ModelBase<'d, F>,
    q: usize,
    rq: usize,
}

impl<'d, F: Float> SmLmc<'d, F> {
    /// Model parameters builder with `q` spectral components
    pub fn params(q: usize) -> SmLmcParams<F> {
        SmLmcParams::new(q)
    }

    /// Number of spectral components
    pub fn q(&self) -> usize {
        self.q
    }

    /// Number of latent functions per component
    pub fn rq(&self) -> usize {
        self.rq
    }

    /// The underlying model
    pub fn base(&self) -> &ModelBase<'d, F> {
        &self.base
    }

    /// The composed covariance function
    pub fn kernel(&self) -> &CovFunction<F> {
        self.base.kernel()
    }

    /// Estimate kernel hyperparameters from the dataset.
    ///
    /// With `method` `"BNSE"` the posterior spectral density of each channel
    /// is estimated nonparametrically and its Q strongest peaks initialize
    /// the components. With `"SM"` one independent spectral mixture kernel is
    /// fitted per channel (`sm_init` init scheme, `sm_method` optimizer,
    /// `sm_maxiter` iteration budget, `plot` spectral summary logging) and
    /// the fitted values initialize the components. With both methods the
    /// noise variance of channel i starts at Var(y_i) / 30.
    ///
    /// Components are written in order q = 0..Q-1, the noise block last; a
    /// failure mid-way leaves earlier components written and a retry simply
    /// overwrites everything.
    pub fn estimate_params(
        &mut self,
        method: &str,
        sm_init: &str,
        sm_method: &str,
        sm_maxiter: usize,
        plot: bool,
    ) -> Result<()> {
        match method {
            "BNSE" => {
                let peaks = self.base.dataset().bnse_estimation(self.q)?;
                self.apply_bnse_estimate(&peaks)?;
            }
            "SM" => {
                let init = sm_init.parse::<SmInit>()?;
                let optimizer = sm_method.parse::<SmMethod>()?;
                let components = estimate_from_sm(
                    self.base.dataset(),
                    self.q,
                    init,
                    optimizer,
                    sm_maxiter,
                    plot,
                )?;
                self.apply_sm_estimate(&components)?;
            }
            _ => {
                return Err(MogpError::InvalidValueError(format!(
                    "possible methods are either 'BNSE' or 'SM', got '{method}'"
                )))
            }
        }
        self.estimate_noise()
    }

    /// Write component parameters from spectral density peaks: per component,
    /// the mixing weight of each channel is its dimension-averaged peak
    /// magnitude rescaled by `sqrt(C / mean(C))`, the frequency center the
    /// channel-averaged peak frequency in angular units, the width twice the
    /// channel-averaged peak variance.
    fn apply_bnse_estimate(&mut self, peaks: &PsdPeaks<F>) -> Result<()> {
        let input_dims = self.base.dataset().input_dims();
        let output_dims = self.base.dataset().output_dims();
        let two_pi = F::cast(2.) * F::cast(std::f64::consts::PI);
        for qi in 0..self.q {
            let mut constant = Array2::zeros((input_dims, output_dims));
            for channel in 0..output_dims {
                let amplitude = peaks.amplitudes.slice(s![channel, .., qi]).mean().unwrap();
                constant.column_mut(channel).fill(amplitude);
            }
            let global_mean = constant.mean().unwrap();
            let constant = (constant / global_mean).mapv(F::sqrt);
            let mean = peaks
                .means
                .slice(s![.., .., qi])
                .mean_axis(Axis(0))
                .unwrap()
                .mapv(|v| v * two_pi);
            let scale = peaks
                .variances
                .slice(s![.., .., qi])
                .mean_axis(Axis(0))
                .unwrap()
                .mapv(|v| v * F::cast(2.));

            let block = self.base.spectral_block_mut(qi)?;
            block.set_constant(constant)?;
            block.set_mean(mean)?;
            block.set_scale(scale)?;
        }
        Ok(())
    }

    /// Write component parameters from independent per-channel fits: per
    /// component, the per-channel weights averaged over the input-dimension
    /// axis as a (Rq, channels) mixing matrix, the fitted frequency centers
    /// and twice the fitted widths averaged over the input-dimension axis.
    fn apply_sm_estimate(&mut self, components: &[SmComponent<F>]) -> Result<()> {
        for (qi, component) in components.iter().enumerate() {
            let channels = component.weight.nrows();
            let constant = component
                .weight
                .mean_axis(Axis(1))
                .unwrap()
                .into_shape((self.rq, channels))
                .unwrap();
            let mean = component.mean.mean_axis(Axis(1)).unwrap();
            let scale = component
                .scale
                .mean_axis(Axis(1))
                .unwrap()
                .mapv(|v| v * F::cast(2.));

            let block = self.base.spectral_block_mut(qi)?;
            block.set_constant(constant)?;
            block.set_mean(mean)?;
            block.set_scale(scale)?;
        }
        Ok(())
    }

    /// Initialize each channel's noise variance to 1/30 of its observed
    /// output variance.
    fn estimate_noise(&mut self) -> Result<()> {
        let divisor = F::cast(NOISE_VARIANCE_DIVISOR);
        let noise = self
            .base
            .dataset()
            .iter()
            .map(|channel| channel.variance() / divisor)
            .collect::<Array1<F>>();
        self.base.noise_block_mut(self.q)?.set_noise(noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Channel;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    fn two_channel_dataset(n: usize) -> DataSet<f64> {
        let channels = [0.4, 0.7]
            .iter()
            .enumerate()
            .map(|(i, freq)| {
                let x = Array::linspace(0., 10., n).insert_axis(Axis(1));
                let y = x
                    .column(0)
                    .mapv(|v: f64| (2. * std::f64::consts::PI * freq * v).sin() + 0.1 * (i as f64));
                Channel::new(format!("ch{i}"), x, y).unwrap()
            })
            .collect();
        DataSet::new(channels).unwrap()
    }

    #[test]
    fn test_build_composes_q_blocks_plus_noise() {
        let dataset = two_channel_dataset(20);
        for q in 1..4 {
            let model = SmLmc::<f64>::params(q).build(&dataset).unwrap();
            assert_eq!(model.kernel().n_blocks(), q + 1);
            for qi in 0..q {
                let block = model.base().spectral_block(qi).unwrap();
                assert_eq!(block.constant().dim(), (1, 2));
                assert_eq!(block.mean().len(), 1);
                assert_eq!(block.scale().len(), 1);
            }
            let noise = model.base().noise_block(q).unwrap();
            assert_eq!(noise.noise().len(), 2);
        }
    }

    #[test]
    fn test_rq_must_be_one() {
        let dataset = two_channel_dataset(20);
        for rq in [0, 2, 5] {
            let result = SmLmc::<f64>::params(1).rq(rq).build(&dataset);
            assert!(matches!(result, Err(MogpError::InvalidValueError(_))));
        }
    }

    #[test]
    fn test_at_least_one_component() {
        let dataset = two_channel_dataset(20);
        assert!(SmLmc::<f64>::params(0).build(&dataset).is_err());
    }

    #[test]
    fn test_unknown_method_leaves_parameters_untouched() {
        let dataset = two_channel_dataset(20);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        let before = model.kernel().clone();
        let result = model.estimate_params("MAP", "BNSE", "COBYLA", 10, false);
        assert!(matches!(result, Err(MogpError::InvalidValueError(_))));
        assert_eq!(model.kernel(), &before);
    }

    #[test]
    fn test_unknown_sm_names_are_rejected() {
        let dataset = two_channel_dataset(20);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        assert!(model
            .estimate_params("SM", "fourier", "COBYLA", 10, false)
            .is_err());
        assert!(model
            .estimate_params("SM", "LS", "BFGS", 10, false)
            .is_err());
    }

    #[test]
    fn test_apply_bnse_estimate_arithmetic() {
        let dataset = two_channel_dataset(20);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        let mut peaks = PsdPeaks::<f64>::zeros(2, 1, 1);
        peaks.amplitudes[[0, 0, 0]] = 4.;
        peaks.amplitudes[[1, 0, 0]] = 1.;
        peaks.means[[0, 0, 0]] = 0.3;
        peaks.means[[1, 0, 0]] = 0.5;
        peaks.variances[[0, 0, 0]] = 0.01;
        peaks.variances[[1, 0, 0]] = 0.03;
        model.apply_bnse_estimate(&peaks).unwrap();

        let block = model.base().spectral_block(0).unwrap();
        // sqrt(amplitude / global mean): global mean = 2.5
        assert_abs_diff_eq!(block.constant()[[0, 0]], (4. / 2.5f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(block.constant()[[0, 1]], (1. / 2.5f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            block.mean()[0],
            0.4 * 2. * std::f64::consts::PI,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(block.scale()[0], 0.02 * 2., epsilon = 1e-12);
    }

    #[test]
    fn test_apply_sm_estimate_arithmetic() {
        let dataset = two_channel_dataset(20);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        let component = SmComponent {
            weight: array![[2.], [4.]],
            mean: array![[0.3], [0.5]],
            scale: array![[0.1], [0.2]],
        };
        model.apply_sm_estimate(&[component]).unwrap();

        let block = model.base().spectral_block(0).unwrap();
        assert_eq!(block.constant(), &array![[2., 4.]]);
        assert_eq!(block.mean(), &array![0.3, 0.5]);
        assert_abs_diff_eq!(block.scale()[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(block.scale()[1], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_is_channel_variance_over_30() {
        let dataset = two_channel_dataset(20);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        model.estimate_noise().unwrap();
        let noise = model.base().noise_block(1).unwrap().noise();
        for (i, channel) in dataset.iter().enumerate() {
            assert_abs_diff_eq!(noise[i], channel.variance() / 30., epsilon = 1e-12);
        }
    }

    #[test]
    fn test_estimate_params_bnse_end_to_end() {
        let dataset = two_channel_dataset(50);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        model
            .estimate_params("BNSE", "BNSE", "COBYLA", SM_DEFAULT_MAX_ITER, false)
            .unwrap();

        let block = model.base().spectral_block(0).unwrap();
        assert_eq!(block.constant().dim(), (1, 2));
        assert_eq!(block.mean().len(), 1);
        assert_eq!(block.scale().len(), 1);
        assert!(block.constant().iter().all(|v| v.is_finite()));
        assert!(block.mean().iter().all(|v| v.is_finite()));
        assert!(block.scale().iter().all(|v| v.is_finite()));
        let noise = model.base().noise_block(1).unwrap().noise();
        assert_eq!(noise.len(), 2);
        assert!(noise.iter().all(|v| v.is_finite() && *v > 0.));
    }

    #[test]
    fn test_estimate_params_is_idempotent() {
        let dataset = two_channel_dataset(30);
        let mut model = SmLmc::<f64>::params(1).build(&dataset).unwrap();
        model
            .estimate_params("BNSE", "BNSE", "COBYLA", 100, false)
            .unwrap();
        let first = model.kernel().clone();
        model
            .estimate_params("BNSE", "BNSE", "COBYLA", 100, false)
            .unwrap();
        assert_eq!(model.kernel(), &first);
    }
}
