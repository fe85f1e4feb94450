//! Base multi-output model plumbing: likelihood, composed covariance holder
//! and the scoped process-wide execution context.

use crate::dataset::DataSet;
use crate::errors::{MogpError, Result};
use crate::kernels::{CovFunction, KernelBlock, Noise, SpectralMixtureLmc};
use linfa::Float;
use ndarray::Array2;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Observation likelihood attached to a model. Inference itself is performed
/// by the downstream engine; the model records which likelihood and
/// parameters it should use.
#[derive(Clone, Debug, PartialEq)]
pub enum Likelihood<F: Float> {
    /// Exact Gaussian observation noise
    Gaussian {
        /// Likelihood variance
        variance: F,
    },
}

impl<F: Float> Default for Likelihood<F> {
    fn default() -> Self {
        Likelihood::Gaussian {
            variance: F::one(),
        }
    }
}

static EXEC_CONTEXT: Mutex<()> = Mutex::new(());

/// Process-wide execution context shared by all model assemblies.
pub struct ExecContext;

/// Guard over the execution context; the context is released when the guard
/// drops, on every exit path.
pub struct ContextGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl ExecContext {
    /// Acquire the context for the duration of the returned guard.
    pub fn acquire() -> ContextGuard<'static> {
        ContextGuard(EXEC_CONTEXT.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A multi-output model: a composed covariance function, a likelihood and
/// inference-mode flags over a borrowed dataset.
///
/// The dataset is read-only from the model's perspective; the covariance
/// blocks are the model's parameter store, written one block at a time
/// through the typed by-index accessors.
#[derive(Debug)]
pub struct ModelBase<'d, F: Float> {
    name: String,
    dataset: &'d DataSet<F>,
    kernel: CovFunction<F>,
    likelihood: Likelihood<F>,
    variational: bool,
    sparse: bool,
}

impl<'d, F: Float> ModelBase<'d, F> {
    /// Assemble a model from its composed covariance function, likelihood and
    /// inference-mode flags.
    pub fn new(
        name: String,
        dataset: &'d DataSet<F>,
        kernel: CovFunction<F>,
        likelihood: Likelihood<F>,
        variational: bool,
        sparse: bool,
    ) -> ModelBase<'d, F> {
        ModelBase {
            name,
            dataset,
            kernel,
            likelihood,
            variational,
            sparse,
        }
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dataset the model is built over
    pub fn dataset(&self) -> &'d DataSet<F> {
        self.dataset
    }

    /// The composed covariance function
    pub fn kernel(&self) -> &CovFunction<F> {
        &self.kernel
    }

    /// The observation likelihood
    pub fn likelihood(&self) -> &Likelihood<F> {
        &self.likelihood
    }

    /// Whether inference should run variationally rather than by sampling
    pub fn variational(&self) -> bool {
        self.variational
    }

    /// Whether inference should use a sparse approximation
    pub fn sparse(&self) -> bool {
        self.sparse
    }

    /// Full covariance matrix over the stacked inputs of all channels, in
    /// channel order, as handed to the downstream inference engine.
    pub fn covariance_matrix(&self) -> Array2<F> {
        let inputs: Vec<_> = self
            .dataset
            .iter()
            .enumerate()
            .map(|(i, channel)| (i, channel.x().to_owned()))
            .collect();
        self.kernel.covariance(&inputs)
    }

    /// Spectral component block at `idx`
    pub fn spectral_block(&self, idx: usize) -> Result<&SpectralMixtureLmc<F>> {
        match self.kernel.block(idx) {
            Some(KernelBlock::SpectralMixtureLmc(kernel)) => Ok(kernel),
            Some(_) => Err(MogpError::InvalidValueError(format!(
                "block {idx} is not a spectral component"
            ))),
            None => Err(MogpError::InvalidValueError(format!(
                "no covariance block at index {idx}"
            ))),
        }
    }

    /// Mutable spectral component block at `idx`
    pub fn spectral_block_mut(&mut self, idx: usize) -> Result<&mut SpectralMixtureLmc<F>> {
        match self.kernel.block_mut(idx) {
            Some(KernelBlock::SpectralMixtureLmc(kernel)) => Ok(kernel),
            Some(_) => Err(MogpError::InvalidValueError(format!(
                "block {idx} is not a spectral component"
            ))),
            None => Err(MogpError::InvalidValueError(format!(
                "no covariance block at index {idx}"
            ))),
        }
    }

    /// Noise block at its reserved index `idx`
    pub fn noise_block(&self, idx: usize) -> Result<&Noise<F>> {
        match self.kernel.block(idx) {
            Some(KernelBlock::Noise(kernel)) => Ok(kernel),
            Some(_) => Err(MogpError::InvalidValueError(format!(
                "block {idx} is not a noise block"
            ))),
            None => Err(MogpError::InvalidValueError(format!(
                "no covariance block at index {idx}"
            ))),
        }
    }

    /// Mutable noise block at its reserved index `idx`
    pub fn noise_block_mut(&mut self, idx: usize) -> Result<&mut Noise<F>> {
        match self.kernel.block_mut(idx) {
            Some(KernelBlock::Noise(kernel)) => Ok(kernel),
            Some(_) => Err(MogpError::InvalidValueError(format!(
                "block {idx} is not a noise block"
            ))),
            None => Err(MogpError::InvalidValueError(format!(
                "no covariance block at index {idx}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Channel;
    use ndarray::{array, Array};

    fn dataset() -> DataSet<f64> {
        let x = Array::linspace(0., 5., 10).insert_axis(ndarray::Axis(1));
        let y = x.column(0).mapv(|v: f64| v.sin());
        DataSet::new(vec![Channel::new("a", x, y).unwrap()]).unwrap()
    }

    #[test]
    fn test_context_guard_reentry() {
        {
            let _guard = ExecContext::acquire();
        }
        // released on drop: a second acquisition must not deadlock
        let _guard = ExecContext::acquire();
    }

    #[test]
    fn test_typed_block_access() {
        let data = dataset();
        let kernel = CovFunction::compose(vec![SpectralMixtureLmc::new(1, 1, 1)], Noise::new(1, 1));
        let mut model = ModelBase::new(
            "m".to_string(),
            &data,
            kernel,
            Likelihood::default(),
            false,
            false,
        );
        assert!(model.spectral_block(0).is_ok());
        assert!(model.spectral_block(1).is_err());
        assert!(model.noise_block(1).is_ok());
        assert!(model.noise_block(0).is_err());
        assert!(model.spectral_block_mut(2).is_err());

        model
            .noise_block_mut(1)
            .unwrap()
            .set_noise(array![0.5])
            .unwrap();
        assert_eq!(model.noise_block(1).unwrap().noise(), &array![0.5]);
    }

    #[test]
    fn test_covariance_matrix_over_dataset() {
        let data = dataset();
        let kernel = CovFunction::compose(vec![SpectralMixtureLmc::new(1, 1, 1)], Noise::new(1, 1));
        let model = ModelBase::new(
            "m".to_string(),
            &data,
            kernel,
            Likelihood::default(),
            false,
            false,
        );
        let cov = model.covariance_matrix();
        assert_eq!(cov.dim(), (10, 10));
        for i in 0..10 {
            for j in 0..10 {
                assert!((cov[[i, j]] - cov[[j, i]]).abs() < 1e-12);
            }
            // unit weights plus default noise on the diagonal
            assert!(cov[[i, i]] > 1.);
        }
    }

    #[test]
    fn test_default_likelihood_is_unit_gaussian() {
        assert_eq!(
            Likelihood::<f64>::default(),
            Likelihood::Gaussian { variance: 1.0 }
        );
    }
}
