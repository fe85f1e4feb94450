use crate::bnse::{BnseEstimator, PsdPeaks, BNSE_MAX_EVAL};
use crate::errors::{MogpError, Result};
use linfa::Float;
use ndarray::{s, Array1, Array2};

/// One observed output channel: input locations `x` (n, input_dims) and
/// output values `y` (n,).
#[derive(Clone, Debug)]
pub struct Channel<F: Float> {
    name: String,
    x: Array2<F>,
    y: Array1<F>,
}

impl<F: Float> Channel<F> {
    /// Create a channel; `x` rows and `y` entries must pair up.
    pub fn new(name: impl Into<String>, x: Array2<F>, y: Array1<F>) -> Result<Channel<F>> {
        let name = name.into();
        if x.nrows() == 0 {
            return Err(MogpError::InvalidValueError(format!(
                "channel {name} has no observations"
            )));
        }
        if x.nrows() != y.len() {
            return Err(MogpError::InvalidValueError(format!(
                "channel {} has {} input rows for {} outputs",
                name,
                x.nrows(),
                y.len()
            )));
        }
        Ok(Channel { name, x, y })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether the channel holds no observation
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Number of input dimensions
    pub fn input_dims(&self) -> usize {
        self.x.ncols()
    }

    /// Input locations
    pub fn x(&self) -> &Array2<F> {
        &self.x
    }

    /// Output values
    pub fn y(&self) -> &Array1<F> {
        &self.y
    }

    /// Population variance of the outputs (divisor n)
    pub fn variance(&self) -> F {
        let mean = self.y.mean().unwrap();
        self.y.mapv(|v| (v - mean) * (v - mean)).mean().unwrap()
    }
}

/// An ordered, non-empty collection of channels observed over a shared input
/// space. The number of output dimensions of a multi-output model over this
/// dataset equals the number of channels.
#[derive(Clone, Debug)]
pub struct DataSet<F: Float> {
    channels: Vec<Channel<F>>,
}

impl<F: Float> DataSet<F> {
    /// Create a dataset; at least one channel, all sharing the same input
    /// dimensionality.
    pub fn new(channels: Vec<Channel<F>>) -> Result<DataSet<F>> {
        let first = channels.first().ok_or_else(|| {
            MogpError::InvalidValueError("dataset should have at least one channel".to_string())
        })?;
        let input_dims = first.input_dims();
        if let Some(other) = channels.iter().find(|c| c.input_dims() != input_dims) {
            return Err(MogpError::InvalidValueError(format!(
                "channel {} has {} input dimensions, expected {}",
                other.name(),
                other.input_dims(),
                input_dims
            )));
        }
        Ok(DataSet { channels })
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// A dataset is never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over channels in order
    pub fn iter(&self) -> std::slice::Iter<'_, Channel<F>> {
        self.channels.iter()
    }

    /// Get channel at `idx`
    pub fn channel(&self, idx: usize) -> Option<&Channel<F>> {
        self.channels.get(idx)
    }

    /// Input dimensionality shared by all channels
    pub fn input_dims(&self) -> usize {
        self.channels[0].input_dims()
    }

    /// Output dimensionality of a joint model over this dataset
    pub fn output_dims(&self) -> usize {
        self.channels.len()
    }

    /// Estimate up to `q` power spectral density peaks per channel and input
    /// dimension through the nonparametric spectral estimator. Arrays are
    /// indexed (channel, input_dim, component).
    pub fn bnse_estimation(&self, q: usize) -> Result<PsdPeaks<F>> {
        let mut peaks = PsdPeaks::zeros(self.len(), self.input_dims(), q);
        for (m, channel) in self.channels.iter().enumerate() {
            for d in 0..self.input_dims() {
                let mut estimator =
                    BnseEstimator::new(channel.x().column(d).to_owned(), channel.y().to_owned())?;
                estimator.fit(BNSE_MAX_EVAL)?;
                let (amplitudes, means, variances) = estimator.peaks(q)?;
                peaks.amplitudes.slice_mut(s![m, d, ..]).assign(&amplitudes);
                peaks.means.slice_mut(s![m, d, ..]).assign(&means);
                peaks.variances.slice_mut(s![m, d, ..]).assign(&variances);
            }
        }
        Ok(peaks)
    }
}
