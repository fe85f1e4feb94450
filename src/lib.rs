//! This library implements multi-output [Gaussian process](https://en.wikipedia.org/wiki/Gaussian_process)
//! modeling with spectral mixture kernels under a
//! [linear model of coregionalization](https://en.wikipedia.org/wiki/Multiple-output_Gaussian_process):
//! every channel of a dataset is expressed as a linear combination of shared
//! latent functions, each governed by one spectral mixture component.
//!
//! The non-convex likelihood of such models is notoriously prone to poor
//! local optima, so the library focuses on seeding their hyperparameters from
//! data before the downstream optimization:
//! * **BNSE** — the posterior spectral density of each channel is estimated
//!   nonparametrically ([Tobar 2018](https://proceedings.neurips.cc/paper/2018/hash/bf62768ca46b6c3b5bea9515d1a1fc45-Abstract.html));
//!   the strongest density peaks initialize the component magnitudes,
//!   frequency centers and widths.
//! * **SM** — one independent single-output spectral mixture kernel is fitted
//!   per channel by exact marginal likelihood and the fitted values are
//!   aggregated across channels.
//!
//! Models are assembled by [SmLmc] parameterized by [SmLmcParams].
//!
//! # Example
//!
//! ```no_run
//! use mogp::{Channel, DataSet, SmLmc};
//! use ndarray::{Array, Axis};
//!
//! let x = Array::linspace(0., 10., 50).insert_axis(Axis(1));
//! let y = x
//!     .column(0)
//!     .mapv(|v: f64| (2. * std::f64::consts::PI * 0.5 * v).sin());
//! let dataset = DataSet::new(vec![Channel::new("channel-0", x, y).unwrap()]).unwrap();
//!
//! let mut model = SmLmc::<f64>::params(2).build(&dataset).unwrap();
//! model
//!     .estimate_params("BNSE", "BNSE", "COBYLA", 2000, false)
//!     .unwrap();
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod bnse;
mod dataset;
mod errors;
pub mod kernels;
mod model;
mod sm;
mod sm_lmc;

mod optimization;
mod utils;

pub use bnse::{BnseEstimator, PsdPeaks, BNSE_FREQ_GRID_SIZE};
pub use dataset::{Channel, DataSet};
pub use errors::*;
pub use model::{ContextGuard, ExecContext, Likelihood, ModelBase};
pub use sm::{estimate_from_sm, SmComponent, SmInit, SmMethod};
pub use sm_lmc::{SmLmc, SmLmcParams, SmLmcValidParams, SM_DEFAULT_MAX_ITER};
pub use utils::DiffMatrix;
