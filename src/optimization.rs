use egobox_doe::{Lhs, LhsKind, SamplingMethod};
use ndarray::{arr1, s};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use ndarray::{Array, Array1, Array2, Zip};

use linfa::Float;

/// Settings of the COBYLA optimizer used for hyperparameter fitting
pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Build multistart initial guesses on log10 scale: the caller's guess first,
/// then `n_start` points spread over the bounds with an LHS design.
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    param0: &Array1<F>,
    bounds: &[(F, F)],
) -> (Array2<F>, Vec<(F, F)>) {
    // Use log10 params as optimization parameters
    let bounds: Vec<(F, F)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut param0s = Array2::zeros((n_start + 1, param0.len()));
    param0s.row_mut(0).assign(&param0.mapv(|v| F::log10(v)));

    match n_start.cmp(&1) {
        std::cmp::Ordering::Equal => {
            let mut rng = Xoshiro256Plus::seed_from_u64(42);
            let vals = bounds.iter().map(|(a, b)| rng.gen_range(*a..*b)).collect();
            param0s.row_mut(1).assign(&Array::from_vec(vals))
        }
        std::cmp::Ordering::Greater => {
            let mut xlimits: Array2<F> = Array2::zeros((bounds.len(), 2));
            Zip::from(xlimits.rows_mut())
                .and(&bounds)
                .for_each(|mut row, limits| row.assign(&arr1(&[limits.0, limits.1])));
            // Keep a seed here: the sampling only spreads init values over
            // [lower bound, upper bound] for multistart.
            let seeds = Lhs::new(&xlimits)
                .kind(LhsKind::Maximin)
                .with_rng(Xoshiro256Plus::seed_from_u64(42))
                .sample(n_start);
            Zip::from(param0s.slice_mut(s![1.., ..]).rows_mut())
                .and(seeds.rows())
                .par_for_each(|mut param, row| param.assign(&row));
        }
        std::cmp::Ordering::Less => (),
    };
    (param0s, bounds)
}

/// Optimize hyperparameters given an initial guess and bounds with cobyla
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    use cobyla::{minimize, Func, RhoBeg, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.map(|v| into_f64(v)).into_raw_vec();

    let bounds: Vec<_> = bounds
        .iter()
        .map(|(lo, up)| (into_f64(lo), into_f64(up)))
        .collect();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        &bounds,
        &cons,
        (),
        cobyla.maxeval,
        RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let params_opt = arr1(&x_opt);
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, params_opt)
        }
        Err((status, x_opt, _)) => {
            log::warn!("ERROR Cobyla optimizer in hyperparameter fit status={status:?}");
            (f64::INFINITY, arr1(&x_opt))
        }
    }
}

#[inline(always)]
pub(crate) fn into_f64<F: Float>(v: &F) -> f64 {
    unsafe { *(v as *const F as *const f64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_prepare_multistart_keeps_first_guess() {
        let param0 = array![0.1];
        let (inits, bounds) = prepare_multistart(3, &param0, &[(1e-3, 1e2)]);
        assert_eq!(inits.dim(), (4, 1));
        assert_abs_diff_eq!(inits[[0, 0]], -1., epsilon = 1e-12);
        for row in inits.slice(s![1.., ..]).rows() {
            assert!(row[0] >= bounds[0].0 && row[0] <= bounds[0].1);
        }
    }

    #[test]
    fn test_optimize_params_quadratic() {
        // minimum of (x - 1)^2 within bounds
        let objfn = |x: &[f64], _g: Option<&mut [f64]>, _p: &mut ()| (x[0] - 1.).powi(2);
        let (fval, xopt) = optimize_params(
            objfn,
            &array![0.,],
            &[(-2., 2.)],
            CobylaParams {
                maxeval: 100,
                ..CobylaParams::default()
            },
        );
        assert_abs_diff_eq!(xopt[0], 1., epsilon = 1e-2);
        assert!(fval < 1e-3);
    }
}
