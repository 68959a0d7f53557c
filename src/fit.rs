//! Bounded nonlinear least squares on top of `levenberg_marquardt`.
//!
//! Box constraints are handled by a sine reparameterisation: the solver works on
//! an unbounded internal vector `u` and every evaluation sees
//! `x = lo + (sin(u) + 1) · (hi - lo) / 2`, which never leaves `[lo, hi]`.

use crate::error::{Error, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, storage::Owned};
use tracing::debug;

/// A least-squares objective in external (physical) parameters.
pub trait Problem {
    fn residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>>;

    /// Jacobian of the residuals. Defaults to central differences.
    fn jacobian(&self, x: &DVector<f64>) -> Option<DMatrix<f64>> {
        central_difference(|x| self.residuals(x), x)
    }
}

/// Central-difference Jacobian of `f` at `x`.
pub fn central_difference<F>(f: F, x: &DVector<f64>) -> Option<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    let step_scale = f64::EPSILON.cbrt();
    let mut columns = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let h = step_scale * x[i].abs().max(1.0);
        let mut forward = x.clone();
        let mut backward = x.clone();
        forward[i] += h;
        backward[i] -= h;
        columns.push((f(&forward)? - f(&backward)?) / (2.0 * h));
    }
    Some(DMatrix::from_columns(&columns))
}

/// Admissible range of one parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bound {
    Free,
    Box { lo: f64, hi: f64 },
}

impl Bound {
    pub fn new(lo: f64, hi: f64) -> Result<Self> {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::InvalidInput(format!(
                "expected finite bounds with lo < hi but got: [{lo}, {hi}]"
            )));
        }
        Ok(Bound::Box { lo, hi })
    }

    pub fn contains(&self, x: f64) -> bool {
        match *self {
            Bound::Free => x.is_finite(),
            Bound::Box { lo, hi } => (lo..=hi).contains(&x),
        }
    }

    fn to_internal(self, x: f64) -> f64 {
        match self {
            Bound::Free => x,
            Bound::Box { lo, hi } => {
                // The transform is flat at the bounds; start slightly inside.
                let margin = 1e-3 * (hi - lo);
                let x = x.clamp(lo + margin, hi - margin);
                (2.0 * (x - lo) / (hi - lo) - 1.0).asin()
            }
        }
    }

    fn to_external(self, u: f64) -> f64 {
        match self {
            Bound::Free => u,
            Bound::Box { lo, hi } => lo + (u.sin() + 1.0) * (hi - lo) / 2.0,
        }
    }

    fn derivative(self, u: f64) -> f64 {
        match self {
            Bound::Free => 1.0,
            Bound::Box { lo, hi } => u.cos() * (hi - lo) / 2.0,
        }
    }
}

/// Solver tolerances and the evaluation budget.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// The solver gives up after `patience * (n + 1)` evaluations.
    pub patience: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.0,
            patience: 200,
        }
    }
}

/// A converged fit.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub x: DVector<f64>,
    pub residuals: DVector<f64>,
    /// Half the sum of squared residuals.
    pub cost: f64,
    pub evaluations: usize,
}

impl Solution {
    pub fn rms(&self) -> f64 {
        if self.residuals.is_empty() {
            return 0.0;
        }
        (self.residuals.norm_squared() / self.residuals.len() as f64).sqrt()
    }
}

struct Bounded<'a, P: Problem> {
    problem: &'a P,
    bounds: &'a [Bound],
    internal: DVector<f64>,
    external: DVector<f64>,
}

impl<P: Problem> Bounded<'_, P> {
    fn external_of(&self, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            u.len(),
            u.iter().zip(self.bounds).map(|(u, b)| b.to_external(*u)),
        )
    }
}

impl<P: Problem> LeastSquaresProblem<f64, Dyn, Dyn> for Bounded<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.internal.clone_from(u);
        self.external = self.external_of(u);
    }

    fn params(&self) -> DVector<f64> {
        self.internal.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.problem.residuals(&self.external)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = self.problem.jacobian(&self.external)?;
        for (j, (u, bound)) in self.internal.iter().zip(self.bounds).enumerate() {
            jacobian.column_mut(j).scale_mut(bound.derivative(*u));
        }
        Some(jacobian)
    }
}

/// Minimise `problem` from `x0` with each parameter kept inside its bound.
///
/// `what` names the fit in errors and logs. Any termination other than
/// convergence is reported as [`Error::FitFailed`].
pub fn solve<P: Problem>(
    what: &'static str,
    problem: &P,
    x0: &DVector<f64>,
    bounds: &[Bound],
    opts: &SolveOptions,
) -> Result<Solution> {
    if bounds.len() != x0.len() {
        return Err(Error::InvalidInput(format!(
            "{what}: {} bounds for {} parameters",
            bounds.len(),
            x0.len()
        )));
    }

    let internal = DVector::from_iterator(
        x0.len(),
        x0.iter().zip(bounds).map(|(x, b)| b.to_internal(*x)),
    );
    let mut wrapper = Bounded {
        problem,
        bounds,
        internal: internal.clone(),
        external: x0.clone(),
    };
    wrapper.set_params(&internal);

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.patience.max(1));
    let (wrapper, report) = lm.minimize(wrapper);

    debug!(
        what,
        evaluations = report.number_of_evaluations,
        cost = report.objective_function,
        termination = ?report.termination,
        "least squares finished"
    );

    if !report.termination.was_successful() {
        return Err(Error::FitFailed {
            what,
            reason: format!("{:?}", report.termination),
            evaluations: report.number_of_evaluations,
        });
    }

    let x = wrapper.external;
    let residuals = problem
        .residuals(&x)
        .filter(|r| r.iter().all(|v| v.is_finite()))
        .ok_or_else(|| Error::FitFailed {
            what,
            reason: "residuals are not finite at the solution".into(),
            evaluations: report.number_of_evaluations,
        })?;

    Ok(Solution {
        cost: residuals.norm_squared() / 2.0,
        x,
        residuals,
        evaluations: report.number_of_evaluations,
    })
}
