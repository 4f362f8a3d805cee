//! # Sequential Quadratic Programming on the Simplex
//!
//! $$
//! \min_{w} f(w)\quad\text{s.t.}\quad \mathbf{1}^\top w = 1,\ 0 \le w \le 1
//! $$
//!
//! Each iteration solves
//!
//! $$
//! \min_{d}\ \nabla f(w)^\top d + \tfrac12 d^\top B d\quad\text{s.t.}\quad w + d \in \Delta
//! $$
//!
//! with the Clarabel interior-point solver, backtracks along `d` with the Armijo rule and
//! updates the quasi-Newton matrix `B` with Powell-damped BFGS. The outer loop is an argmin
//! [`Solver`] driven by an [`Executor`]. With a sum-to-one constraint and non-negative
//! weights the upper bound `w <= 1` is implied, so the feasible set is the probability
//! simplex.
//!
//! The objective is divided by `max(|f(w_0)|, |grad f(w_0)|_inf)` before solving, so every
//! tolerance is relative to the scale of the problem rather than to its units.

use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;
use clarabel::solver::DefaultSettings;
use clarabel::solver::DefaultSettingsBuilder;
use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use crate::error::PortfolioError;
use crate::error::Result;

/// Smallest line-search step before the iteration is declared stuck.
const MIN_STEP: f64 = 1e-12;
/// Curvature below which a BFGS update is skipped.
const CURVATURE_EPS: f64 = 1e-16;
/// Negative weights above this magnitude are solver noise and clipped to zero.
const CLEAN_EPS: f64 = 1e-12;
/// QP weights below this sit on their bound; interior-point iterates never reach it exactly.
const ACTIVE_EPS: f64 = 1e-9;

type SqpState = IterState<DVector<f64>, DVector<f64>, (), (), (), f64>;

/// Solver tolerances and limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SqpSettings {
  /// Outer iteration cap.
  pub max_iters: usize,
  /// Projected-gradient stationarity tolerance (sup norm) of the normalized objective.
  pub tol: f64,
  /// Relative objective change tolerance.
  pub ftol: f64,
  /// Step length tolerance (sup norm).
  pub xtol: f64,
  /// Iteration cap of the QP subproblem.
  pub qp_max_iters: usize,
  /// Duality-gap and feasibility tolerance of the QP subproblem.
  pub qp_tol: f64,
  /// Armijo sufficient-decrease constant.
  pub armijo: f64,
}

impl Default for SqpSettings {
  fn default() -> Self {
    Self {
      max_iters: 100,
      tol: 1e-8,
      ftol: 1e-12,
      xtol: 1e-8,
      qp_max_iters: 200,
      qp_tol: 1e-10,
      armijo: 1e-4,
    }
  }
}

/// Converged solution of an SQP run.
#[derive(Clone, Debug, PartialEq)]
pub struct SqpSolution {
  pub weights: DVector<f64>,
  /// Objective at the solution, in the problem's own units.
  pub objective: f64,
  pub iterations: usize,
  /// `|P(w - grad) - w|_inf` of the normalized objective at the solution.
  pub stationarity: f64,
}

/// Euclidean projection onto `{x >= 0, sum x = 1}`.
pub fn project_simplex(v: &DVector<f64>) -> DVector<f64> {
  let mut u: Vec<f64> = v.iter().copied().collect();
  u.sort_by(|a, b| b.total_cmp(a));

  let mut cumsum = 0.0;
  let mut theta = 0.0;
  for (j, uj) in u.iter().enumerate() {
    cumsum += uj;
    let t = (cumsum - 1.0) / (j + 1) as f64;
    if uj - t > 0.0 {
      theta = t;
    }
  }

  v.map(|x| (x - theta).max(0.0))
}

fn stationarity(w: &DVector<f64>, grad: &DVector<f64>) -> f64 {
  (project_simplex(&(w - grad)) - w).amax()
}

/// Minimize `g'd + d'Bd/2` over `w + d` in the simplex.
///
/// Posed in `x = w + d` as `min x'Bx/2 + (g - Bw)'x` with `1'x = 1` and `x >= 0`. Errors
/// carry the Clarabel status.
fn solve_qp(
  w: &DVector<f64>,
  grad: &DVector<f64>,
  b: &DMatrix<f64>,
  settings: &DefaultSettings<f64>,
) -> std::result::Result<DVector<f64>, String> {
  use clarabel::algebra::*;
  use clarabel::solver::*;

  let n = w.len();
  let sym = (b + b.transpose()) * 0.5;

  // Upper triangle of B, column by column.
  let mut p_colptr = Vec::with_capacity(n + 1);
  let mut p_rowval = Vec::new();
  let mut p_nzval = Vec::new();
  p_colptr.push(0);
  for j in 0..n {
    for i in 0..=j {
      if sym[(i, j)] != 0.0 {
        p_rowval.push(i);
        p_nzval.push(sym[(i, j)]);
      }
    }
    p_colptr.push(p_nzval.len());
  }
  let p = CscMatrix::new(n, n, p_colptr, p_rowval, p_nzval);
  let q: Vec<f64> = (grad - &sym * w).iter().copied().collect();

  // Row 0: 1'x = 1. Rows 1..=n: -x <= 0.
  let mut a_colptr = Vec::with_capacity(n + 1);
  let mut a_rowval = Vec::with_capacity(2 * n);
  a_colptr.push(0);
  for j in 0..n {
    a_rowval.push(0);
    a_rowval.push(1 + j);
    a_colptr.push(a_rowval.len());
  }
  let a = CscMatrix::new(1 + n, n, a_colptr, a_rowval, [1.0, -1.0].repeat(n));
  let mut rhs = vec![1.0];
  rhs.resize(1 + n, 0.0);
  let cones = [ZeroConeT(1), NonnegativeConeT(n)];

  let mut solver = DefaultSolver::new(&p, &q, &a, &rhs, &cones, settings.clone())
    .map_err(|e| format!("QP subproblem rejected: {e:?}"))?;
  solver.solve();
  match solver.solution.status {
    SolverStatus::Solved | SolverStatus::AlmostSolved => {}
    status => return Err(format!("QP subproblem ended with status {status:?}")),
  }

  let x = DVector::from_iterator(
    n,
    solver
      .solution
      .x
      .iter()
      .map(|&v| if v < ACTIVE_EPS { 0.0 } else { v }),
  );
  Ok(project_simplex(&x) - w)
}

/// Powell-damped BFGS update of `b` in place. Returns `false` when the update is skipped.
fn damped_bfgs(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) -> bool {
  let bs = &*b * s;
  let sbs = s.dot(&bs);
  if sbs <= CURVATURE_EPS {
    return false;
  }

  let sy = s.dot(y);
  let theta = if sy >= 0.2 * sbs {
    1.0
  } else {
    0.8 * sbs / (sbs - sy)
  };
  let r = y * theta + &bs * (1.0 - theta);
  let sr = s.dot(&r);
  if sr <= CURVATURE_EPS {
    return false;
  }

  *b -= &bs * bs.transpose() / sbs;
  *b += &r * r.transpose() / sr;
  true
}

fn clean(w: &DVector<f64>) -> DVector<f64> {
  let clipped = w.map(|x| if x.abs() < CLEAN_EPS { 0.0 } else { x.clamp(0.0, 1.0) });
  let sum = clipped.sum();
  if sum > 0.0 { clipped / sum } else { clipped }
}

/// `problem / scale`; non-finite values are errors.
struct Normalized<'a, O> {
  inner: &'a O,
  scale: f64,
}

impl<O> CostFunction for Normalized<'_, O>
where
  O: CostFunction<Param = DVector<f64>, Output = f64>,
{
  type Param = DVector<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, Error> {
    let f = self.inner.cost(w)? / self.scale;
    if !f.is_finite() {
      return Err(anyhow::anyhow!("objective is not finite at {:?}", w.as_slice()));
    }
    Ok(f)
  }
}

impl<O> Gradient for Normalized<'_, O>
where
  O: Gradient<Param = DVector<f64>, Gradient = DVector<f64>>,
{
  type Param = DVector<f64>;
  type Gradient = DVector<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
    let g = self.inner.gradient(w)? / self.scale;
    if g.iter().any(|v| !v.is_finite()) {
      return Err(anyhow::anyhow!("gradient is not finite at {:?}", w.as_slice()));
    }
    Ok(g)
  }
}

/// `max(|f(w0)|, |grad f(w0)|_inf)`, or 1 for a flat objective.
fn objective_scale<O>(problem: &O, w0: &DVector<f64>) -> Result<f64>
where
  O: CostFunction<Param = DVector<f64>, Output = f64>
    + Gradient<Param = DVector<f64>, Gradient = DVector<f64>>,
{
  let f = problem
    .cost(w0)
    .map_err(|e| PortfolioError::degenerate(format!("objective failed: {e}")))?;
  let g = problem
    .gradient(w0)
    .map_err(|e| PortfolioError::degenerate(format!("gradient failed: {e}")))?;
  if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::degenerate(
      "objective is not finite at equal weights",
    ));
  }

  let scale = f.abs().max(g.amax());
  Ok(if scale > 0.0 { scale } else { 1.0 })
}

struct SimplexSqp {
  settings: SqpSettings,
  qp: DefaultSettings<f64>,
  hessian: DMatrix<f64>,
  first_update: bool,
  converged: bool,
}

impl SimplexSqp {
  /// Descent direction and its slope `g'd`. A non-descent direction resets `B` to the
  /// identity and is solved again.
  fn direction(
    &mut self,
    w: &DVector<f64>,
    g: &DVector<f64>,
  ) -> std::result::Result<(DVector<f64>, f64), String> {
    let d = solve_qp(w, g, &self.hessian, &self.qp)?;
    let slope = g.dot(&d);
    if slope < 0.0 {
      return Ok((d, slope));
    }

    let n = w.len();
    self.hessian = DMatrix::identity(n, n);
    self.first_update = true;
    let d = solve_qp(w, g, &self.hessian, &self.qp)?;
    let slope = g.dot(&d);
    Ok((d, slope))
  }
}

impl<O> Solver<O, SqpState> for SimplexSqp
where
  O: CostFunction<Param = DVector<f64>, Output = f64>
    + Gradient<Param = DVector<f64>, Gradient = DVector<f64>>,
{
  const NAME: &'static str = "SQP on the simplex";

  fn init(
    &mut self,
    problem: &mut Problem<O>,
    state: SqpState,
  ) -> std::result::Result<(SqpState, Option<KV>), Error> {
    let w = state
      .get_param()
      .cloned()
      .ok_or_else(|| anyhow::anyhow!("SQP needs a starting point"))?;
    let f = problem.cost(&w)?;
    let g = problem.gradient(&w)?;
    Ok((state.cost(f).gradient(g), None))
  }

  fn next_iter(
    &mut self,
    problem: &mut Problem<O>,
    state: SqpState,
  ) -> std::result::Result<(SqpState, Option<KV>), Error> {
    let (Some(w), Some(g)) = (state.get_param().cloned(), state.get_gradient().cloned()) else {
      return Err(anyhow::anyhow!("SQP state has no iterate"));
    };
    let f = state.get_cost();

    let (d, slope) = match self.direction(&w, &g) {
      Ok(found) => found,
      Err(reason) => {
        return Ok((state.terminate_with(TerminationReason::SolverExit(reason)), None));
      }
    };
    if -slope <= self.settings.ftol * (1.0 + f.abs()) {
      self.converged = true;
      return Ok((state, None));
    }

    let mut alpha = 1.0;
    let (w_next, f_next) = loop {
      let trial = project_simplex(&(&w + &d * alpha));
      match problem.cost(&trial) {
        Ok(ft) if ft <= f + self.settings.armijo * alpha * slope => break (trial, ft),
        _ => {}
      }
      alpha *= 0.5;
      if alpha < MIN_STEP {
        let reason = "line search failed to decrease the objective".to_string();
        return Ok((state.terminate_with(TerminationReason::SolverExit(reason)), None));
      }
    };

    let g_next = problem.gradient(&w_next)?;
    let s = &w_next - &w;
    let y = &g_next - &g;

    if self.first_update {
      let sy = s.dot(&y);
      if sy > CURVATURE_EPS {
        let n = w.len();
        self.hessian = DMatrix::identity(n, n) * (y.norm_squared() / sy);
      }
    }
    if damped_bfgs(&mut self.hessian, &s, &y) {
      self.first_update = false;
    }

    let step = s.amax();
    if (f - f_next).abs() <= self.settings.ftol * (1.0 + f.abs()) && step <= self.settings.xtol {
      self.converged = true;
    }
    trace!(iter = state.get_iter(), f = f_next, alpha, step, "sqp step");

    Ok((state.param(w_next).cost(f_next).gradient(g_next), None))
  }

  fn terminate(&mut self, state: &SqpState) -> TerminationStatus {
    if self.converged {
      return TerminationStatus::Terminated(TerminationReason::SolverConverged);
    }
    match (state.get_param(), state.get_gradient()) {
      (Some(w), Some(g)) if stationarity(w, g) <= self.settings.tol => {
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
      }
      _ => TerminationStatus::NotTerminated,
    }
  }
}

/// Minimize `problem` over the probability simplex, starting at equal weights.
///
/// Fails with [`PortfolioError::OptimizationDidNotConverge`] carrying the last feasible
/// iterate when the iteration cap is hit, a QP subproblem fails or the line search cannot
/// make progress.
pub fn minimize_on_simplex<O>(
  problem: &O,
  n: usize,
  settings: &SqpSettings,
) -> Result<SqpSolution>
where
  O: CostFunction<Param = DVector<f64>, Output = f64>
    + Gradient<Param = DVector<f64>, Gradient = DVector<f64>>,
{
  if n == 0 {
    return Err(PortfolioError::config("SQP needs at least one asset"));
  }
  if settings.max_iters == 0 || settings.qp_max_iters == 0 {
    return Err(PortfolioError::config("SQP iteration limits must be positive"));
  }
  let qp = DefaultSettingsBuilder::default()
    .max_iter(u32::try_from(settings.qp_max_iters).unwrap_or(u32::MAX))
    .tol_gap_abs(settings.qp_tol)
    .tol_gap_rel(settings.qp_tol)
    .tol_feas(settings.qp_tol)
    .verbose(false)
    .build()
    .map_err(|e| PortfolioError::config(format!("invalid QP settings: {e}")))?;

  let w0 = DVector::from_element(n, 1.0 / n as f64);
  let scale = objective_scale(problem, &w0)?;
  let solver = SimplexSqp {
    settings: *settings,
    qp,
    hessian: DMatrix::identity(n, n),
    first_update: true,
    converged: false,
  };

  let res = Executor::new(Normalized { inner: problem, scale }, solver)
    .configure(|state| state.param(w0).max_iters(settings.max_iters as u64))
    .run()
    .map_err(|e| PortfolioError::degenerate(format!("SQP failed: {e}")))?;

  let state = res.state();
  let iterations = state.get_iter() as usize;
  let w = state
    .get_param()
    .cloned()
    .ok_or_else(|| PortfolioError::degenerate("SQP finished without an iterate"))?;
  let kkt = state
    .get_gradient()
    .map_or(f64::INFINITY, |g| stationarity(&w, g));

  match state.get_termination_reason() {
    Some(TerminationReason::SolverConverged) => {
      let objective = state.get_cost() * scale;
      debug!(iterations, objective, stationarity = kkt, "sqp converged");
      Ok(SqpSolution {
        weights: clean(&w),
        objective,
        iterations,
        stationarity: kkt,
      })
    }
    Some(TerminationReason::SolverExit(reason)) => {
      Err(PortfolioError::OptimizationDidNotConverge {
        iterations,
        reason: reason.clone(),
        last_iterate: clean(&w).iter().copied().collect(),
      })
    }
    _ => Err(PortfolioError::OptimizationDidNotConverge {
      iterations,
      reason: format!("iteration limit reached with stationarity {kkt:e}"),
      last_iterate: clean(&w).iter().copied().collect(),
    }),
  }
}
