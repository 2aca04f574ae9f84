use crate::helpers::linalg::dot;
use crate::utils::general::clip_nonneg;

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Callback seam of the non-negative CG minimizer
///
/// The row solvers only ever talk to the minimizer through this trait,
/// so any conforming implementation can stand in for the one shipped
/// here without touching the optimizer.
pub trait NonNegObjective {
    /// Objective value at `x`.
    fn value(&self, x: &[f64]) -> f64;

    /// Gradient at `x`, written into `grad`.
    fn gradient(&self, x: &[f64], grad: &mut [f64]);
}

/// Settings of the non-negative CG minimizer
///
/// ### Fields
///
/// * `tol` - Convergence tolerance on the projected gradient norm.
/// * `max_iter` - Maximum number of CG iterations.
/// * `max_evals_per_iter` - Cap on objective evaluations per iteration.
/// * `ls_shrink` - Backtracking factor of the line search.
/// * `ls_sufficient_decrease` - Sufficient-decrease (Armijo) constant.
/// * `max_ls_steps` - Maximum number of line-search backtracking steps.
#[derive(Clone, Debug)]
pub struct CgSettings {
    pub tol: f64,
    pub max_iter: usize,
    pub max_evals_per_iter: usize,
    pub ls_shrink: f64,
    pub ls_sufficient_decrease: f64,
    pub max_ls_steps: usize,
}

impl CgSettings {
    /// Settings used inside the alternating loop
    ///
    /// ### Params
    ///
    /// * `npass` - Iteration cap, the per-matrix pass count of the run.
    pub fn half_iteration(npass: usize) -> Self {
        Self {
            tol: 1e-3,
            max_iter: npass,
            max_evals_per_iter: 100,
            ls_shrink: 0.25,
            ls_sufficient_decrease: 0.01,
            max_ls_steps: 20,
        }
    }

    /// Settings for refining one row in isolation
    pub fn single_row() -> Self {
        Self {
            tol: 1e-1,
            max_iter: 200,
            ..Self::half_iteration(0)
        }
    }
}

/// Result summary of one minimization
///
/// ### Fields
///
/// * `fun_val` - Objective value at the returned point.
/// * `iterations` - Number of CG iterations taken.
/// * `evaluations` - Total objective/gradient evaluations.
#[derive(Clone, Debug)]
pub struct CgOutcome {
    pub fun_val: f64,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Number of working vectors the minimizer draws from its scratch slice.
pub const CG_SCRATCH_VECTORS: usize = 4;

//////////////////
// CG internals //
//////////////////

// At the boundary a positive gradient component would push the iterate
// outside the orthant, so it is frozen out of the search direction and
// the convergence measure.
fn project_gradient(x: &[f64], grad: &mut [f64]) {
    for (g, &xi) in grad.iter_mut().zip(x) {
        if xi <= 0.0 && *g > 0.0 {
            *g = 0.0;
        }
    }
}

/// Projected nonlinear CG over the non-negative orthant
///
/// Polak-Ribiere+ search directions with an Armijo backtracking line
/// search; every trial point is projected onto the orthant before
/// evaluation and non-finite trial values count as line-search
/// failures. A failed line search falls back to steepest descent once
/// before giving up. All working memory comes from `scratch`
/// (`CG_SCRATCH_VECTORS` vectors of length k); the function allocates
/// nothing itself so it can run on a per-worker buffer.
///
/// The returned point is non-negative up to the projection; callers
/// that require strict clipping apply it afterwards.
///
/// ### Params
///
/// * `x` - Starting point, refined in place, length k.
/// * `objective` - Objective/gradient callbacks.
/// * `settings` - Tolerances and iteration caps.
/// * `scratch` - Working memory, at least `4 * k` doubles.
///
/// ### Returns
///
/// A `CgOutcome` with the final value and the work counters.
pub fn minimize_nonneg_cg<O: NonNegObjective>(
    x: &mut [f64],
    objective: &O,
    settings: &CgSettings,
    scratch: &mut [f64],
) -> CgOutcome {
    let k = x.len();
    debug_assert!(scratch.len() >= CG_SCRATCH_VECTORS * k);

    let (grad, rest) = scratch.split_at_mut(k);
    let (grad_prev, rest) = rest.split_at_mut(k);
    let (dir, rest) = rest.split_at_mut(k);
    let trial = &mut rest[..k];

    clip_nonneg(x);

    let mut evaluations = 0_usize;
    let mut fx = objective.value(x);
    evaluations += 1;
    objective.gradient(x, grad);
    evaluations += 1;
    project_gradient(x, grad);

    for (d, &g) in dir.iter_mut().zip(grad.iter()) {
        *d = -g;
    }
    let mut steepest = true;

    let mut iterations = 0_usize;
    while iterations < settings.max_iter {
        if dot(grad, grad).sqrt() <= settings.tol {
            break;
        }

        // backtracking line search along the projected direction
        let mut iter_evals = 0_usize;
        let mut alpha = 1.0_f64;
        let mut accepted = false;
        let mut ft = fx;

        for _ in 0..settings.max_ls_steps {
            for i in 0..k {
                trial[i] = (x[i] + alpha * dir[i]).max(0.0);
            }

            ft = objective.value(trial);
            evaluations += 1;
            iter_evals += 1;

            let mut decrease = 0.0;
            for i in 0..k {
                decrease += grad[i] * (trial[i] - x[i]);
            }

            if ft.is_finite()
                && decrease < 0.0
                && ft <= fx + settings.ls_sufficient_decrease * decrease
            {
                accepted = true;
                break;
            }

            alpha *= settings.ls_shrink;
            if iter_evals >= settings.max_evals_per_iter {
                break;
            }
        }

        if !accepted {
            if steepest {
                break;
            }
            // restart from steepest descent and retry
            for (d, &g) in dir.iter_mut().zip(grad.iter()) {
                *d = -g;
            }
            steepest = true;
            continue;
        }

        x.copy_from_slice(trial);
        fx = ft;

        grad_prev.copy_from_slice(grad);
        objective.gradient(x, grad);
        evaluations += 1;
        project_gradient(x, grad);

        let denom = dot(grad_prev, grad_prev);
        let mut beta = if denom > 0.0 {
            (dot(grad, grad) - dot(grad, grad_prev)) / denom
        } else {
            0.0
        };
        if beta < 0.0 {
            beta = 0.0;
        }

        for (d, &g) in dir.iter_mut().zip(grad.iter()) {
            *d = -g + beta * *d;
        }
        steepest = beta == 0.0;

        if dot(dir, grad) >= 0.0 {
            // not a descent direction, fall back to steepest descent
            for (d, &g) in dir.iter_mut().zip(grad.iter()) {
                *d = -g;
            }
            steepest = true;
        }

        iterations += 1;
    }

    CgOutcome {
        fun_val: fx,
        iterations,
        evaluations,
    }
}

///////////
// Tests //
///////////
