use rayon::prelude::*;

use crate::helpers::factorize::ScratchPool;
use crate::helpers::linalg::{axpy, dot};
use crate::helpers::minimize::{
    minimize_nonneg_cg, CgOutcome, CgSettings, NonNegObjective, CG_SCRATCH_VECTORS,
};
use crate::helpers::structs_sparse::SparseView;
use crate::utils::general::clip_nonneg;

///////////////////////
// Poisson objective //
///////////////////////

/// Combined Poisson objective for one factor row
///
/// Regularized negative log-likelihood of the row's observations given
/// the fixed counterpart matrix, used as the callback data of the CG
/// minimizer.
///
/// ### Fields
///
/// * `fixed` - Fixed counterpart factor matrix, row-major.
/// * `fixed_sums` - Column sums of `fixed`, with the L1 penalty already
///   folded in, length k.
/// * `values` - Nonzero observed counts of this row.
/// * `indices` - Counterpart row indices aligned with `values`.
/// * `l2_reg` - L2 regularization strength.
pub struct PoissonObjective<'a> {
    pub fixed: &'a [f64],
    pub fixed_sums: &'a [f64],
    pub values: &'a [f64],
    pub indices: &'a [usize],
    pub l2_reg: f64,
}

impl NonNegObjective for PoissonObjective<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        let k = x.len();
        let mut out = dot(self.fixed_sums, x) + self.l2_reg * dot(x, x);

        for (&xi, &idx) in self.values.iter().zip(self.indices) {
            let pred = dot(x, &self.fixed[idx * k..(idx + 1) * k]);
            out -= xi * pred.ln();
        }

        out
    }

    fn gradient(&self, x: &[f64], grad: &mut [f64]) {
        let k = x.len();
        grad.copy_from_slice(self.fixed_sums);

        // the penalty term is deliberately scaled by the dimension on
        // top of 2 * l2, while the objective uses plain l2 * ||x||^2;
        // see the open questions in DESIGN.md before touching this
        axpy(2.0 * k as f64 * self.l2_reg, x, grad);

        for (&xi, &idx) in self.values.iter().zip(self.indices) {
            let f_row = &self.fixed[idx * k..(idx + 1) * k];
            axpy(-xi / dot(x, f_row), f_row, grad);
        }
    }
}

//////////////////
// CG iteration //
//////////////////

/// One half-iteration of conjugate-gradient updates
///
/// Runs the bounded non-negative CG minimizer on every row of `a`
/// against the fixed matrix `b`, in parallel with one row per task.
/// Like the proximal variant, the B update is this same function with
/// the factor roles swapped and the column-compressed view passed in.
/// The minimizer does not itself enforce non-negativity, so every row
/// is clipped after it returns.
///
/// ### Params
///
/// * `a` - Row-major factor matrix being optimized, mutated in place.
/// * `b` - Fixed counterpart factor matrix, row-major.
/// * `x` - Sparse view of the counts with `a`'s rows as the outer axis.
/// * `k` - Number of latent factors.
/// * `b_sum` - Column sums of `b` plus the L1 penalty, length k.
/// * `npass` - CG iteration cap per row.
/// * `l2_reg` - L2 regularization strength.
/// * `scratch` - Per-worker scratch pool, at least `4 * k` doubles.
#[allow(clippy::too_many_arguments)]
pub fn cg_iteration(
    a: &mut [f64],
    b: &[f64],
    x: &SparseView<'_>,
    k: usize,
    b_sum: &[f64],
    npass: usize,
    l2_reg: f64,
    scratch: &ScratchPool,
) {
    let settings = CgSettings::half_iteration(npass);

    a.par_chunks_mut(k)
        .enumerate()
        .for_each(|(ia, row)| {
            let (indices, values) = x.slice(ia);
            let objective = PoissonObjective {
                fixed: b,
                fixed_sums: b_sum,
                values,
                indices,
                l2_reg,
            };

            scratch.with(|buf| {
                minimize_nonneg_cg(row, &objective, &settings, &mut buf[..CG_SCRATCH_VECTORS * k]);
            });
            clip_nonneg(row);
        });
}

/// Refine a single factor row in isolation
///
/// Looser tolerance and a generous iteration budget, for callers that
/// want one row's factors against an already-fitted counterpart matrix
/// outside a full alternating run.
///
/// ### Params
///
/// * `curr` - The factor row, refined in place, length k.
/// * `values` - Nonzero observed counts of the row.
/// * `indices` - Counterpart row indices aligned with `values`.
/// * `fixed` - Fitted counterpart factor matrix, row-major.
/// * `fixed_sums` - Column sums of `fixed` plus the L1 penalty.
/// * `l2_reg` - L2 regularization strength.
///
/// ### Returns
///
/// The `CgOutcome` of the underlying minimization.
pub fn optimize_single_row(
    curr: &mut [f64],
    values: &[f64],
    indices: &[usize],
    fixed: &[f64],
    fixed_sums: &[f64],
    l2_reg: f64,
) -> CgOutcome {
    let k = curr.len();
    let mut buffer = vec![0.0_f64; CG_SCRATCH_VECTORS * k];
    let objective = PoissonObjective {
        fixed,
        fixed_sums,
        values,
        indices,
        l2_reg,
    };

    let outcome = minimize_nonneg_cg(curr, &objective, &CgSettings::single_row(), &mut buffer);
    clip_nonneg(curr);

    outcome
}

///////////
// Tests //
///////////
