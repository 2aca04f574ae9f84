use rayon::prelude::*;

use crate::helpers::factorize::ScratchPool;
use crate::helpers::linalg::{axpy, dot, scale};
use crate::helpers::structs_sparse::SparseView;
use crate::utils::general::clip_nonneg;

//////////////////////
// Poisson gradient //
//////////////////////

/// Gradient of the Poisson log-likelihood term for one factor row
///
/// Writes `sum_i (x_i / <curr, F[idx_i]>) * F[idx_i]` into `grad`,
/// where the sum runs over the row's nonzero observations. The
/// regularization terms are handled separately by the proximal step.
///
/// ### Params
///
/// * `grad` - Output gradient of length k, overwritten.
/// * `curr` - The factor row being optimized, length k.
/// * `fixed` - The fixed counterpart factor matrix, row-major.
/// * `values` - Nonzero observed counts of this row.
/// * `indices` - Counterpart row indices aligned with `values`.
pub fn poisson_gradient(
    grad: &mut [f64],
    curr: &[f64],
    fixed: &[f64],
    values: &[f64],
    indices: &[usize],
) {
    let k = curr.len();
    grad.fill(0.0);

    for (&x, &idx) in values.iter().zip(indices) {
        let f_row = &fixed[idx * k..(idx + 1) * k];
        axpy(x / dot(curr, f_row), f_row, grad);
    }
}

////////////////////////////
// Proximal gradient step //
////////////////////////////

/// One half-iteration of proximal gradient updates
///
/// Updates every row of `a` against the fixed matrix `b`, in parallel
/// with one row per task. Written with the A matrix in mind; the B
/// update calls the same function with the roles of the two factor
/// matrices swapped and the data in column-compressed format.
///
/// Each row is updated `npass` times: an ascent step along the
/// likelihood gradient, the additive constant `cnst_sum` (which already
/// carries `-step_size * (colsum(b) + l1_reg)`), the closed-form
/// rescaling `cnst_div = 1 / (1 + 2 * l2_reg * step_size)`, and a clip
/// onto the non-negative orthant.
///
/// ### Params
///
/// * `a` - Row-major factor matrix being optimized, mutated in place.
/// * `b` - Fixed counterpart factor matrix, row-major.
/// * `x` - Sparse view of the counts with `a`'s rows as the outer axis.
/// * `k` - Number of latent factors.
/// * `cnst_div` - Proximal rescaling constant.
/// * `cnst_sum` - Pre-scaled additive proximal constant, length k.
/// * `step_size` - Current gradient step size.
/// * `npass` - Number of passes over each row.
/// * `scratch` - Per-worker scratch pool, at least k doubles per slot.
#[allow(clippy::too_many_arguments)]
pub fn pgd_iteration(
    a: &mut [f64],
    b: &[f64],
    x: &SparseView<'_>,
    k: usize,
    cnst_div: f64,
    cnst_sum: &[f64],
    step_size: f64,
    npass: usize,
    scratch: &ScratchPool,
) {
    a.par_chunks_mut(k)
        .enumerate()
        .for_each(|(ia, row)| {
            let (indices, values) = x.slice(ia);

            scratch.with(|buf| {
                let grad = &mut buf[..k];
                for _ in 0..npass {
                    poisson_gradient(grad, row, b, values, indices);
                    axpy(step_size, grad, row);
                    axpy(1.0, cnst_sum, row);
                    scale(cnst_div, row);
                    clip_nonneg(row);
                }
            });
        });
}

///////////
// Tests //
///////////
