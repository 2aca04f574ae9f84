use rayon::prelude::*;

///////////////////////
// Vector primitives //
///////////////////////

// These run single-threaded on purpose: the row loops in `pgd` and `cg`
// already occupy the worker pool, so threading inside the primitives
// would only oversubscribe it.

/// Dot product of two contiguous vectors
///
/// ### Params
///
/// * `x` - First vector.
/// * `y` - Second vector, same length.
///
/// ### Returns
///
/// The inner product of the two vectors.
#[inline]
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Scaled vector addition, `y += a * x`
///
/// ### Params
///
/// * `a` - Scalar multiplier.
/// * `x` - Vector to add.
/// * `y` - Vector updated in place, same length as `x`.
#[inline]
pub fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

/// Scale a vector in place, `x *= a`
#[inline]
pub fn scale(a: f64, x: &mut [f64]) {
    for xi in x.iter_mut() {
        *xi *= a;
    }
}

/////////////////
// Column sums //
/////////////////

/// Column sums of a dense row-major matrix
///
/// Parallel reduction over row blocks. The output is fully overwritten
/// before accumulation, and the result only differs across thread counts
/// by floating-point reassociation.
///
/// ### Params
///
/// * `out` - Output slice of length `ncol`, overwritten with the sums.
/// * `m` - Row-major matrix data of length `nrow * ncol`.
/// * `nrow` - Number of rows.
/// * `ncol` - Number of columns.
pub fn sum_by_cols_into(out: &mut [f64], m: &[f64], nrow: usize, ncol: usize) {
    debug_assert_eq!(m.len(), nrow * ncol);
    debug_assert_eq!(out.len(), ncol);

    let sums = m
        .par_chunks(ncol)
        .fold(
            || vec![0.0_f64; ncol],
            |mut acc, row| {
                for (a, v) in acc.iter_mut().zip(row) {
                    *a += v;
                }
                acc
            },
        )
        .reduce(
            || vec![0.0_f64; ncol],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                a
            },
        );

    out.copy_from_slice(&sums);
}

///////////
// Tests //
///////////
