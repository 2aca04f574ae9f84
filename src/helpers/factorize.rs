use log::{debug, error};
use rand::prelude::*;
use rand_distr::{Distribution, Gamma};
use std::cell::RefCell;
use std::fmt;
use thread_local::ThreadLocal;

use crate::helpers::cg::cg_iteration;
use crate::helpers::linalg::{scale, sum_by_cols_into};
use crate::helpers::minimize::CG_SCRATCH_VECTORS;
use crate::helpers::pgd::pgd_iteration;
use crate::helpers::structs_sparse::{CscMatrix, CsrMatrix};

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Run failure of the factorization
///
/// The only runtime failure the optimizer itself can produce is running
/// out of memory for its working buffers; everything else is a caller
/// precondition. On error the factor matrices are left exactly as they
/// were passed in.
#[derive(Debug)]
pub enum FactorError {
    /// Scratch buffer or regularization vector allocation failed.
    Allocation,
    /// The dedicated worker pool could not be built.
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for FactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorError::Allocation => {
                write!(f, "could not allocate working memory for the factorization")
            }
            FactorError::ThreadPool(e) => write!(f, "could not build the worker pool: {}", e),
        }
    }
}

impl std::error::Error for FactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FactorError::Allocation => None,
            FactorError::ThreadPool(e) => Some(e),
        }
    }
}

/// Configuration of one factorization run
///
/// ### Fields
///
/// * `l2_reg` - L2 regularization strength for both factor matrices.
/// * `l1_reg` - L1 regularization strength for both factor matrices.
/// * `use_cg` - Use the conjugate-gradient solver instead of proximal
///   gradient.
/// * `step_size` - Initial PGD step size, halved after every outer
///   iteration (ignored by the CG solver).
/// * `numiter` - Number of outer iterations, always run to completion.
/// * `npass` - Updates per matrix within one half-iteration (PGD passes
///   per row, or the CG iteration cap).
/// * `num_threads` - Size of the dedicated worker pool.
#[derive(Clone, Debug)]
pub struct FactorizationParams {
    pub l2_reg: f64,
    pub l1_reg: f64,
    pub use_cg: bool,
    pub step_size: f64,
    pub numiter: usize,
    pub npass: usize,
    pub num_threads: usize,
}

//////////////////
// Scratch pool //
//////////////////

/// Pool of per-worker scratch buffers
///
/// One buffer per worker thread, allocated up front for the whole run
/// and reused across every row and every outer iteration; the row tasks
/// of one half-iteration never share a buffer because each worker only
/// ever touches its own slot. Scoped to the run and dropped with it on
/// every exit path, rather than living in ambient thread-local storage.
pub struct ScratchPool {
    slots: ThreadLocal<RefCell<Vec<f64>>>,
    len: usize,
}

impl ScratchPool {
    /// Create an empty pool handing out buffers of `len` doubles.
    pub fn new(len: usize) -> Self {
        Self {
            slots: ThreadLocal::new(),
            len,
        }
    }

    /// Pre-allocate one buffer on every thread of the worker pool
    ///
    /// Mirrors the fact that each worker allocates its own buffer:
    /// failures are collected across all workers first, and only then
    /// turned into a single error, so a run either starts with every
    /// buffer in place or not at all.
    ///
    /// ### Params
    ///
    /// * `pool` - The worker pool whose threads get a buffer each.
    pub fn reserve_on_workers(&self, pool: &rayon::ThreadPool) -> Result<(), FactorError> {
        let allocated: Vec<bool> = pool.broadcast(|_| {
            let cell = self.slots.get_or(|| RefCell::new(Vec::new()));
            let mut buffer = cell.borrow_mut();
            if buffer.try_reserve_exact(self.len).is_err() {
                return false;
            }
            buffer.resize(self.len, 0.0);
            true
        });

        if allocated.iter().all(|&ok| ok) {
            Ok(())
        } else {
            Err(FactorError::Allocation)
        }
    }

    /// Run a closure on the calling worker's buffer
    ///
    /// Falls back to a lazy allocation when the calling thread was
    /// never pre-warmed (tasks outside a dedicated pool).
    pub fn with<R>(&self, f: impl FnOnce(&mut [f64]) -> R) -> R {
        let cell = self.slots.get_or(|| RefCell::new(Vec::new()));
        let mut buffer = cell.borrow_mut();
        if buffer.len() < self.len {
            buffer.resize(self.len, 0.0);
        }
        f(&mut buffer[..self.len])
    }
}

//////////////////////
// Alternating loop //
//////////////////////

/// Alternating Poisson factorization of a sparse count matrix
///
/// Runs exactly `numiter` outer iterations, each alternating a
/// full-matrix update of A given B (over the row-compressed view) and
/// of B given A (over the column-compressed view); there is no
/// convergence detection, higher-level stopping policy belongs to the
/// caller. Both factor matrices are optimized in place and stay
/// non-negative after every update.
///
/// Within a half-iteration the counterpart matrix is read-only and each
/// row of the matrix being updated is owned by exactly one task, so the
/// row updates run lock-free on a dedicated pool of `num_threads`
/// workers; the blocking row-parallel calls double as the barrier the
/// next column-sum reduction needs.
///
/// The caller owns all preconditions on the input: the two sparse views
/// must encode the same logical matrix with in-bounds indices and
/// non-negative values, and `a`/`b` must have `xr.nrow * k` and
/// `xr.ncol * k` entries. No validation is performed here.
///
/// ### Params
///
/// * `a` - Row-major factor matrix A (dimA x k), mutated in place.
/// * `b` - Row-major factor matrix B (dimB x k), mutated in place.
/// * `k` - Number of latent factors.
/// * `xr` - The counts in row-compressed format.
/// * `xc` - The same counts in column-compressed format.
/// * `params` - Run configuration.
///
/// ### Returns
///
/// `Ok(())` after all iterations, or a `FactorError` if the working
/// memory could not be allocated, in which case no optimization has
/// taken place and `a`/`b` are untouched.
pub fn run_factorization(
    a: &mut [f64],
    b: &mut [f64],
    k: usize,
    xr: &CsrMatrix,
    xc: &CscMatrix,
    params: &FactorizationParams,
) -> Result<(), FactorError> {
    let dim_a = xr.nrow;
    let dim_b = xr.ncol;
    debug_assert_eq!(a.len(), dim_a * k);
    debug_assert_eq!(b.len(), dim_b * k);
    debug_assert_eq!(xc.nrow, dim_a);
    debug_assert_eq!(xc.ncol, dim_b);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.num_threads)
        .build()
        .map_err(FactorError::ThreadPool)?;

    let buffer_len = if params.use_cg {
        CG_SCRATCH_VECTORS * k
    } else {
        k
    };
    let scratch = ScratchPool::new(buffer_len);

    let mut cnst_sum: Vec<f64> = Vec::new();
    if cnst_sum.try_reserve_exact(k).is_err() {
        error!("could not allocate the regularization constant vector");
        return Err(FactorError::Allocation);
    }
    cnst_sum.resize(k, 0.0);

    if let Err(e) = scratch.reserve_on_workers(&pool) {
        error!("could not allocate the per-worker scratch buffers");
        return Err(e);
    }

    let mut step_size = params.step_size;

    pool.install(|| {
        for iter in 0..params.numiter {
            let cnst_div = 1.0 / (1.0 + 2.0 * params.l2_reg * step_size);

            // update A against B over the row-compressed view
            sum_by_cols_into(&mut cnst_sum, b, dim_b, k);
            if params.l1_reg > 0.0 {
                for c in cnst_sum.iter_mut() {
                    *c += params.l1_reg;
                }
            }

            if params.use_cg {
                cg_iteration(
                    a,
                    b,
                    &xr.rows(),
                    k,
                    &cnst_sum,
                    params.npass,
                    params.l2_reg,
                    &scratch,
                );
            } else {
                scale(-step_size, &mut cnst_sum);
                pgd_iteration(
                    a,
                    b,
                    &xr.rows(),
                    k,
                    cnst_div,
                    &cnst_sum,
                    step_size,
                    params.npass,
                    &scratch,
                );
            }

            // same procedure for B over the column-compressed view
            sum_by_cols_into(&mut cnst_sum, a, dim_a, k);
            if params.l1_reg > 0.0 {
                for c in cnst_sum.iter_mut() {
                    *c += params.l1_reg;
                }
            }

            if params.use_cg {
                cg_iteration(
                    b,
                    a,
                    &xc.cols(),
                    k,
                    &cnst_sum,
                    params.npass,
                    params.l2_reg,
                    &scratch,
                );
            } else {
                scale(-step_size, &mut cnst_sum);
                pgd_iteration(
                    b,
                    a,
                    &xc.cols(),
                    k,
                    cnst_div,
                    &cnst_sum,
                    step_size,
                    params.npass,
                    &scratch,
                );

                // decay only after taking PGD steps in both matrices
                step_size *= 0.5;
            }

            debug!(
                "finished outer iteration {} of {}",
                iter + 1,
                params.numiter
            );
        }
    });

    Ok(())
}

///////////////////////////
// Factor initialization //
///////////////////////////

/// Random initialization of one factor matrix
///
/// Gamma(1, 1) draws with a seeded generator, giving strictly positive
/// starting factors so the first predicted values on the observed
/// support stay away from zero.
///
/// ### Params
///
/// * `nrow` - Number of rows of the factor matrix.
/// * `k` - Number of latent factors.
/// * `seed` - Random seed for reproducibility purposes.
///
/// ### Returns
///
/// Row-major factor matrix data of length `nrow * k`.
pub fn random_factor_init(nrow: usize, k: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let gamma = Gamma::new(1.0, 1.0).unwrap();

    (0..nrow * k).map(|_| gamma.sample(&mut rng)).collect()
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::cg::PoissonObjective;
    use crate::helpers::minimize::NonNegObjective;
    use faer::mat;

    fn toy_problem() -> (CsrMatrix, CscMatrix) {
        let dense = mat![[5.0, 0.0], [0.0, 3.0]];
        let xr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let xc = CscMatrix::from_csr(&xr);
        (xr, xc)
    }

    fn pgd_params(numiter: usize, step_size: f64) -> FactorizationParams {
        FactorizationParams {
            l2_reg: 0.0,
            l1_reg: 0.0,
            use_cg: false,
            step_size,
            numiter,
            npass: 1,
            num_threads: 1,
        }
    }

    #[test]
    fn test_zero_iterations_is_a_noop() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (xr, xc) = toy_problem();
        let mut a = vec![0.25, 1.75];
        let mut b = vec![0.5, 0.125];
        let a_before = a.clone();
        let b_before = b.clone();

        run_factorization(&mut a, &mut b, 1, &xr, &xc, &pgd_params(0, 0.1)).unwrap();

        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_one_pgd_iteration_hand_computed() {
        let (xr, xc) = toy_problem();
        let mut a = vec![1.0, 1.0];
        let mut b = vec![1.0, 1.0];

        run_factorization(&mut a, &mut b, 1, &xr, &xc, &pgd_params(1, 0.1)).unwrap();

        // A update: colsum(B) = 2, cnst_sum = -0.2
        //   a0 = 1 + 0.1 * 5 - 0.2 = 1.3, a1 = 1 + 0.1 * 3 - 0.2 = 1.1
        // B update: colsum(A) = 2.4, cnst_sum = -0.24
        //   b0 = 1 + 0.1 * (5 / 1.3) * 1.3 - 0.24 = 1.26
        //   b1 = 1 + 0.1 * (3 / 1.1) * 1.1 - 0.24 = 1.06
        assert!((a[0] - 1.3).abs() < 1e-12);
        assert!((a[1] - 1.1).abs() < 1e-12);
        assert!((b[0] - 1.26).abs() < 1e-12);
        assert!((b[1] - 1.06).abs() < 1e-12);
        assert!(a.iter().chain(b.iter()).all(|&v| v >= 0.0));
    }

    #[test]
    fn test_pgd_update_does_not_worsen_row_objectives() {
        let (xr, xc) = toy_problem();
        let mut a = vec![1.0, 1.0];
        let mut b = vec![1.0, 1.0];
        let b_fixed = b.clone();

        let row_value = |row: &[f64], fixed: &[f64], sums: &[f64], vals: &[f64], idx: &[usize]| {
            PoissonObjective {
                fixed,
                fixed_sums: sums,
                values: vals,
                indices: idx,
                l2_reg: 0.0,
            }
            .value(row)
        };

        let view = xr.rows();
        let b_sums = vec![2.0];
        let (idx0, val0) = view.slice(0);
        let (idx1, val1) = view.slice(1);
        let before = [
            row_value(&a[0..1], &b_fixed, &b_sums, val0, idx0),
            row_value(&a[1..2], &b_fixed, &b_sums, val1, idx1),
        ];

        run_factorization(&mut a, &mut b, 1, &xr, &xc, &pgd_params(1, 0.1)).unwrap();

        let after = [
            row_value(&a[0..1], &b_fixed, &b_sums, val0, idx0),
            row_value(&a[1..2], &b_fixed, &b_sums, val1, idx1),
        ];

        for (f_before, f_after) in before.iter().zip(&after) {
            assert!(f_after <= f_before);
        }
    }

    #[test]
    fn test_single_thread_runs_are_bit_identical() {
        let dense = mat![
            [2.0, 0.0, 1.0, 0.0],
            [0.0, 4.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 7.0]
        ];
        let xr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let xc = CscMatrix::from_csr(&xr);
        let k = 2;

        let a_init = random_factor_init(3, k, 11);
        let b_init = random_factor_init(4, k, 13);

        let run = || {
            let mut a = a_init.clone();
            let mut b = b_init.clone();
            run_factorization(&mut a, &mut b, k, &xr, &xc, &pgd_params(4, 0.05)).unwrap();
            (a, b)
        };

        let (a1, b1) = run();
        let (a2, b2) = run();

        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_step_size_decays_by_half_each_iteration() {
        // two iterations in one run must equal two chained single
        // iteration runs with the step size halved in between
        let (xr, xc) = toy_problem();

        let mut a_full = vec![1.0, 1.0];
        let mut b_full = vec![1.0, 1.0];
        run_factorization(&mut a_full, &mut b_full, 1, &xr, &xc, &pgd_params(2, 0.1)).unwrap();

        let mut a_chained = vec![1.0, 1.0];
        let mut b_chained = vec![1.0, 1.0];
        run_factorization(&mut a_chained, &mut b_chained, 1, &xr, &xc, &pgd_params(1, 0.1))
            .unwrap();
        run_factorization(&mut a_chained, &mut b_chained, 1, &xr, &xc, &pgd_params(1, 0.05))
            .unwrap();

        assert_eq!(a_full, a_chained);
        assert_eq!(b_full, b_chained);
    }

    #[test]
    fn test_transposition_symmetry_of_the_b_update() {
        // updating B against A over the column-compressed view is the
        // same computation as updating the transposed problem's rows
        use crate::helpers::pgd::pgd_iteration;

        let dense = mat![[2.0, 0.0], [1.0, 4.0], [0.0, 3.0]];
        let xr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let xc = CscMatrix::from_csr(&xr);
        let transposed = CsrMatrix::from_dense_matrix(dense.transpose());

        let k = 2;
        let a = random_factor_init(3, k, 3);
        let b_init = random_factor_init(2, k, 5);
        let cnst_sum = vec![-0.05, -0.02];
        let scratch = ScratchPool::new(k);

        let mut b_via_csc = b_init.clone();
        pgd_iteration(
            &mut b_via_csc,
            &a,
            &xc.cols(),
            k,
            1.0,
            &cnst_sum,
            0.1,
            1,
            &scratch,
        );

        let mut b_via_transpose = b_init.clone();
        pgd_iteration(
            &mut b_via_transpose,
            &a,
            &transposed.rows(),
            k,
            1.0,
            &cnst_sum,
            0.1,
            1,
            &scratch,
        );

        assert_eq!(b_via_csc, b_via_transpose);
    }

    #[test]
    fn test_factors_stay_nonnegative() {
        let dense = mat![
            [0.0, 2.0, 0.0],
            [5.0, 0.0, 1.0],
            [0.0, 0.0, 3.0],
            [1.0, 1.0, 0.0]
        ];
        let xr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let xc = CscMatrix::from_csr(&xr);
        let k = 2;

        for use_cg in [false, true] {
            let mut a = random_factor_init(4, k, 17);
            let mut b = random_factor_init(3, k, 19);

            let params = FactorizationParams {
                l2_reg: 0.01,
                l1_reg: 0.05,
                use_cg,
                step_size: 0.05,
                numiter: 5,
                npass: 2,
                num_threads: 2,
            };
            run_factorization(&mut a, &mut b, k, &xr, &xc, &params).unwrap();

            assert!(a.iter().all(|&v| v >= 0.0));
            assert!(b.iter().all(|&v| v >= 0.0));
            assert!(a.iter().chain(b.iter()).all(|&v| v.is_finite()));
        }
    }

    #[test]
    fn test_random_factor_init() {
        let m1 = random_factor_init(6, 3, 123);
        let m2 = random_factor_init(6, 3, 123);
        let m3 = random_factor_init(6, 3, 124);

        assert_eq!(m1.len(), 18);
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
        assert!(m1.iter().all(|&v| v > 0.0));
    }
}
