pub mod helpers;
pub mod utils;

pub use helpers::cg::optimize_single_row;
pub use helpers::factorize::{
    random_factor_init, run_factorization, FactorError, FactorizationParams,
};
pub use helpers::minimize::{CgOutcome, CgSettings, NonNegObjective};
pub use helpers::structs_sparse::{CscMatrix, CsrMatrix, SparseView};
