pub mod cg;
pub mod factorize;
pub mod linalg;
pub mod minimize;
pub mod pgd;
pub mod structs_sparse;
