use faer::{Mat, MatRef};

use crate::assert_same_len;

////////////////
// Structures //
////////////////

/// Borrowed view over one compressed axis of a sparse matrix
///
/// For a CSR matrix the outer axis is rows; for a CSC matrix it is
/// columns. The optimizer only ever walks one outer slice at a time, so
/// both factor updates go through this one type with the roles of the
/// two matrices swapped.
///
/// ### Fields
///
/// * `indptr` - Pointer array of length `n_outer + 1`.
/// * `indices` - Inner indices of the stored entries.
/// * `data` - Stored values, aligned with `indices`.
/// * `n_outer` - Number of compressed (outer) slices.
/// * `n_inner` - Extent of the inner axis.
#[derive(Debug, Clone, Copy)]
pub struct SparseView<'a> {
    pub indptr: &'a [usize],
    pub indices: &'a [usize],
    pub data: &'a [f64],
    pub n_outer: usize,
    pub n_inner: usize,
}

impl<'a> SparseView<'a> {
    /// Nonzero (index, value) arrays of one outer slice
    ///
    /// ### Params
    ///
    /// * `i` - Outer index (row for CSR, column for CSC).
    ///
    /// ### Returns
    ///
    /// A tuple of the inner indices and the values of the slice.
    #[inline]
    pub fn slice(&self, i: usize) -> (&'a [usize], &'a [f64]) {
        let lo = self.indptr[i];
        let hi = self.indptr[i + 1];
        (&self.indices[lo..hi], &self.data[lo..hi])
    }
}

/// Row-compressed sparse matrix
///
/// ### Fields
///
/// * `data` - Vector with the stored values.
/// * `col_indices` - The column indices of the stored values.
/// * `row_ptrs` - The row pointers into `data`, length `nrow + 1`.
/// * `nrow` - Number of rows.
/// * `ncol` - Number of columns.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pub data: Vec<f64>,
    pub col_indices: Vec<usize>,
    pub row_ptrs: Vec<usize>,
    pub nrow: usize,
    pub ncol: usize,
}

/// Column-compressed sparse matrix
///
/// ### Fields
///
/// * `data` - Vector with the stored values.
/// * `row_indices` - The row indices of the stored values.
/// * `col_ptrs` - The column pointers into `data`, length `ncol + 1`.
/// * `nrow` - Number of rows.
/// * `ncol` - Number of columns.
#[derive(Debug, Clone)]
pub struct CscMatrix {
    pub data: Vec<f64>,
    pub row_indices: Vec<usize>,
    pub col_ptrs: Vec<usize>,
    pub nrow: usize,
    pub ncol: usize,
}

/////////
// CSR //
/////////

impl CsrMatrix {
    /// Generate a new sparse row matrix from pre-computed arrays
    ///
    /// ### Params
    ///
    /// * `data` - Slice of the stored values.
    /// * `col_indices` - Slice of the column indices of the values.
    /// * `row_ptrs` - Slice of the row pointers, length `nrow + 1`.
    /// * `nrow` - Number of rows.
    /// * `ncol` - Number of columns.
    pub fn new(
        data: &[f64],
        col_indices: &[usize],
        row_ptrs: &[usize],
        nrow: usize,
        ncol: usize,
    ) -> Self {
        assert_same_len!(data, col_indices);
        Self {
            data: data.to_vec(),
            col_indices: col_indices.to_vec(),
            row_ptrs: row_ptrs.to_vec(),
            nrow,
            ncol,
        }
    }

    /// Convert a faer dense matrix to sparse row format
    ///
    /// ### Params
    ///
    /// * `dense` - The original dense matrix.
    pub fn from_dense_matrix(dense: MatRef<f64>) -> Self {
        let nrow = dense.nrows();
        let ncol = dense.ncols();

        let mut data = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptrs = Vec::with_capacity(nrow + 1);

        row_ptrs.push(0_usize);

        for row in 0..nrow {
            for col in 0..ncol {
                let value = dense[(row, col)];
                if value != 0.0 {
                    data.push(value);
                    col_indices.push(col);
                }
            }
            row_ptrs.push(data.len());
        }

        Self {
            data,
            col_indices,
            row_ptrs,
            nrow,
            ncol,
        }
    }

    /// To a dense faer matrix
    pub fn to_dense_matrix(&self) -> Mat<f64> {
        let mut dense = Mat::zeros(self.nrow, self.ncol);

        for row in 0..self.nrow {
            for idx in self.row_ptrs[row]..self.row_ptrs[row + 1] {
                dense[(row, self.col_indices[idx])] = self.data[idx];
            }
        }

        dense
    }

    /// Return the number of non-zero values
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Borrowed view with rows as the outer axis
    pub fn rows(&self) -> SparseView<'_> {
        SparseView {
            indptr: &self.row_ptrs,
            indices: &self.col_indices,
            data: &self.data,
            n_outer: self.nrow,
            n_inner: self.ncol,
        }
    }
}

/////////
// CSC //
/////////

impl CscMatrix {
    /// Generate a new sparse column matrix from pre-computed arrays
    ///
    /// ### Params
    ///
    /// * `data` - Slice of the stored values.
    /// * `row_indices` - Slice of the row indices of the values.
    /// * `col_ptrs` - Slice of the column pointers, length `ncol + 1`.
    /// * `nrow` - Number of rows.
    /// * `ncol` - Number of columns.
    pub fn new(
        data: &[f64],
        row_indices: &[usize],
        col_ptrs: &[usize],
        nrow: usize,
        ncol: usize,
    ) -> Self {
        assert_same_len!(data, row_indices);
        Self {
            data: data.to_vec(),
            row_indices: row_indices.to_vec(),
            col_ptrs: col_ptrs.to_vec(),
            nrow,
            ncol,
        }
    }

    /// Convert a faer dense matrix to sparse column format
    pub fn from_dense_matrix(dense: MatRef<f64>) -> Self {
        let nrow = dense.nrows();
        let ncol = dense.ncols();

        let mut data = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(ncol + 1);

        col_ptrs.push(0_usize);

        for col in 0..ncol {
            for row in 0..nrow {
                let value = dense[(row, col)];
                if value != 0.0 {
                    data.push(value);
                    row_indices.push(row);
                }
            }
            col_ptrs.push(data.len());
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow,
            ncol,
        }
    }

    /// Mirror a row-compressed matrix into column-compressed format
    ///
    /// Counting transpose. Both representations encode the same logical
    /// matrix, which is exactly the precondition the alternating
    /// optimizer places on its two input views.
    ///
    /// ### Params
    ///
    /// * `csr` - The row-compressed matrix to mirror.
    pub fn from_csr(csr: &CsrMatrix) -> Self {
        let nnz = csr.nnz();
        let mut counts = vec![0_usize; csr.ncol];
        for &col in &csr.col_indices {
            counts[col] += 1;
        }

        let mut col_ptrs = Vec::with_capacity(csr.ncol + 1);
        col_ptrs.push(0_usize);
        for col in 0..csr.ncol {
            col_ptrs.push(col_ptrs[col] + counts[col]);
        }

        let mut data = vec![0.0_f64; nnz];
        let mut row_indices = vec![0_usize; nnz];
        let mut next = col_ptrs[..csr.ncol].to_vec();

        for row in 0..csr.nrow {
            for idx in csr.row_ptrs[row]..csr.row_ptrs[row + 1] {
                let col = csr.col_indices[idx];
                let dst = next[col];
                data[dst] = csr.data[idx];
                row_indices[dst] = row;
                next[col] += 1;
            }
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow: csr.nrow,
            ncol: csr.ncol,
        }
    }

    /// To a dense faer matrix
    pub fn to_dense_matrix(&self) -> Mat<f64> {
        let mut dense = Mat::zeros(self.nrow, self.ncol);

        for col in 0..self.ncol {
            for idx in self.col_ptrs[col]..self.col_ptrs[col + 1] {
                dense[(self.row_indices[idx], col)] = self.data[idx];
            }
        }

        dense
    }

    /// Return the number of non-zero values
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Borrowed view with columns as the outer axis
    pub fn cols(&self) -> SparseView<'_> {
        SparseView {
            indptr: &self.col_ptrs,
            indices: &self.row_indices,
            data: &self.data,
            n_outer: self.ncol,
            n_inner: self.nrow,
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_dense_to_csr_to_dense() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = CsrMatrix::from_dense_matrix(dense.as_ref());

        assert_eq!(sparse.nrow, 3);
        assert_eq!(sparse.ncol, 3);
        assert_eq!(sparse.nnz(), 5);
        assert_eq!(sparse.data, vec![1.0, 3.0, 2.0, 4.0, 5.0]);

        let redense = sparse.to_dense_matrix();
        assert_eq!(dense, redense);
    }

    #[test]
    fn test_dense_to_csc_to_dense() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = CscMatrix::from_dense_matrix(dense.as_ref());

        assert_eq!(sparse.nnz(), 5);
        assert_eq!(sparse.data, vec![1.0, 4.0, 2.0, 3.0, 5.0]);

        let redense = sparse.to_dense_matrix();
        assert_eq!(dense, redense);
    }

    #[test]
    fn test_raw_to_dense() {
        let data = vec![1.0, 3.0, 2.0, 4.0, 5.0];
        let col_indices = vec![0, 2, 1, 0, 2];
        let row_ptrs = vec![0, 2, 3, 5];

        let sparse = CsrMatrix::new(&data, &col_indices, &row_ptrs, 3, 3);
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        assert_eq!(sparse.to_dense_matrix(), dense);
    }

    #[test]
    fn test_csc_from_csr_matches_direct() {
        let dense = mat![
            [0.0, 7.0, 0.0, 1.0],
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 3.0, 9.0, 0.0]
        ];

        let csr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let mirrored = CscMatrix::from_csr(&csr);
        let direct = CscMatrix::from_dense_matrix(dense.as_ref());

        assert_eq!(mirrored.data, direct.data);
        assert_eq!(mirrored.row_indices, direct.row_indices);
        assert_eq!(mirrored.col_ptrs, direct.col_ptrs);
    }

    #[test]
    fn test_view_slices() {
        let dense = mat![[5.0, 0.0], [0.0, 3.0]];
        let csr = CsrMatrix::from_dense_matrix(dense.as_ref());
        let view = csr.rows();

        assert_eq!(view.n_outer, 2);
        assert_eq!(view.n_inner, 2);

        let (idx0, val0) = view.slice(0);
        assert_eq!(idx0, &[0]);
        assert_eq!(val0, &[5.0]);

        let (idx1, val1) = view.slice(1);
        assert_eq!(idx1, &[1]);
        assert_eq!(val1, &[3.0]);
    }
}
