//! Compressed sparse row matrices as written by `scipy.sparse.save_npz`.

use ndarray::Array2;

use crate::error::{Error, Result};

/// A CSR matrix: row `r` owns `indices[indptr[r]..indptr[r + 1]]` and the
/// matching slice of `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    shape: (usize, usize),
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    pub fn new(
        shape: (usize, usize),
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        let (rows, cols) = shape;
        if indptr.len() != rows + 1 {
            return Err(Error::Sparse(format!(
                "indptr has {} entries for {} rows",
                indptr.len(),
                rows
            )));
        }
        if indices.len() != data.len() {
            return Err(Error::Sparse(format!(
                "{} indices but {} values",
                indices.len(),
                data.len()
            )));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) || indptr[rows] != data.len() {
            return Err(Error::Sparse("indptr is not a valid row partition".into()));
        }
        if let Some(&col) = indices.iter().find(|&&c| c >= cols) {
            return Err(Error::Sparse(format!(
                "column index {col} out of bounds for {cols} columns"
            )));
        }

        Ok(Self {
            shape,
            indptr,
            indices,
            data,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Densify. Duplicate entries for the same cell are summed.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros(self.shape);
        for row in 0..self.shape.0 {
            let span = self.indptr[row]..self.indptr[row + 1];
            for (&col, &value) in self.indices[span.clone()].iter().zip(&self.data[span]) {
                dense[[row, col]] += value;
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_to_dense() {
        // [[0, 1, 0],
        //  [2, 0, 3]]
        let csr = CsrMatrix::new((2, 3), vec![0, 1, 3], vec![1, 0, 2], vec![1.0, 2.0, 3.0]).unwrap();

        assert_eq!(csr.nnz(), 3);
        assert_eq!(csr.to_dense(), array![[0.0, 1.0, 0.0], [2.0, 0.0, 3.0]]);
    }

    #[test]
    fn test_to_dense_sums_duplicates() {
        let csr = CsrMatrix::new((1, 2), vec![0, 2], vec![1, 1], vec![1.5, 2.5]).unwrap();
        assert_eq!(csr.to_dense(), array![[0.0, 4.0]]);
    }

    #[test]
    fn test_empty_rows() {
        let csr = CsrMatrix::new((3, 2), vec![0, 0, 0, 0], vec![], vec![]).unwrap();
        assert_eq!(csr.to_dense(), Array2::<f64>::zeros((3, 2)));
    }

    #[test]
    fn test_rejects_bad_indptr() {
        assert!(CsrMatrix::new((2, 2), vec![0, 1], vec![0], vec![1.0]).is_err());
        assert!(CsrMatrix::new((1, 2), vec![0, 2], vec![0], vec![1.0]).is_err());
    }

    #[test]
    fn test_rejects_out_of_bounds_column() {
        assert!(CsrMatrix::new((1, 2), vec![0, 1], vec![2], vec![1.0]).is_err());
    }
}
