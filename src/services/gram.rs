use ndarray::{Array2, ArrayView2};

/// Added to the diagonal so the Gram matrix stays invertible when the factor
/// matrix has fewer rows than features.
pub const GRAM_EPSILON: f64 = 1.0e-9;

/// `MᵗM` for a dense `n x features` factor matrix, computed in f64.
pub fn transpose_times_self(m: ArrayView2<f32>) -> Array2<f64> {
    let m = m.mapv(f64::from);
    m.t().dot(&m)
}

/// [`transpose_times_self`] with [`GRAM_EPSILON`] on the diagonal.
pub fn regularized_gram(m: ArrayView2<f32>) -> Array2<f64> {
    let mut gram = transpose_times_self(m);
    gram.diag_mut().mapv_inplace(|d| d + GRAM_EPSILON);
    gram
}
