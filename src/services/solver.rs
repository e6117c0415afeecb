use crate::models::config::AlsConfig;
use crate::models::error::{Error, Result};
use crate::models::ratings::SparseVector;
use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use std::ops::Range;

/// Ids handed to one task per phase.
pub const WORK_UNIT_SIZE: usize = 100;

/// First ridge tried when a system is not positive definite, relative to its
/// mean diagonal.
const RIDGE_EPSILON: f64 = 1.0e-8;
const RIDGE_ATTEMPTS: usize = 6;

/// Splits `0..len` into consecutive, disjoint ranges of at most
/// [`WORK_UNIT_SIZE`] slots.
pub fn work_units(len: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(WORK_UNIT_SIZE)
        .map(|start| start..(start + WORK_UNIT_SIZE).min(len))
        .collect()
}

/// Loss settings a solve needs, taken from [`AlsConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SolverParams {
    pub features: usize,
    pub alpha: f64,
    /// Already scaled by alpha.
    pub lambda: f64,
    pub reconstruct_r_matrix: bool,
    pub loss_ignores_unspecified: bool,
}

impl From<&AlsConfig> for SolverParams {
    fn from(config: &AlsConfig) -> Self {
        SolverParams {
            features: config.features,
            alpha: config.alpha,
            lambda: config.lambda * config.alpha,
            reconstruct_r_matrix: config.reconstruct_r_matrix,
            loss_ignores_unspecified: config.loss_ignores_unspecified,
        }
    }
}

/// Solves one side of the factorization while the other side `fixed` is
/// held constant.
///
/// For an id with neighbours `(j, r)` the regularized normal equations
/// `(MᵗM + Σ (c - 1) m_j m_jᵗ + λ·n·I) v = Σ_{r > 0} c m_j` are solved with
/// `c = 1 + α|r|`. In reconstruction mode the right-hand side is `Σ r m_j`
/// and no confidence terms are added.
pub struct FactorSolver<'a> {
    params: SolverParams,
    fixed: ArrayView2<'a, f32>,
    gram: &'a Array2<f64>,
}

impl<'a> FactorSolver<'a> {
    pub fn new(params: SolverParams, fixed: ArrayView2<'a, f32>, gram: &'a Array2<f64>) -> Self {
        FactorSolver { params, fixed, gram }
    }

    /// Solves a work unit: `neighbours[i]` is written into row `i` of `target`.
    pub fn solve_unit(&self, neighbours: &[SparseVector], mut target: ArrayViewMut2<f32>) -> Result<()> {
        if neighbours.len() != target.nrows() {
            return Err(Error::WorkerFailure(format!(
                "work unit has {} ids but {} target rows",
                neighbours.len(),
                target.nrows()
            )));
        }
        for (row, slot) in neighbours.iter().zip(target.axis_iter_mut(Axis(0))) {
            self.solve_into(row, slot)?;
        }
        Ok(())
    }

    pub fn solve(&self, neighbours: &[(usize, f32)]) -> Result<Array1<f32>> {
        let mut out = Array1::zeros(self.params.features);
        self.solve_into(neighbours, out.view_mut())?;
        Ok(out)
    }

    fn solve_into(&self, neighbours: &[(usize, f32)], mut out: ArrayViewMut1<f32>) -> Result<()> {
        let (wu, rhs) = self.normal_equations(neighbours)?;
        out.assign(&solve_with_fallback(&wu, &rhs));
        Ok(())
    }

    fn normal_equations(&self, neighbours: &[(usize, f32)]) -> Result<(Array2<f64>, Array1<f64>)> {
        let features = self.params.features;
        let alpha = self.params.alpha;
        let mut wu = if self.params.loss_ignores_unspecified {
            Array2::<f64>::zeros((features, features))
        } else {
            self.gram.clone()
        };
        let mut rhs = Array1::<f64>::zeros(features);

        for &(slot, value) in neighbours {
            let vector = self.fixed.row(slot).mapv(f64::from);
            let xu = value as f64;
            if self.params.reconstruct_r_matrix {
                rhs.scaled_add(xu, &vector);
                continue;
            }
            let cu = 1.0 + alpha * xu.abs();
            let weight = if self.params.loss_ignores_unspecified {
                cu
            } else {
                cu - 1.0
            };
            let column = vector.view().insert_axis(Axis(1));
            general_mat_mul(weight, &column, &column.t(), 1.0, &mut wu);
            if xu > 0.0 {
                rhs.scaled_add(cu, &vector);
            }
        }

        let lambda_times_count = self.params.lambda * neighbours.len() as f64;
        wu.diag_mut().mapv_inplace(|d| d + lambda_times_count);

        if wu.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
            return Err(Error::WorkerFailure(
                "non-finite values in normal equations".to_string(),
            ));
        }
        Ok((wu, rhs))
    }
}

/// Solves `a x = b`, adding a growing ridge to the diagonal while `a` is not
/// numerically positive definite or the solution does not fit in f32. Falls
/// back to the zero vector.
fn solve_with_fallback(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f32> {
    if let Some(x) = cholesky_solve(a, b).and_then(narrow) {
        return x;
    }
    let n = a.nrows().max(1) as f64;
    let mut ridge = RIDGE_EPSILON * (a.diag().sum().abs() / n).max(1.0);
    for _ in 0..RIDGE_ATTEMPTS {
        let mut ridged = a.clone();
        ridged.diag_mut().mapv_inplace(|d| d + ridge);
        if let Some(x) = cholesky_solve(&ridged, b).and_then(narrow) {
            log::debug!("Singular system solved with ridge {:e}", ridge);
            return x;
        }
        ridge *= 100.0;
    }
    log::warn!("Could not solve system even with ridge {:e}, using zero vector", ridge);
    Array1::zeros(b.len())
}

/// The f32 copy of `x`, or `None` if any entry is not finite once narrowed.
fn narrow(x: Array1<f64>) -> Option<Array1<f32>> {
    let narrowed = x.mapv(|v| v as f32);
    narrowed.iter().all(|v| v.is_finite()).then_some(narrowed)
}

#[cfg(feature = "openblas")]
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    use ndarray_linalg::SolveC;
    a.solvec(b).ok()
}

#[cfg(not(feature = "openblas"))]
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    use faer::linalg::solvers::Solve;

    let n = a.nrows();
    let a_mat = faer::Mat::<f64>::from_fn(n, n, |i, j| a[(i, j)]);
    let mut rhs = faer::Mat::<f64>::from_fn(n, 1, |i, _| b[i]);
    let llt = a_mat.as_ref().llt(faer::Side::Lower).ok()?;
    llt.solve_in_place(rhs.as_mut());
    Some(Array1::from_shape_fn(n, |i| rhs[(i, 0)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gram::regularized_gram;
    use ndarray::array;

    fn params(features: usize) -> SolverParams {
        SolverParams {
            features,
            alpha: 1.0,
            lambda: 0.1,
            reconstruct_r_matrix: false,
            loss_ignores_unspecified: false,
        }
    }

    #[test]
    fn test_work_units_are_disjoint_and_cover() {
        for len in [0, 1, 99, 100, 101, 250, 1000] {
            let units = work_units(len);
            let mut seen = vec![false; len];
            for unit in &units {
                assert!(unit.len() <= WORK_UNIT_SIZE && !unit.is_empty());
                for slot in unit.clone() {
                    assert!(!seen[slot], "slot {} assigned twice", slot);
                    seen[slot] = true;
                }
            }
            assert!(seen.into_iter().all(|s| s));
        }
    }

    #[test]
    fn test_cholesky_solves_spd_system() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let b = array![1.0, -2.0, 0.5];
        let x = cholesky_solve(&a, &b).unwrap();
        let back = a.dot(&x);
        for i in 0..3 {
            assert!((back[i] - b[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_singular_system_falls_back_to_ridge() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![1.0, 1.0];
        let x = solve_with_fallback(&a, &b);
        assert!(x.iter().all(|v| v.is_finite()));
        assert!((x[0] + x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_solution_beyond_f32_range_takes_ridge_path() {
        // exact solution 1e40 is finite in f64 but not in f32
        let a = array![[1.0e-40]];
        let b = array![1.0];
        assert!(cholesky_solve(&a, &b).unwrap()[0].is_finite());
        let x = solve_with_fallback(&a, &b);
        assert!(x[0].is_finite());
        assert!(x[0] > 0.0 && x[0] <= 1.0e8 * 1.0001);
    }

    #[test]
    fn test_unsolvable_system_gives_zero_vector() {
        let a = array![[2.0, 0.0], [0.0, 2.0]];
        let b = array![f64::NAN, 1.0];
        assert_eq!(solve_with_fallback(&a, &b), array![0.0f32, 0.0]);
    }

    #[test]
    fn test_solution_satisfies_normal_equations() {
        let fixed = array![[1.0f32, 0.0], [0.0, 1.0], [0.6, 0.8]];
        let gram = regularized_gram(fixed.view());
        let solver = FactorSolver::new(params(2), fixed.view(), &gram);
        let neighbours = vec![(0usize, 5.0f32), (2, 1.0)];
        let v = solver.solve(&neighbours).unwrap();

        let (wu, rhs) = solver.normal_equations(&neighbours).unwrap();
        let v64 = v.mapv(|x| x as f64);
        let back = wu.dot(&v64);
        for i in 0..2 {
            assert!((back[i] - rhs[i]).abs() < 1e-4);
        }
        // the strongly rated neighbour dominates
        assert!(v[0] > v[1]);
    }

    #[test]
    fn test_loss_ignoring_unspecified_starts_from_zero() {
        let fixed = array![[1.0f32, 0.0], [0.0, 1.0]];
        let gram = regularized_gram(fixed.view());
        let mut p = params(2);
        p.loss_ignores_unspecified = true;
        let solver = FactorSolver::new(p, fixed.view(), &gram);
        let (wu, _) = solver.normal_equations(&[(0, 1.0)]).unwrap();
        // c = 2 for the observed entry, λ·n = 0.1 on the diagonal
        assert!((wu[(0, 0)] - 2.1).abs() < 1e-9);
        assert!((wu[(1, 1)] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_input_fails_unit() {
        let fixed = array![[f32::NAN, 0.0]];
        let gram = Array2::<f64>::eye(2);
        let solver = FactorSolver::new(params(2), fixed.view(), &gram);
        let mut target = Array2::<f32>::zeros((1, 2));
        let result = solver.solve_unit(&[vec![(0, 1.0)]], target.view_mut());
        assert!(matches!(result, Err(Error::WorkerFailure(_))));
    }

    #[test]
    fn test_solve_unit_writes_each_row() {
        let fixed = array![[1.0f32, 0.0], [0.0, 1.0]];
        let gram = regularized_gram(fixed.view());
        let solver = FactorSolver::new(params(2), fixed.view(), &gram);
        let mut target = Array2::<f32>::zeros((2, 2));
        solver
            .solve_unit(&[vec![(0, 3.0)], vec![(1, 3.0)]], target.view_mut())
            .unwrap();
        assert!(target[(0, 0)] > 0.0 && target[(0, 0)] > target[(0, 1)]);
        assert!(target[(1, 1)] > 0.0 && target[(1, 1)] > target[(1, 0)]);
    }
}
