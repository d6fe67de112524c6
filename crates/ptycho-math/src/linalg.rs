//! Linear algebra utilities.
//!
//! Dense Gaussian elimination, least squares through the normal equations,
//! closed-form 2x2 solves for per-pattern position updates.

use ndarray::{Array1, Array2};
use ptycho_types::error::{PtychoError, PtychoResult};

/// Pivots below this magnitude are treated as singular.
const PIVOT_EPS: f64 = 1e-12;

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> PtychoResult<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(PtychoError::LinAlg(format!(
            "solve expects a square system, got A {:?} and b [{}]",
            a.dim(),
            b.len()
        )));
    }
    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| m[[i, col]].abs().total_cmp(&m[[j, col]].abs()))
            .unwrap_or(col);
        let scale = m.column(col).iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        if m[[pivot, col]].abs() <= PIVOT_EPS * scale.max(1.0) {
            return Err(PtychoError::LinAlg(format!(
                "singular matrix at column {col}"
            )));
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
            }
            rhs.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for k in row + 1..n {
            acc -= m[[row, k]] * x[k];
        }
        x[row] = acc / m[[row, row]];
    }
    Ok(x)
}

/// Least-squares solution of `A X ≈ B` for every column of `B`.
///
/// `A` is `(m, n)` with `m >= n`, `B` is `(m, k)`; returns `(n, k)`.
pub fn lstsq(a: &Array2<f64>, b: &Array2<f64>) -> PtychoResult<Array2<f64>> {
    if a.nrows() != b.nrows() {
        return Err(PtychoError::LinAlg(format!(
            "lstsq row mismatch: A {:?}, B {:?}",
            a.dim(),
            b.dim()
        )));
    }
    let ata = a.t().dot(a);
    let atb = a.t().dot(b);
    let mut x = Array2::zeros((a.ncols(), b.ncols()));
    for (k, col) in atb.columns().into_iter().enumerate() {
        let sol = solve_linear_system(&ata, &col.to_owned())?;
        x.column_mut(k).assign(&sol);
    }
    Ok(x)
}

/// Solve a 2x2 system; `None` when the determinant vanishes.
pub fn solve_2x2(a: [[f64; 2]; 2], b: [f64; 2]) -> Option<[f64; 2]> {
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    if !det.is_finite() || det.abs() < 1e-300 {
        return None;
    }
    Some([
        (a[1][1] * b[0] - a[0][1] * b[1]) / det,
        (a[0][0] * b[1] - a[1][0] * b[0]) / det,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_requires_pivoting() {
        let a = array![[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 1.0]];
        let x_true = array![1.0, -2.0, 0.5];
        let b = a.dot(&x_true);
        let x = solve_linear_system(&a, &b).unwrap();
        for (got, want) in x.iter().zip(x_true.iter()) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
    }

    #[test]
    fn test_solve_singular_is_error() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        assert!(matches!(
            solve_linear_system(&a, &b),
            Err(PtychoError::LinAlg(_))
        ));
    }

    #[test]
    fn test_lstsq_recovers_plane() {
        // z = 0.5 + 2x - y sampled on a grid
        let pts: Vec<(f64, f64)> = (0..4)
            .flat_map(|i| (0..3).map(move |j| (i as f64, j as f64)))
            .collect();
        let a = Array2::from_shape_fn((pts.len(), 3), |(r, c)| match c {
            0 => 1.0,
            1 => pts[r].0,
            _ => pts[r].1,
        });
        let b = Array2::from_shape_fn((pts.len(), 1), |(r, _)| 0.5 + 2.0 * pts[r].0 - pts[r].1);
        let x = lstsq(&a, &b).unwrap();
        assert!((x[[0, 0]] - 0.5).abs() < 1e-10);
        assert!((x[[1, 0]] - 2.0).abs() < 1e-10);
        assert!((x[[2, 0]] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_solve_2x2() {
        let x = solve_2x2([[2.0, 1.0], [1.0, 3.0]], [3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-14);
        assert!((x[1] - 1.4).abs() < 1e-14);
        assert!(solve_2x2([[1.0, 2.0], [2.0, 4.0]], [1.0, 1.0]).is_none());
    }
}
