//! Quadratic least-squares fitting and curve intersection
//!
//! Fits `y = a·x² + b·x + c` through the normal equations. The abscissae are
//! centred and scaled before the 3×3 system is built, which keeps the system
//! well conditioned for data such as pendulum distances in the hundreds of
//! millimetres; the coefficients are converted back afterwards.
//!
//! # Root selection
//!
//! Two fits cross where `(a₁−a₂)x² + (b₁−b₂)x + (c₁−c₂) = 0`. With a domain
//! the roots inside it (inclusive) are candidates, otherwise the non-negative
//! roots are. The smallest candidate wins. No candidate means
//! [`DaqError::NoIntersection`]; there is no default point.

use crate::error::{DaqError, Result};

/// Pivots below this magnitude make the system singular
const SINGULAR_EPS: f64 = 1e-12;

/// Relative tolerance for comparing coefficients and domain bounds
const ROOT_EPS: f64 = 1e-9;

/// Fitted parabola
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// Mean of squared residuals
    pub mse: f64,
    /// Number of points fitted
    pub n: usize,
}

impl QuadraticFit {
    /// Least-squares fit through `points`
    ///
    /// Fails with [`DaqError::InsufficientData`] for fewer than three distinct
    /// x values or non-finite input.
    pub fn fit(points: &[(f64, f64)]) -> Result<Self> {
        if points
            .iter()
            .any(|(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(DaqError::InsufficientData(
                "points must be finite".to_string(),
            ));
        }

        let distinct = distinct_count(points.iter().map(|p| p.0));
        if distinct < 3 {
            return Err(DaqError::InsufficientData(format!(
                "need at least 3 distinct x values, got {}",
                distinct
            )));
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let scale = points
            .iter()
            .map(|p| (p.0 - mean_x).abs())
            .fold(0.0, f64::max);

        // Power sums of u = (x - mean) / scale
        let mut su = [0.0f64; 5];
        let mut sy = [0.0f64; 3];
        for &(x, y) in points {
            let u = (x - mean_x) / scale;
            let mut p = 1.0;
            for (k, s) in su.iter_mut().enumerate() {
                *s += p;
                if k < 3 {
                    sy[k] += p * y;
                }
                p *= u;
            }
        }

        // Unknowns ordered (C, B, A) for y = A·u² + B·u + C
        let mut system = [
            [su[0], su[1], su[2], sy[0]],
            [su[1], su[2], su[3], sy[1]],
            [su[2], su[3], su[4], sy[2]],
        ];
        let [cu, bu, au] = solve3(&mut system).ok_or_else(|| {
            DaqError::InsufficientData("normal equations are singular".to_string())
        })?;

        let s2 = scale * scale;
        let a = au / s2;
        let b = bu / scale - 2.0 * au * mean_x / s2;
        let c = au * mean_x * mean_x / s2 - bu * mean_x / scale + cu;

        let mut fit = Self {
            a,
            b,
            c,
            mse: 0.0,
            n: points.len(),
        };
        fit.mse = points
            .iter()
            .map(|&(x, y)| (y - fit.evaluate(x)).powi(2))
            .sum::<f64>()
            / n;
        Ok(fit)
    }

    /// Value of the parabola at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }

    /// Root mean squared error
    pub fn rmse(&self) -> f64 {
        self.mse.sqrt()
    }
}

impl std::fmt::Display for QuadraticFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "y = {:.6}x² {:+.6}x {:+.6} (mse {:.3e})",
            self.a, self.b, self.c, self.mse
        )
    }
}

/// Crossing point of two fits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub x: f64,
    pub y: f64,
}

/// Intersect two fits, restricted to `domain` when given
pub fn intersect(
    first: &QuadraticFit,
    second: &QuadraticFit,
    domain: Option<(f64, f64)>,
) -> Result<Intersection> {
    let da = first.a - second.a;
    let db = first.b - second.b;
    let dc = first.c - second.c;

    let magnitude = [first.a, second.a, first.b, second.b]
        .iter()
        .fold(1.0f64, |m, v| m.max(v.abs()));
    let eps = ROOT_EPS * magnitude;

    let roots: Vec<f64> = if da.abs() <= eps {
        if db.abs() <= eps {
            return Err(DaqError::NoIntersection(
                "curves differ only by a constant".to_string(),
            ));
        }
        vec![-dc / db]
    } else {
        let disc = db * db - 4.0 * da * dc;
        if disc < 0.0 {
            return Err(DaqError::NoIntersection("no real root".to_string()));
        }
        let sq = disc.sqrt();
        let q = -0.5 * (db + if db >= 0.0 { sq } else { -sq });
        if q == 0.0 {
            vec![0.0]
        } else {
            vec![q / da, dc / q]
        }
    };

    let candidate = match domain {
        Some((lo, hi)) => {
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let tol = ROOT_EPS * (hi - lo).abs().max(1.0);
            roots
                .into_iter()
                .filter(|r| *r >= lo - tol && *r <= hi + tol)
                .min_by(f64::total_cmp)
        }
        None => roots
            .into_iter()
            .filter(|r| *r >= -ROOT_EPS)
            .min_by(f64::total_cmp),
    };

    let x = candidate.ok_or_else(|| match domain {
        Some((lo, hi)) => DaqError::NoIntersection(format!("no root within [{}, {}]", lo, hi)),
        None => DaqError::NoIntersection("no non-negative root".to_string()),
    })?;
    let x = if x.abs() < ROOT_EPS { 0.0 } else { x };

    Ok(Intersection {
        x,
        y: first.evaluate(x),
    })
}

fn distinct_count(xs: impl Iterator<Item = f64>) -> usize {
    let mut xs: Vec<f64> = xs.collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    xs.len()
}

/// Gaussian elimination with partial pivoting on an augmented 3×4 matrix
fn solve3(m: &mut [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() < SINGULAR_EPS {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| m[row][k] * x[k]).sum();
        x[row] = (m[row][3] - tail) / m[row][row];
    }
    Some(x)
}
