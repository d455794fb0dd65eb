/**
 * NextBasket
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Raised by `cholesky_solve` when a pivot is not strictly positive.
#[derive(Debug, PartialEq)]
pub struct NotPositiveDefinite {
    pub pivot: usize,
    pub value: f64,
}

/// `F^T F` for a factor matrix `F` of shape (n x k).
pub fn gram(factors: ArrayView2<f64>) -> Array2<f64> {
    factors.t().dot(&factors)
}

/// `a += weight * v v^T`
#[inline(always)]
pub fn add_scaled_outer(a: &mut Array2<f64>, v: ArrayView1<f64>, weight: f64) {
    let k = v.len();
    for i in 0..k {
        let weighted = weight * v[i];
        for j in 0..k {
            a[[i, j]] += weighted * v[j];
        }
    }
}

/// Solves `a x = b` for a symmetric positive definite `a` via its Cholesky decomposition
/// `a = L L^T`, followed by forward and backward substitution.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, NotPositiveDefinite> {

    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diagonal = a[[i, i]] - sum;
                // Also catches NaN
                if !(diagonal > 0.0) {
                    return Err(NotPositiveDefinite { pivot: i, value: diagonal });
                }
                l[[i, j]] = diagonal.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Ok(x)
}
