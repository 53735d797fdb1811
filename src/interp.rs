//! Grid positions and interpolation.
//!
//! A [`GridPos`] locates a point relative to an "old" grid: `idx` is the lower
//! bracketing index and `fd[0]` the fractional distance from `old[idx]` towards
//! `old[idx+1]`, with `fd[1] = 1 - fd[0]`. Points outside the grid get
//! fractional distances outside [0, 1], which extrapolates linearly.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Position of one point relative to a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPos {
    /// Index of the lower grid point of the bracketing interval
    pub idx: usize,
    /// Fractional distance to `idx` (`fd[0]`) and its complement (`fd[1]`)
    pub fd: [f64; 2],
}

impl GridPos {
    /// Grid position for a length-1 grid: all weight on the single point.
    pub fn single() -> Self {
        Self {
            idx: 0,
            fd: [0., 1.],
        }
    }

    /// Linear interpolation weights `(w_idx, w_idx_plus_1)`.
    #[inline]
    pub fn weights(&self) -> (f64, f64) {
        (self.fd[1], self.fd[0])
    }

    /// Interpolate the value of `y` at this position.
    #[inline]
    pub fn interp(&self, y: &[f64]) -> f64 {
        if self.fd[0] == 0. || y.len() == 1 {
            y[self.idx]
        } else {
            self.fd[1] * y[self.idx] + self.fd[0] * y[self.idx + 1]
        }
    }
}

/// Compute grid positions of `new` points on the `old` grid.
///
/// The old grid may be strictly increasing or strictly decreasing. A grid of a
/// single point gives [`GridPos::single`] for every new point.
pub fn gridpos(old: &[f64], new: &[f64]) -> Vec<GridPos> {
    new.iter().map(|&x| gridpos_single(old, x)).collect()
}

/// Grid position of a single point.
pub fn gridpos_single(old: &[f64], x: f64) -> GridPos {
    let n = old.len();
    if n < 2 {
        return GridPos::single();
    }
    let increasing = old[n - 1] >= old[0];

    // Find the interval, clamped so that idx+1 stays within the grid
    let mut idx = 0;
    if increasing {
        while idx < n - 2 && x >= old[idx + 1] {
            idx += 1;
        }
    } else {
        while idx < n - 2 && x <= old[idx + 1] {
            idx += 1;
        }
    }

    let fd0 = (x - old[idx]) / (old[idx + 1] - old[idx]);
    GridPos {
        idx,
        fd: [fd0, 1. - fd0],
    }
}

/// Grid positions for pressure grids, where interpolation is linear in log(p).
pub fn p2gridpos(old_p: &[f64], new_p: &[f64]) -> Vec<GridPos> {
    let old_log: Vec<f64> = old_p.iter().map(|p| p.ln()).collect();
    let new_log: Vec<f64> = new_p.iter().map(|p| p.ln()).collect();
    gridpos(&old_log, &new_log)
}

/// Set extrapolation points (fractional distance outside [0, 1]) to the
/// closest end point.
pub fn clamp_extrapolation(gp: &mut [GridPos]) {
    for g in gp {
        if g.fd[0] < 0. {
            g.fd = [0., 1.];
        } else if g.fd[0] > 1. {
            g.fd = [1., 0.];
        }
    }
}

/// Interpolate `y` (given on the old grid) to every grid position.
pub fn interp1(gp: &[GridPos], y: &[f64]) -> Vec<f64> {
    gp.iter().map(|g| g.interp(y)).collect()
}

/// Bilinear "green" interpolation: every combination of `gp_row` and `gp_col`.
pub fn interp2(gp_row: &[GridPos], gp_col: &[GridPos], y: ArrayView2<'_, f64>) -> Array2<f64> {
    let ncol_old = y.ncols();
    Array2::from_shape_fn((gp_row.len(), gp_col.len()), |(r, c)| {
        let (r0, r1) = (gp_row[r].idx, (gp_row[r].idx + 1).min(y.nrows() - 1));
        let (c0, c1) = (gp_col[c].idx, (gp_col[c].idx + 1).min(ncol_old - 1));
        let (wr0, wr1) = gp_row[r].weights();
        let (wc0, wc1) = gp_col[c].weights();
        wr0 * (wc0 * y[[r0, c0]] + wc1 * y[[r0, c1]]) + wr1 * (wc0 * y[[r1, c0]] + wc1 * y[[r1, c1]])
    })
}

/// Trilinear "green" interpolation.
pub fn interp3(
    gp_page: &[GridPos],
    gp_row: &[GridPos],
    gp_col: &[GridPos],
    y: ArrayView3<'_, f64>,
) -> Array3<f64> {
    let (np, nr, nc) = y.dim();
    Array3::from_shape_fn((gp_page.len(), gp_row.len(), gp_col.len()), |(p, r, c)| {
        let pages = [gp_page[p].idx, (gp_page[p].idx + 1).min(np - 1)];
        let rows = [gp_row[r].idx, (gp_row[r].idx + 1).min(nr - 1)];
        let cols = [gp_col[c].idx, (gp_col[c].idx + 1).min(nc - 1)];
        let wp = gp_page[p].weights();
        let wr = gp_row[r].weights();
        let wc = gp_col[c].weights();
        let wp = [wp.0, wp.1];
        let wr = [wr.0, wr.1];
        let wc = [wc.0, wc.1];

        let mut sum = 0.;
        for (ip, &pp) in pages.iter().enumerate() {
            for (ir, &rr) in rows.iter().enumerate() {
                for (ic, &cc) in cols.iter().enumerate() {
                    let w = wp[ip] * wr[ir] * wc[ic];
                    if w != 0. {
                        sum += w * y[[pp, rr, cc]];
                    }
                }
            }
        }
        sum
    })
}

/// Lagrange polynomial interpolation of the given order at `x`.
///
/// The `order + 1` supporting points are centered on the interval that holds
/// `x` and shifted inwards at the grid edges. The order is reduced if the grid
/// is too short.
pub fn interp_poly(old: &[f64], y: &[f64], x: f64, order: usize) -> f64 {
    let n = old.len();
    if n == 1 {
        return y[0];
    }
    let order = order.min(n - 1);
    let gp = gridpos_single(old, x);

    let half = (order.saturating_sub(1)) / 2;
    let start = gp.idx.saturating_sub(half).min(n - order - 1);

    let xs = &old[start..=start + order];
    let ys = &y[start..=start + order];
    let mut result = 0.;
    for (j, (&xj, &yj)) in xs.iter().zip(ys).enumerate() {
        let mut w = 1.;
        for (k, &xk) in xs.iter().enumerate() {
            if k != j {
                w *= (x - xk) / (xj - xk);
            }
        }
        result += w * yj;
    }
    result
}

/// `n` equally spaced values from `start` to `stop`, both included.
pub fn nlinspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut v: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            // Pin the end point exactly
            v[n - 1] = stop;
            v
        }
    }
}

/// Strictly increasing.
pub fn is_increasing(x: &[f64]) -> bool {
    x.windows(2).all(|w| w[1] > w[0])
}

/// Strictly decreasing.
pub fn is_decreasing(x: &[f64]) -> bool {
    x.windows(2).all(|w| w[1] < w[0])
}

/// Non-decreasing, duplicates allowed.
pub fn is_sorted(x: &[f64]) -> bool {
    x.windows(2).all(|w| w[1] >= w[0])
}

/// Step size if the grid is equidistant (relative tolerance 1e-6), else `None`.
pub fn equidistant_step(x: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    let step = x[1] - x[0];
    x.windows(2)
        .all(|w| ((w[1] - w[0]) - step).abs() <= 1e-6 * step.abs())
        .then_some(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn decreasing_grid_positions() {
        let old = [100., 50., 10.];
        let gp = gridpos(&old, &[75., 10., 5.]);
        assert_eq!(gp[0].idx, 0);
        assert_abs_diff_eq!(gp[0].fd[0], 0.5);
        assert_eq!(gp[1].idx, 1);
        assert_abs_diff_eq!(gp[1].fd[0], 1.0);
        // Extrapolation past the end
        assert!(gp[2].fd[0] > 1.);
        assert_abs_diff_eq!(interp1(&gp, &[1., 2., 3.])[2], 3.125, epsilon = 1e-12);
    }

    #[test]
    fn cubic_lagrange_is_exact_for_cubics() {
        let x = nlinspace(0., 10., 11);
        let y: Vec<f64> = x.iter().map(|x| x.powi(3) - 2. * x).collect();
        for xi in [0.3, 4.5, 9.9] {
            assert_abs_diff_eq!(interp_poly(&x, &y, xi, 3), xi.powi(3) - 2. * xi, epsilon = 1e-9);
        }
    }

    #[test]
    fn linspace_end_points() {
        let v = nlinspace(0., 180., 19);
        assert_eq!(v[0], 0.);
        assert_eq!(v[18], 180.);
        assert_eq!(equidistant_step(&v).map(|s| s.round()), Some(10.));
    }
}
