//! The scattering integral.
//!
//! For every point of the cloudbox and every propagation direction, the phase
//! matrix summed over the particle types (weighted by their number densities)
//! is multiplied with the incoming radiation and integrated over all incoming
//! directions with the trapezoidal rule.

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayView4, ArrayView6, ArrayViewMut6, Axis};
use rayon::prelude::*;
use smallvec::SmallVec;

use super::grids::{AngularGrids, ZaInterpolation};
use super::optics::{cos_scattering_angle, ParticleOptics};
use crate::error::RtError;
use crate::interp::{equidistant_step, nlinspace};
use crate::parallel;
use crate::physics::DEG2RAD;

/// Particles in the cloudbox.
#[derive(Debug, Clone, Copy)]
pub struct ParticleField<'a> {
    /// Optical properties of each particle type
    pub particles: &'a [Box<dyn ParticleOptics>],
    /// Number densities (1/m³), dimensioned (type, p, lat, lon) over the
    /// cloudbox
    pub pnd: ArrayView4<'a, f64>,
    /// Temperature (K), dimensioned (p, lat, lon) over the cloudbox
    pub t: ArrayView3<'a, f64>,
}

impl ParticleField<'_> {
    fn check(&self, np: usize, nlat: usize, nlon: usize) -> Result<(), RtError> {
        let expected = (self.particles.len(), np, nlat, nlon);
        if self.pnd.dim() != expected {
            return Err(RtError::shape("pnd_field", expected, self.pnd.dim()));
        }
        if self.t.dim() != (np, nlat, nlon) {
            return Err(RtError::shape("t_field", (np, nlat, nlon), self.t.dim()));
        }
        Ok(())
    }

    /// Phase matrix sum at one point, `None` if there are no particles.
    fn at_point(&self, p: usize, lat: usize, lon: usize, f: f64) -> Option<PointPhase<'_>> {
        let pnd: SmallVec<[f64; 8]> = self.pnd.slice(s![.., p, lat, lon]).iter().copied().collect();
        pnd.iter().any(|&n| n != 0.).then(|| PointPhase {
            particles: self.particles,
            pnd,
            t: self.t[[p, lat, lon]],
            f,
        })
    }
}

struct PointPhase<'a> {
    particles: &'a [Box<dyn ParticleOptics>],
    pnd: SmallVec<[f64; 8]>,
    t: f64,
    f: f64,
}

impl PointPhase<'_> {
    /// Sum of `pnd * Z` over the particle types into `z_sum`.
    fn fill(&self, cos_scat: f64, z_sum: &mut Array2<f64>, z: &mut Array2<f64>) {
        z_sum.fill(0.);
        for (particle, &n) in self.particles.iter().zip(&self.pnd) {
            if n == 0. {
                continue;
            }
            particle.phase_matrix(self.f, self.t, cos_scat, z.view_mut());
            z_sum.scaled_add(n, z);
        }
    }
}

/// Integrate over all directions, `integrand` dimensioned (za, aa), grids in
/// degrees. The integrand is weighted by sin(za).
pub fn ang_integrate_trapezoid(integrand: ArrayView2<'_, f64>, za_grid: &[f64], aa_grid: &[f64]) -> f64 {
    let res1: SmallVec<[f64; 128]> = integrand
        .outer_iter()
        .zip(za_grid)
        .map(|(row, za)| {
            let sin_za = (za * DEG2RAD).sin();
            (0..aa_grid.len() - 1)
                .map(|j| 0.5 * DEG2RAD * (row[j] + row[j + 1]) * (aa_grid[j + 1] - aa_grid[j]) * sin_za)
                .sum::<f64>()
        })
        .collect();

    (0..za_grid.len() - 1)
        .map(|i| 0.5 * DEG2RAD * (res1[i] + res1[i + 1]) * (za_grid[i + 1] - za_grid[i]))
        .sum()
}

/// As [`ang_integrate_trapezoid`], faster for equidistant grids with the
/// steps `grid_stepsize = [za_step, aa_step]`. A step that is not positive
/// falls back to the general rule.
pub fn ang_integrate_trapezoid_opti(
    integrand: ArrayView2<'_, f64>,
    za_grid: &[f64],
    aa_grid: &[f64],
    grid_stepsize: [f64; 2],
) -> f64 {
    let [step_za, step_aa] = grid_stepsize;
    if step_za <= 0. || step_aa <= 0. {
        return ang_integrate_trapezoid(integrand, za_grid, aa_grid);
    }

    let naa = aa_grid.len();
    let res1 = integrand.outer_iter().zip(za_grid).map(|(row, za)| {
        trapezoid_sum(row.iter().copied(), naa) * 0.5 * DEG2RAD * step_aa * (za * DEG2RAD).sin()
    });
    trapezoid_sum(res1, za_grid.len()) * 0.5 * DEG2RAD * step_za
}

/// Sum with the end points weighted once and the inner points twice.
fn trapezoid_sum(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    values
        .enumerate()
        .map(|(j, v)| if j == 0 || j == n - 1 { v } else { 2. * v })
        .sum()
}

fn grid_steps(za_grid: &[f64], aa_grid: &[f64]) -> [f64; 2] {
    [
        equidistant_step(za_grid).unwrap_or(0.),
        equidistant_step(aa_grid).unwrap_or(0.),
    ]
}

/// Scattering integral at one point of an azimuthally symmetric field.
///
/// `i_in` is dimensioned (za, stokes) on `za_grid`, the result is given for
/// the propagation directions of `za_grid` at azimuth 0.
fn point_integral_1d(
    phase: &PointPhase<'_>,
    i_in: ArrayView2<'_, f64>,
    za_grid: &[f64],
    aa_grid: &[f64],
    steps: [f64; 2],
) -> Array2<f64> {
    let (nza, stokes_dim) = i_in.dim();
    let naa = aa_grid.len();
    let mut out = Array2::zeros((nza, stokes_dim));
    let mut product = Array3::zeros((stokes_dim, nza, naa));
    let mut z_sum = Array2::zeros((stokes_dim, stokes_dim));
    let mut z = Array2::zeros((stokes_dim, stokes_dim));

    for (za_sca_index, &za_sca) in za_grid.iter().enumerate() {
        for (za_in, &za_inc) in za_grid.iter().enumerate() {
            let i_inc = i_in.row(za_in);
            for (aa_in, &aa_inc) in aa_grid.iter().enumerate() {
                phase.fill(cos_scattering_angle(za_inc, aa_inc, za_sca, 0.), &mut z_sum, &mut z);
                for s in 0..stokes_dim {
                    product[[s, za_in, aa_in]] = z_sum.row(s).dot(&i_inc);
                }
            }
        }
        for s in 0..stokes_dim {
            out[[za_sca_index, s]] =
                ang_integrate_trapezoid_opti(product.index_axis(Axis(0), s), za_grid, aa_grid, steps);
        }
    }
    out
}

fn check_1d_fields(
    i_field: &ArrayView6<'_, f64>,
    scat_field: &ArrayViewMut6<'_, f64>,
    grids: &AngularGrids,
) -> Result<(usize, usize), RtError> {
    let (np, nlat, nlon, nza, naa, stokes_dim) = i_field.dim();
    let expected = (np, 1, 1, grids.za_grid.len(), 1, stokes_dim);
    if (np, nlat, nlon, nza, naa, stokes_dim) != expected {
        return Err(RtError::shape("1D radiation field", expected, i_field.dim()));
    }
    if scat_field.dim() != expected {
        return Err(RtError::shape("1D scattered field", expected, scat_field.dim()));
    }
    Ok((np, stokes_dim))
}

/// Run `level` for every pressure level, in parallel if worthwhile, and copy
/// the (za, stokes) results into the scattered field.
fn for_each_level_1d(
    mut scat_field: ArrayViewMut6<'_, f64>,
    np: usize,
    level: impl Fn(usize) -> Option<Array2<f64>> + Sync,
) {
    let results: Vec<Option<Array2<f64>>> = if parallel::should_parallelize(np) {
        (0..np)
            .into_par_iter()
            .map(|k| parallel::region(|| level(k)))
            .collect()
    } else {
        (0..np).map(&level).collect()
    };

    for (k, result) in results.into_iter().enumerate() {
        let mut target = scat_field.slice_mut(s![k, 0, 0, .., 0, ..]);
        match result {
            Some(values) => target.assign(&values),
            None => target.fill(0.),
        }
    }
}

/// Scattering integral of a 1D field, on the zenith grid of the field.
pub fn scat_field_1d(
    scat_field: ArrayViewMut6<'_, f64>,
    i_field: ArrayView6<'_, f64>,
    particles: &ParticleField<'_>,
    grids: &AngularGrids,
    f: f64,
) -> Result<(), RtError> {
    let (np, _) = check_1d_fields(&i_field, &scat_field, grids)?;
    particles.check(np, 1, 1)?;
    let steps = grid_steps(&grids.za_grid, &grids.aa_grid);

    for_each_level_1d(scat_field, np, |k| {
        let phase = particles.at_point(k, 0, 0, f)?;
        let i_in = i_field.slice(s![k, 0, 0, .., 0, ..]);
        Some(point_integral_1d(&phase, i_in, &grids.za_grid, &grids.aa_grid, steps))
    });
    Ok(())
}

/// Scattering integral of a 1D field, evaluated on an equidistant zenith grid
/// of `grids.za_grid_size` points.
///
/// The field is interpolated to the equidistant grid and the result back to
/// the zenith grid of the field. This suits optimized zenith grids, which are
/// dense around 90° for limb geometries.
pub fn scat_field_limb_1d(
    scat_field: ArrayViewMut6<'_, f64>,
    i_field: ArrayView6<'_, f64>,
    particles: &ParticleField<'_>,
    grids: &AngularGrids,
    za_interp: ZaInterpolation,
    f: f64,
) -> Result<(), RtError> {
    let (np, stokes_dim) = check_1d_fields(&i_field, &scat_field, grids)?;
    particles.check(np, 1, 1)?;

    let za_grid = &grids.za_grid;
    let za_int = nlinspace(0., 180., grids.za_grid_size);
    let steps = grid_steps(&za_int, &grids.aa_grid);

    let to_grid = |values: ArrayView2<'_, f64>, from: &[f64], to: &[f64]| {
        Array2::from_shape_fn((to.len(), stokes_dim), |(j, s)| {
            za_interp.interp(from, values.column(s), to[j])
        })
    };

    for_each_level_1d(scat_field, np, |k| {
        let phase = particles.at_point(k, 0, 0, f)?;
        let i_int = to_grid(i_field.slice(s![k, 0, 0, .., 0, ..]), za_grid, &za_int);
        let scat_int = point_integral_1d(&phase, i_int.view(), &za_int, &grids.aa_grid, steps);
        Some(to_grid(scat_int.view(), &za_int, za_grid))
    });
    Ok(())
}

/// Scattering integral of a 3D field.
///
/// Every propagation direction (za, aa) integrates the phase matrix times the
/// radiation arriving from each incoming direction of the angular grids.
pub fn scat_field_3d(
    mut scat_field: ArrayViewMut6<'_, f64>,
    i_field: ArrayView6<'_, f64>,
    particles: &ParticleField<'_>,
    grids: &AngularGrids,
    f: f64,
) -> Result<(), RtError> {
    let (np, nlat, nlon, nza, naa, stokes_dim) = i_field.dim();
    let expected = (np, nlat, nlon, grids.za_grid.len(), grids.aa_grid.len(), stokes_dim);
    if i_field.dim() != expected {
        return Err(RtError::shape("3D radiation field", expected, i_field.dim()));
    }
    if scat_field.dim() != expected {
        return Err(RtError::shape("3D scattered field", expected, scat_field.dim()));
    }
    particles.check(np, nlat, nlon)?;

    let za_grid = &grids.za_grid;
    let aa_grid = &grids.aa_grid;
    let steps = grid_steps(za_grid, aa_grid);

    let point = |index: usize| -> Option<Array3<f64>> {
        let (p, lat, lon) = (index / (nlat * nlon), (index / nlon) % nlat, index % nlon);
        let phase = particles.at_point(p, lat, lon, f)?;
        let i_in = i_field.slice(s![p, lat, lon, .., .., ..]);

        let mut out = Array3::zeros((nza, naa, stokes_dim));
        let mut product = Array3::zeros((stokes_dim, nza, naa));
        let mut z_sum = Array2::zeros((stokes_dim, stokes_dim));
        let mut z = Array2::zeros((stokes_dim, stokes_dim));
        for (za_s, &za_sca) in za_grid.iter().enumerate() {
            for (aa_s, &aa_sca) in aa_grid.iter().enumerate() {
                for (za_in, &za_inc) in za_grid.iter().enumerate() {
                    for (aa_in, &aa_inc) in aa_grid.iter().enumerate() {
                        phase.fill(cos_scattering_angle(za_inc, aa_inc, za_sca, aa_sca), &mut z_sum, &mut z);
                        let i_inc: ArrayView1<'_, f64> = i_in.slice(s![za_in, aa_in, ..]);
                        for s in 0..stokes_dim {
                            product[[s, za_in, aa_in]] = z_sum.row(s).dot(&i_inc);
                        }
                    }
                }
                for s in 0..stokes_dim {
                    out[[za_s, aa_s, s]] =
                        ang_integrate_trapezoid_opti(product.index_axis(Axis(0), s), za_grid, aa_grid, steps);
                }
            }
        }
        Some(out)
    };

    let npoints = np * nlat * nlon;
    let results: Vec<Option<Array3<f64>>> = if parallel::should_parallelize(npoints) {
        (0..npoints)
            .into_par_iter()
            .map(|index| parallel::region(|| point(index)))
            .collect()
    } else {
        (0..npoints).map(&point).collect()
    };

    for (index, result) in results.into_iter().enumerate() {
        let (p, lat, lon) = (index / (nlat * nlon), (index / nlon) % nlat, index % nlon);
        let mut target = scat_field.slice_mut(s![p, lat, lon, .., .., ..]);
        match result {
            Some(values) => target.assign(&values),
            None => target.fill(0.),
        }
    }
    Ok(())
}
