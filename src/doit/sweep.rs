//! Radiative transfer sweeps through the cloudbox.
//!
//! Each sweep updates the radiation field of every direction with one
//! emission and extinction step per layer, following the direction the
//! radiation travels so that updated values propagate through the whole
//! cloudbox in one pass. The geometry is that of spherical shells, a ray at
//! radius r and zenith angle za keeps the constant r·sin(za).

use log::debug;
use ndarray::{s, Array2, Array3, ArrayView3, ArrayView6, ArrayViewMut3, ArrayViewMut6, Axis};
use rayon::prelude::*;

use super::grids::ZaInterpolation;
use crate::error::RtError;
use crate::interp::is_increasing;
use crate::parallel;
use crate::physics::{invrayjean, planck};

/// Brightness temperature limits (K) per Stokes component for the limb
/// sub-iteration
const LIMB_EPSILON: [f64; 4] = [0.1, 0.01, 0.01, 0.01];
/// Maximum number of limb sub-iterations per sweep
const MAX_LIMB_PASSES: usize = 10;

/// Temperature and bulk optical properties of the levels of one cloudbox
/// column, bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOptics {
    r: Vec<f64>,
    t: Vec<f64>,
    ext: Vec<f64>,
    abs: Vec<f64>,
}

impl ColumnOptics {
    /// `z` are the altitudes (m) of the levels above a planet of radius
    /// `planet_radius` (m). `ext` and `abs` are the total extinction and
    /// absorption coefficients (1/m) of gases and particles.
    pub fn new(z: &[f64], planet_radius: f64, t: Vec<f64>, ext: Vec<f64>, abs: Vec<f64>) -> Result<Self, RtError> {
        let n = z.len();
        if n < 2 {
            return Err(RtError::InvalidGrid(format!("a column needs at least two levels, got {n}")));
        }
        if !is_increasing(z) {
            return Err(RtError::InvalidGrid("altitudes must be strictly increasing".into()));
        }
        if planet_radius.is_nan() || planet_radius <= 0. {
            return Err(RtError::InvalidArgument(format!(
                "planet radius must be positive, got {planet_radius}"
            )));
        }
        for (name, values) in [("t", &t), ("ext", &ext), ("abs", &abs)] {
            if values.len() != n {
                return Err(RtError::shape(name, [n], [values.len()]));
            }
        }
        if let Some(&x) = ext.iter().chain(&abs).find(|x| x.is_nan() || **x < 0.) {
            return Err(RtError::InvalidArgument(format!(
                "extinction and absorption must be non-negative, got {x}"
            )));
        }
        Ok(Self {
            r: z.iter().map(|z| planet_radius + z).collect(),
            t,
            ext,
            abs,
        })
    }

    /// Number of levels.
    pub fn levels(&self) -> usize {
        self.r.len()
    }

    /// Zenith angle (degrees) above which a ray leaving the top level
    /// downwards hits the bottom level.
    fn theta_lim(&self) -> f64 {
        180. - (self.r[0] / self.r[self.r.len() - 1]).asin().to_degrees()
    }
}

/// Where a ray from level `k` in direction `za` ends within one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PathStep {
    level: usize,
    za: f64,
    length: f64,
}

/// Follow the line of sight from level `k` backwards to the next level.
///
/// Uplooking rays reach level k+1, downlooking ones level k-1. Rays passing a
/// tangent point between the levels return to level k, mirrored about 90°.
fn path_step(r: &[f64], k: usize, za: f64) -> PathStep {
    let za_rad = za.to_radians();
    let c = r[k] * za_rad.sin();
    if za <= 90. {
        let r_end = r[k + 1];
        PathStep {
            level: k + 1,
            za: (c / r_end).min(1.).asin().to_degrees(),
            length: (r_end * r_end - c * c).sqrt() - r[k] * za_rad.cos(),
        }
    } else if c <= r[k - 1] {
        let r_end = r[k - 1];
        PathStep {
            level: k - 1,
            za: 180. - (c / r_end).min(1.).asin().to_degrees(),
            length: r[k] * za_rad.cos().abs() - (r_end * r_end - c * c).sqrt(),
        }
    } else {
        PathStep {
            level: k,
            za: 180. - za,
            length: 2. * r[k] * za_rad.cos().abs(),
        }
    }
}

/// One radiative transfer step into `field[k, iza]`.
#[allow(clippy::too_many_arguments)]
fn rt_step(
    field: &mut ArrayViewMut3<'_, f64>,
    scat: &ArrayView3<'_, f64>,
    optics: &ColumnOptics,
    za_grid: &[f64],
    za_interp: ZaInterpolation,
    f: f64,
    k: usize,
    iza: usize,
) {
    let step = path_step(&optics.r, k, za_grid[iza]);
    let end = step.level;
    let ext = 0.5 * (optics.ext[k] + optics.ext[end]);
    let abs = 0.5 * (optics.abs[k] + optics.abs[end]);
    let emission = abs * planck(f, 0.5 * (optics.t[k] + optics.t[end]));
    let trans = (-ext * step.length).exp();

    for s in 0..field.len_of(Axis(2)) {
        let i_end = za_interp.interp(za_grid, field.slice(s![end, .., s]), step.za);
        let scat_end = za_interp.interp(za_grid, scat.slice(s![end, .., s]), step.za);
        let mut source = 0.5 * (scat[[k, iza, s]] + scat_end);
        if s == 0 {
            source += emission;
        }
        field[[k, iza, s]] = if ext > 0. {
            i_end * trans + (1. - trans) * source / ext
        } else {
            i_end + step.length * source
        };
    }
}

/// Which part of the sweep a zenith angle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Limb,
    Down,
}

fn direction(za: f64, theta_lim: f64) -> Direction {
    if za <= 90. {
        Direction::Up
    } else if za >= theta_lim {
        Direction::Down
    } else {
        Direction::Limb
    }
}

/// Sweep the limb direction `iza` until it changes by no more than
/// [`LIMB_EPSILON`] at every level and Stokes component, at most
/// [`MAX_LIMB_PASSES`] times. Returns the number of passes.
#[allow(clippy::too_many_arguments)]
fn sweep_limb_angle(
    field: &mut ArrayViewMut3<'_, f64>,
    scat: &ArrayView3<'_, f64>,
    optics: &ColumnOptics,
    za_grid: &[f64],
    za_interp: ZaInterpolation,
    f: f64,
    iza: usize,
) -> usize {
    let top = field.len_of(Axis(0)) - 1;
    for pass in 1..=MAX_LIMB_PASSES {
        let old: Array2<f64> = field.slice(s![.., iza, ..]).to_owned();
        for k in 1..=top {
            rt_step(field, scat, optics, za_grid, za_interp, f, k, iza);
        }
        let settled = old
            .indexed_iter()
            .all(|((k, s), o)| invrayjean(field[[k, iza, s]] - o, f).abs() <= LIMB_EPSILON[s]);
        if settled {
            debug!("limb angle {} settled after {pass} passes", za_grid[iza]);
            return pass;
        }
    }
    debug!(
        "limb angle {} did not settle within {MAX_LIMB_PASSES} passes",
        za_grid[iza]
    );
    MAX_LIMB_PASSES
}

/// Sweep one column, dimensioned (p, za, stokes). The top level of the
/// uplooking and the bottom level of the downlooking directions are the
/// boundary conditions and remain unchanged.
///
/// Uplooking directions go first, then the limb directions and last the
/// downlooking ones, each in increasing zenith angle order. Every limb
/// direction is iterated on its own before the next one. With linear
/// interpolation every step then only reads values already updated in this
/// sweep.
fn sweep_column(
    mut field: ArrayViewMut3<'_, f64>,
    scat: ArrayView3<'_, f64>,
    optics: &ColumnOptics,
    za_grid: &[f64],
    za_interp: ZaInterpolation,
    f: f64,
) {
    let top = field.len_of(Axis(0)) - 1;
    let theta_lim = optics.theta_lim();

    for part in [Direction::Up, Direction::Limb, Direction::Down] {
        for (iza, &za) in za_grid.iter().enumerate() {
            if direction(za, theta_lim) != part {
                continue;
            }
            match part {
                Direction::Up => {
                    for k in (0..top).rev() {
                        rt_step(&mut field, &scat, optics, za_grid, za_interp, f, k, iza);
                    }
                }
                Direction::Limb => {
                    sweep_limb_angle(&mut field, &scat, optics, za_grid, za_interp, f, iza);
                }
                Direction::Down => {
                    for k in 1..=top {
                        rt_step(&mut field, &scat, optics, za_grid, za_interp, f, k, iza);
                    }
                }
            }
        }
    }
}

/// Sweep the radiation field of a 1D cloudbox, dimensioned (p, 1, 1, za, 1,
/// stokes), with the scattered field `scat_field` of the same shape as
/// source.
pub fn sweep_1d(
    mut i_field: ArrayViewMut6<'_, f64>,
    scat_field: ArrayView6<'_, f64>,
    optics: &ColumnOptics,
    za_grid: &[f64],
    za_interp: ZaInterpolation,
    f: f64,
) -> Result<(), RtError> {
    let stokes_dim = i_field.len_of(Axis(5));
    let expected = (optics.levels(), 1, 1, za_grid.len(), 1, stokes_dim);
    if i_field.dim() != expected {
        return Err(RtError::shape("1D radiation field", expected, i_field.dim()));
    }
    if scat_field.dim() != expected {
        return Err(RtError::shape("1D scattered field", expected, scat_field.dim()));
    }
    check_stokes_dim(stokes_dim)?;

    sweep_column(
        i_field.slice_mut(s![.., 0, 0, .., 0, ..]),
        scat_field.slice(s![.., 0, 0, .., 0, ..]),
        optics,
        za_grid,
        za_interp,
        f,
    );
    Ok(())
}

/// Sweep the radiation field of a 3D cloudbox, dimensioned (p, lat, lon, za,
/// aa, stokes).
///
/// Every (lat, lon) column is swept with its own optical properties,
/// `optics[lat * nlon + lon]`, independently for each azimuth angle.
pub fn sweep_3d(
    mut i_field: ArrayViewMut6<'_, f64>,
    scat_field: ArrayView6<'_, f64>,
    optics: &[ColumnOptics],
    za_grid: &[f64],
    za_interp: ZaInterpolation,
    f: f64,
) -> Result<(), RtError> {
    let (np, nlat, nlon, nza, naa, stokes_dim) = i_field.dim();
    if scat_field.dim() != i_field.dim() {
        return Err(RtError::shape("3D scattered field", i_field.dim(), scat_field.dim()));
    }
    if nza != za_grid.len() {
        let expected = (np, nlat, nlon, za_grid.len(), naa, stokes_dim);
        return Err(RtError::shape("3D radiation field", expected, i_field.dim()));
    }
    if optics.len() != nlat * nlon {
        return Err(RtError::shape("column optics", [nlat * nlon], [optics.len()]));
    }
    if let Some(column) = optics.iter().find(|c| c.levels() != np) {
        return Err(RtError::shape("column optics levels", [np], [column.levels()]));
    }
    check_stokes_dim(stokes_dim)?;

    let ncolumns = nlat * nlon * naa;
    let column = |index: usize| -> Array3<f64> {
        let (lat, lon, aa) = (index / (nlon * naa), (index / naa) % nlon, index % naa);
        let mut field = i_field.slice(s![.., lat, lon, .., aa, ..]).to_owned();
        sweep_column(
            field.view_mut(),
            scat_field.slice(s![.., lat, lon, .., aa, ..]),
            &optics[lat * nlon + lon],
            za_grid,
            za_interp,
            f,
        );
        field
    };

    let swept: Vec<Array3<f64>> = if parallel::should_parallelize(ncolumns) {
        (0..ncolumns)
            .into_par_iter()
            .map(|index| parallel::region(|| column(index)))
            .collect()
    } else {
        (0..ncolumns).map(&column).collect()
    };

    for (index, field) in swept.into_iter().enumerate() {
        let (lat, lon, aa) = (index / (nlon * naa), (index / naa) % nlon, index % naa);
        i_field.slice_mut(s![.., lat, lon, .., aa, ..]).assign(&field);
    }
    Ok(())
}

fn check_stokes_dim(stokes_dim: usize) -> Result<(), RtError> {
    if !(1..=4).contains(&stokes_dim) {
        return Err(RtError::InvalidArgument(format!(
            "stokes_dim must be 1 to 4, got {stokes_dim}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::nlinspace;
    use crate::physics::R_EARTH;
    use approx::assert_relative_eq;
    use ndarray::Array6;

    fn column(np: usize, t: f64, ext: f64, abs: f64) -> ColumnOptics {
        let z = nlinspace(0., 1e3 * (np - 1) as f64, np);
        ColumnOptics::new(&z, R_EARTH, vec![t; np], vec![ext; np], vec![abs; np]).unwrap()
    }

    /// Field with constant boundary radiances at the top and bottom.
    fn bounded_field(np: usize, za_grid: &[f64], top: f64, bottom: f64) -> Array6<f64> {
        let mut field = Array6::zeros((np, 1, 1, za_grid.len(), 1, 1));
        for (iza, &za) in za_grid.iter().enumerate() {
            if za <= 90. {
                field[[np - 1, 0, 0, iza, 0, 0]] = top;
            } else {
                field[[0, 0, 0, iza, 0, 0]] = bottom;
            }
        }
        field
    }

    #[test]
    fn isothermal_blackbody_is_unchanged() {
        let f = 150e9;
        let b = planck(f, 250.);
        let za = nlinspace(0., 180., 37);
        let optics = column(6, 250., 1e-4, 1e-4);
        let mut field = bounded_field(6, &za, b, b);
        let scat = Array6::zeros(field.dim());
        sweep_1d(field.view_mut(), scat.view(), &optics, &za, ZaInterpolation::Linear, f).unwrap();
        for &x in field.iter() {
            assert_relative_eq!(x, b, max_relative = 1e-12);
        }
    }

    #[test]
    fn single_layer_emission() {
        let f = 150e9;
        let za = nlinspace(0., 180., 19);
        let (ext, t) = (2e-4, 270.);
        let optics = column(2, t, ext, ext);
        let top = planck(f, 2.735);
        let bottom = planck(f, 290.);
        let mut field = bounded_field(2, &za, top, bottom);
        let scat = Array6::zeros(field.dim());
        sweep_1d(field.view_mut(), scat.view(), &optics, &za, ZaInterpolation::Linear, f).unwrap();

        let trans = (-ext * 1e3).exp();
        let b = planck(f, t);
        // Zenith at the bottom and nadir at the top
        assert_relative_eq!(field[[0, 0, 0, 0, 0, 0]], top * trans + (1. - trans) * b, max_relative = 1e-9);
        assert_relative_eq!(field[[1, 0, 0, 18, 0, 0]], bottom * trans + (1. - trans) * b, max_relative = 1e-9);
        // Boundaries stay
        assert_eq!(field[[1, 0, 0, 0, 0, 0]], top);
        assert_eq!(field[[0, 0, 0, 18, 0, 0]], bottom);
    }

    #[test]
    fn transparent_column_transports_boundaries() {
        let za = nlinspace(0., 180., 181);
        let optics = column(4, 250., 0., 0.);
        let mut field = bounded_field(4, &za, 1., 3.);
        let scat = Array6::zeros(field.dim());
        sweep_1d(field.view_mut(), scat.view(), &optics, &za, ZaInterpolation::Linear, 1e11).unwrap();

        for k in 0..4 {
            for (iza, &za) in za.iter().enumerate() {
                if za <= 90. {
                    assert_relative_eq!(field[[k, 0, 0, iza, 0, 0]], 1., max_relative = 1e-12);
                }
            }
            assert_relative_eq!(field[[k, 0, 0, 180, 0, 0]], 3., max_relative = 1e-12);
        }
        // Just below the horizon at the top the ray turns back upwards
        let iza = 91;
        assert!(za[iza] < optics.theta_lim());
        assert_relative_eq!(field[[3, 0, 0, iza, 0, 0]], 1., max_relative = 1e-12);
    }

    #[test]
    fn path_geometry() {
        let r = [R_EARTH, R_EARTH + 1e3, R_EARTH + 2e3];
        let up = path_step(&r, 0, 0.);
        assert_eq!(up.level, 1);
        assert_relative_eq!(up.length, 1e3, max_relative = 1e-9);
        let down = path_step(&r, 2, 180.);
        assert_eq!(down.level, 1);
        assert_relative_eq!(down.length, 1e3, max_relative = 1e-9);

        // Slant paths are longer and the zenith angle changes along them
        let slant = path_step(&r, 0, 60.);
        assert!(slant.length > 2e3 * 0.99 && slant.za < 60.);
        let horizon = path_step(&r, 1, 90.001);
        assert_eq!(horizon.level, 1);
        assert_relative_eq!(horizon.za, 89.999, max_relative = 1e-9);
    }

    #[test]
    fn limb_angles_settle_one_at_a_time() {
        let f = 150e9;
        let za = [0., 30., 60., 90., 90.5, 91., 120., 150., 180.];
        let optics = column(4, 260., 3e-5, 2e-5);
        let theta_lim = optics.theta_lim();
        let limb: Vec<usize> = (0..za.len())
            .filter(|&iza| direction(za[iza], theta_lim) == Direction::Limb)
            .collect();
        assert_eq!(limb, [4, 5]);

        let interp = ZaInterpolation::Polynomial;
        let initial = bounded_field(4, &za, planck(f, 2.735), planck(f, 280.));
        let scat = Array6::from_elem(initial.dim(), 1e-20);
        let mut swept = initial.clone();
        sweep_1d(swept.view_mut(), scat.view(), &optics, &za, interp, f).unwrap();

        // The same sweep, one direction at a time
        let mut expected = initial.clone();
        let mut col = expected.slice_mut(s![.., 0, 0, .., 0, ..]);
        let scat_col = scat.slice(s![.., 0, 0, .., 0, ..]);
        for iza in 0..4 {
            for k in (0..3).rev() {
                rt_step(&mut col, &scat_col, &optics, &za, interp, f, k, iza);
            }
        }
        for &iza in &limb {
            let passes = sweep_limb_angle(&mut col, &scat_col, &optics, &za, interp, f, iza);
            assert!((2..MAX_LIMB_PASSES).contains(&passes), "{passes} passes");

            // Another pass leaves this angle where it is before the next
            // one is touched
            let mut again = col.to_owned();
            let mut again_view = again.view_mut();
            for k in 1..4 {
                rt_step(&mut again_view, &scat_col, &optics, &za, interp, f, k, iza);
            }
            for k in 0..4 {
                let change = invrayjean(again[[k, iza, 0]] - col[[k, iza, 0]], f);
                assert!(change.abs() <= LIMB_EPSILON[0], "{change} K at level {k}");
            }
        }
        for iza in 6..za.len() {
            for k in 1..4 {
                rt_step(&mut col, &scat_col, &optics, &za, interp, f, k, iza);
            }
        }

        assert_eq!(swept, expected);
    }

    #[test]
    fn three_d_columns_match_one_d() {
        let f = 150e9;
        let za = nlinspace(0., 180., 19);
        let optics = column(3, 260., 3e-4, 2e-4);
        let top = planck(f, 2.735);
        let bottom = planck(f, 280.);

        let mut field_1d = bounded_field(3, &za, top, bottom);
        let scat_1d = Array6::from_elem(field_1d.dim(), 1e-20);
        sweep_1d(field_1d.view_mut(), scat_1d.view(), &optics, &za, ZaInterpolation::Linear, f).unwrap();

        let mut field_3d = Array6::zeros((3, 2, 2, 19, 6, 1));
        for lat in 0..2 {
            for lon in 0..2 {
                for aa in 0..6 {
                    field_3d
                        .slice_mut(s![.., lat, lon, .., aa, ..])
                        .assign(&bounded_field(3, &za, top, bottom).slice(s![.., 0, 0, .., 0, ..]));
                }
            }
        }
        let scat_3d = Array6::from_elem(field_3d.dim(), 1e-20);
        let columns = vec![optics.clone(); 4];
        sweep_3d(field_3d.view_mut(), scat_3d.view(), &columns, &za, ZaInterpolation::Linear, f).unwrap();

        for ((p, _, _, z, _, s), &x) in field_3d.indexed_iter() {
            assert_relative_eq!(x, field_1d[[p, 0, 0, z, 0, s]], max_relative = 1e-12);
        }

        let too_few = &columns[..3];
        assert!(sweep_3d(field_3d.view_mut(), scat_3d.view(), too_few, &za, ZaInterpolation::Linear, f).is_err());
    }

    #[test]
    fn invalid_columns() {
        assert!(ColumnOptics::new(&[0.], R_EARTH, vec![250.], vec![0.], vec![0.]).is_err());
        assert!(ColumnOptics::new(&[0., 1e3], R_EARTH, vec![250.; 2], vec![0.; 3], vec![0.; 2]).is_err());
        assert!(ColumnOptics::new(&[1e3, 0.], R_EARTH, vec![250.; 2], vec![0.; 2], vec![0.; 2]).is_err());
        assert!(ColumnOptics::new(&[0., 1e3], R_EARTH, vec![250.; 2], vec![-1.; 2], vec![0.; 2]).is_err());
    }
}
