//! Angular grids, cloudbox limits and zenith angle interpolation.

use log::warn;
use ndarray::ArrayView1;
use smallvec::SmallVec;

use crate::error::RtError;
use crate::interp::{gridpos_single, interp_poly, is_increasing, nlinspace};

/// Smallest zenith angle grid size giving accurate scattering integrals
pub const MIN_ZA_GRID_SIZE: usize = 16;
/// Smallest azimuth angle grid size giving accurate scattering integrals
pub const MIN_AA_GRID_SIZE: usize = 6;
/// Grid sizes above this make the calculation very slow
pub const LARGE_GRID_SIZE: usize = 100;

/// Order of the polynomial zenith angle interpolation
const POLY_ORDER: usize = 2;

/// Zenith and azimuth angle grids of the scattering solver, in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct AngularGrids {
    /// Zenith angles of the radiation field, from 0 to 180
    pub za_grid: Vec<f64>,
    /// Azimuth angles, from 0 to 360
    pub aa_grid: Vec<f64>,
    /// Size of the equidistant zenith grid of the limb scattering integral
    pub za_grid_size: usize,
}

/// Set up the angular grids.
///
/// The azimuth grid is equidistant over [0, 360] with `n_aa` points. The
/// zenith grid of the radiation field is `za_grid_opt` if given (typically an
/// optimized grid, dense around 90°), else equidistant over [0, 180]. `n_za`
/// is also the size of the equidistant grid used by the limb scattering
/// integral.
pub fn doit_angular_grids_set(
    n_za: usize,
    n_aa: usize,
    za_grid_opt: Option<&[f64]>,
) -> Result<AngularGrids, RtError> {
    if n_za < MIN_ZA_GRID_SIZE {
        return Err(RtError::InvalidGrid(format!(
            "the zenith angle grid needs at least {MIN_ZA_GRID_SIZE} points for accurate results, got {n_za}"
        )));
    } else if n_za > LARGE_GRID_SIZE {
        warn!("the zenith angle grid size {n_za} is very large, the calculation will be very slow");
    }

    if n_aa < MIN_AA_GRID_SIZE {
        return Err(RtError::InvalidGrid(format!(
            "the azimuth angle grid needs at least {MIN_AA_GRID_SIZE} points for accurate results, got {n_aa}"
        )));
    } else if n_aa > LARGE_GRID_SIZE {
        warn!("the azimuth angle grid size {n_aa} is very large, the calculation will be very slow");
    }

    let za_grid = match za_grid_opt {
        Some(grid) => grid.to_vec(),
        None => nlinspace(0., 180., n_za),
    };

    Ok(AngularGrids {
        za_grid,
        aa_grid: nlinspace(0., 360., n_aa),
        za_grid_size: n_za,
    })
}

impl AngularGrids {
    /// Check the grid end points and ordering.
    pub fn check(&self) -> Result<(), RtError> {
        let za = &self.za_grid;
        if za.first() != Some(&0.) || za.last() != Some(&180.) {
            return Err(RtError::InvalidGrid("the zenith angle grid must span [0, 180]".into()));
        }
        if !is_increasing(za) {
            return Err(RtError::InvalidGrid("the zenith angle grid must be increasing".into()));
        }

        let aa = &self.aa_grid;
        if aa.first() != Some(&0.) || aa.last() != Some(&360.) {
            return Err(RtError::InvalidGrid("the azimuth angle grid must span [0, 360]".into()));
        }
        if !is_increasing(aa) {
            return Err(RtError::InvalidGrid("the azimuth angle grid must be increasing".into()));
        }

        if self.za_grid_size < MIN_ZA_GRID_SIZE {
            return Err(RtError::InvalidGrid(format!(
                "the scattering integral zenith grid needs at least {MIN_ZA_GRID_SIZE} points, got {}",
                self.za_grid_size
            )));
        } else if self.za_grid_size > LARGE_GRID_SIZE {
            warn!(
                "the scattering integral zenith grid size {} is very large, the calculation will be very slow",
                self.za_grid_size
            );
        }
        Ok(())
    }
}

/// Interpolation of the radiation field between zenith angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZaInterpolation {
    /// Linear
    #[default]
    Linear,
    /// Quadratic polynomial, 1D only
    Polynomial,
}

impl ZaInterpolation {
    /// Interpolate `values`, given on `za_grid`, at `za`.
    pub fn interp(&self, za_grid: &[f64], values: ArrayView1<'_, f64>, za: f64) -> f64 {
        match self {
            ZaInterpolation::Linear => {
                let gp = gridpos_single(za_grid, za);
                let (w0, w1) = gp.weights();
                if w1 == 0. {
                    values[gp.idx]
                } else {
                    w0 * values[gp.idx] + w1 * values[gp.idx + 1]
                }
            }
            ZaInterpolation::Polynomial => {
                let values: SmallVec<[f64; 128]> = values.iter().copied().collect();
                interp_poly(za_grid, &values, za, POLY_ORDER)
            }
        }
    }
}

/// Select the zenith angle interpolation by name, "linear" or "polynomial".
///
/// Polynomial interpolation can be numerically unstable in 3D and is only
/// allowed for 1D atmospheres.
pub fn doit_za_interp_set(atmosphere_dim: usize, method: &str) -> Result<ZaInterpolation, RtError> {
    if !(1..=3).contains(&atmosphere_dim) {
        return Err(RtError::InvalidArgument(format!(
            "atmosphere_dim must be 1, 2 or 3, got {atmosphere_dim}"
        )));
    }
    match method {
        "linear" => Ok(ZaInterpolation::Linear),
        "polynomial" if atmosphere_dim == 1 => Ok(ZaInterpolation::Polynomial),
        "polynomial" => Err(RtError::InvalidArgument(
            "polynomial zenith angle interpolation is only implemented for 1D".into(),
        )),
        _ => Err(RtError::InvalidArgument(format!(
            "unknown interpolation method '{method}', possible are 'linear' and 'polynomial'"
        ))),
    }
}

/// Index limits of the cloudbox in the atmospheric grids, inclusive:
/// `[p_lo, p_hi]` in 1D, plus `[lat_lo, lat_hi, lon_lo, lon_hi]` in 3D.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudboxLimits {
    limits: SmallVec<[usize; 6]>,
}

impl CloudboxLimits {
    /// The limits must have two entries per atmospheric dimension, with the
    /// lower limit below the upper one.
    pub fn new(limits: &[usize], atmosphere_dim: usize) -> Result<Self, RtError> {
        if atmosphere_dim != 1 && atmosphere_dim != 3 {
            return Err(RtError::InvalidArgument(format!(
                "scattering calculations need a 1D or 3D atmosphere, got atmosphere_dim = {atmosphere_dim}"
            )));
        }
        if limits.len() != 2 * atmosphere_dim {
            return Err(RtError::InconsistentInputs(format!(
                "cloudbox_limits has {} elements, expected 2 x atmosphere_dim = {}",
                limits.len(),
                2 * atmosphere_dim
            )));
        }
        if limits.chunks(2).any(|c| c[0] >= c[1]) {
            return Err(RtError::InvalidGrid(format!(
                "cloudbox limits {limits:?} must be pairs of increasing indices"
            )));
        }
        Ok(Self {
            limits: SmallVec::from_slice(limits),
        })
    }

    /// 1 or 3.
    pub fn atmosphere_dim(&self) -> usize {
        self.limits.len() / 2
    }

    /// Inclusive pressure index range.
    pub fn pressure(&self) -> (usize, usize) {
        (self.limits[0], self.limits[1])
    }

    /// Inclusive latitude index range, `(0, 0)` in 1D.
    pub fn latitude(&self) -> (usize, usize) {
        self.limits.get(2..4).map_or((0, 0), |l| (l[0], l[1]))
    }

    /// Inclusive longitude index range, `(0, 0)` in 1D.
    pub fn longitude(&self) -> (usize, usize) {
        self.limits.get(4..6).map_or((0, 0), |l| (l[0], l[1]))
    }

    /// Number of (pressure, latitude, longitude) points inside the cloudbox.
    pub fn shape(&self) -> (usize, usize, usize) {
        let n = |(lo, hi): (usize, usize)| hi - lo + 1;
        (n(self.pressure()), n(self.latitude()), n(self.longitude()))
    }

    /// The raw limits.
    pub fn as_slice(&self) -> &[usize] {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn grid_sizes() {
        let grids = doit_angular_grids_set(19, 10, None).unwrap();
        assert_eq!(grids.za_grid.len(), 19);
        assert_eq!(grids.za_grid[1], 10.);
        assert_eq!(grids.aa_grid[9], 360.);
        grids.check().unwrap();

        assert!(doit_angular_grids_set(15, 10, None).is_err());
        assert!(doit_angular_grids_set(16, 5, None).is_err());
        // Large grids only warn
        assert!(doit_angular_grids_set(101, 101, None).is_ok());
    }

    #[test]
    fn optimized_grid_is_checked() {
        let opt = [0., 20., 60., 85., 88., 90., 92., 95., 120., 180.];
        let grids = doit_angular_grids_set(19, 10, Some(&opt)).unwrap();
        assert_eq!(grids.za_grid, opt);
        assert_eq!(grids.za_grid_size, 19);
        grids.check().unwrap();

        let bad = [0., 20., 170.];
        assert!(doit_angular_grids_set(19, 10, Some(&bad)).unwrap().check().is_err());
        let unsorted = [0., 100., 90., 180.];
        assert!(doit_angular_grids_set(19, 10, Some(&unsorted)).unwrap().check().is_err());
    }

    #[test]
    fn za_interpolation() {
        let za = nlinspace(0., 180., 19);
        let values = Array1::from_iter(za.iter().map(|z| 2. * z + 1.));
        assert_relative_eq!(ZaInterpolation::Linear.interp(&za, values.view(), 37.), 75.);
        assert_relative_eq!(ZaInterpolation::Linear.interp(&za, values.view(), 180.), 361.);

        let quad = Array1::from_iter(za.iter().map(|z| z * z));
        assert_relative_eq!(
            ZaInterpolation::Polynomial.interp(&za, quad.view(), 93.),
            93. * 93.,
            max_relative = 1e-12
        );

        assert_eq!(doit_za_interp_set(1, "polynomial").unwrap(), ZaInterpolation::Polynomial);
        assert!(doit_za_interp_set(3, "polynomial").is_err());
        assert!(doit_za_interp_set(3, "cubic").is_err());
        assert_eq!(doit_za_interp_set(3, "linear").unwrap(), ZaInterpolation::Linear);
    }

    #[test]
    fn cloudbox_limits() {
        let limits = CloudboxLimits::new(&[2, 8], 1).unwrap();
        assert_eq!(limits.shape(), (7, 1, 1));
        assert_eq!(limits.latitude(), (0, 0));

        let limits = CloudboxLimits::new(&[0, 4, 1, 3, 2, 5], 3).unwrap();
        assert_eq!(limits.shape(), (5, 3, 4));
        assert_eq!(limits.atmosphere_dim(), 3);

        assert!(CloudboxLimits::new(&[2, 8], 3).is_err());
        assert!(CloudboxLimits::new(&[2, 8, 0, 1], 2).is_err());
        assert!(CloudboxLimits::new(&[4, 4], 1).is_err());
    }
}
