//! Atmospheric and retrieval grids, and the perturbation fields built on them.
//!
//! A perturbation grid is a retrieval grid with one extra point on each side,
//! placed outside the atmospheric grid. A perturbation of a retrieval point is
//! set on the perturbation grid and interpolated onto the atmospheric grid.
//! The edge points of the retrieval grid also perturb the outer points, so the
//! perturbation continues to the end of the atmosphere instead of tapering off.

use std::ops::Range;

use ndarray::{s, Array2, Array3, ArrayViewMut1, ArrayViewMut2, ArrayViewMut3, Zip};

use crate::error::RtError;
use crate::interp::{gridpos, interp1, interp2, interp3, is_decreasing, is_increasing, p2gridpos, GridPos};

/// Pressure, latitude and longitude grids of the atmosphere.
///
/// A 1D atmosphere has no latitude or longitude grid and a 2D atmosphere no
/// longitude grid. Fields on these grids are still dimensioned (p, lat, lon)
/// with length 1 for the missing dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphericGrids {
    atmosphere_dim: usize,
    p_grid: Vec<f64>,
    lat_grid: Vec<f64>,
    lon_grid: Vec<f64>,
}

impl AtmosphericGrids {
    /// Validate and build the grids. The pressure grid (Pa) must be strictly
    /// decreasing, latitude and longitude grids strictly increasing, and all
    /// used grids need at least two points.
    pub fn new(
        atmosphere_dim: usize,
        p_grid: &[f64],
        lat_grid: &[f64],
        lon_grid: &[f64],
    ) -> Result<Self, RtError> {
        if !(1..=3).contains(&atmosphere_dim) {
            return Err(RtError::InvalidArgument(format!(
                "atmosphere dimensionality must be 1, 2 or 3, got {atmosphere_dim}"
            )));
        }
        if p_grid.len() < 2 || !is_decreasing(p_grid) || p_grid.iter().any(|&p| p <= 0.) {
            return Err(RtError::InvalidGrid(
                "pressure grid needs at least two positive, strictly decreasing values".to_string(),
            ));
        }
        for (name, grid, used) in [
            ("latitude", lat_grid, atmosphere_dim >= 2),
            ("longitude", lon_grid, atmosphere_dim == 3),
        ] {
            if used && (grid.len() < 2 || !is_increasing(grid)) {
                return Err(RtError::InvalidGrid(format!(
                    "{name} grid needs at least two strictly increasing values"
                )));
            }
            if !used && !grid.is_empty() {
                return Err(RtError::InvalidGrid(format!(
                    "{name} grid must be empty for a {atmosphere_dim}D atmosphere"
                )));
            }
        }

        Ok(Self {
            atmosphere_dim,
            p_grid: p_grid.to_vec(),
            lat_grid: lat_grid.to_vec(),
            lon_grid: lon_grid.to_vec(),
        })
    }

    /// 1, 2 or 3
    pub fn atmosphere_dim(&self) -> usize {
        self.atmosphere_dim
    }

    /// Pressure grid in Pa
    pub fn p_grid(&self) -> &[f64] {
        &self.p_grid
    }

    /// Latitude grid in degrees, empty for 1D
    pub fn lat_grid(&self) -> &[f64] {
        &self.lat_grid
    }

    /// Longitude grid in degrees, empty below 3D
    pub fn lon_grid(&self) -> &[f64] {
        &self.lon_grid
    }

    /// Shape (p, lat, lon) of fields on these grids.
    pub fn field_shape(&self) -> (usize, usize, usize) {
        (
            self.p_grid.len(),
            self.lat_grid.len().max(1),
            self.lon_grid.len().max(1),
        )
    }
}

/// Check the retrieval grids of one quantity against the atmospheric grids and
/// return the grids that apply to the atmosphere dimensionality.
///
/// Each retrieval grid must be non-empty and strictly monotonic (decreasing
/// pressure, increasing latitude and longitude). Its end points may reach
/// beyond the atmospheric grid by up to half of the outermost atmospheric
/// grid step, which for pressure is measured in log(p).
pub fn check_retrieval_grids(
    atmosphere: &AtmosphericGrids,
    p_retr: &[f64],
    lat_retr: &[f64],
    lon_retr: &[f64],
) -> Result<Vec<Vec<f64>>, RtError> {
    let p_grid = atmosphere.p_grid();
    if p_retr.is_empty() {
        return Err(RtError::InvalidGrid(
            "the retrieval pressure grid is empty, at least one pressure level should be specified"
                .to_string(),
        ));
    }
    if !is_decreasing(p_retr) || p_retr.iter().any(|&p| p <= 0.) {
        return Err(RtError::InvalidGrid(
            "the retrieval pressure grid is not a strictly decreasing vector of positive values"
                .to_string(),
        ));
    }
    let n = p_grid.len();
    let top = p_retr[p_retr.len() - 1];
    if p_retr[0].ln() > 1.5 * p_grid[0].ln() - 0.5 * p_grid[1].ln()
        || top.ln() < 1.5 * p_grid[n - 1].ln() - 0.5 * p_grid[n - 2].ln()
    {
        return Err(RtError::GridCoverage("for pressure".to_string()));
    }
    let mut grids = vec![p_retr.to_vec()];

    let horizontal = [
        ("latitude", atmosphere.lat_grid(), lat_retr),
        ("longitude", atmosphere.lon_grid(), lon_retr),
    ];
    for (name, atm_grid, retr) in horizontal.into_iter().take(atmosphere.atmosphere_dim() - 1) {
        if retr.is_empty() {
            return Err(RtError::InvalidGrid(format!(
                "the retrieval {name} grid is empty, at least one {name} should be specified"
            )));
        }
        if !is_increasing(retr) {
            return Err(RtError::InvalidGrid(format!(
                "the retrieval {name} grid is not a strictly increasing vector"
            )));
        }
        let n = atm_grid.len();
        if retr[0] < 1.5 * atm_grid[0] - 0.5 * atm_grid[1]
            || retr[retr.len() - 1] > 1.5 * atm_grid[n - 1] - 0.5 * atm_grid[n - 2]
        {
            return Err(RtError::GridCoverage(format!("for {name}")));
        }
        grids.push(retr.to_vec());
    }

    Ok(grids)
}

/// Grid positions of the atmospheric grid on the perturbation grid of
/// `jac_grid`.
///
/// The perturbation grid extends the retrieval grid by a factor 10 in pressure
/// (or 1 degree for angles) beyond each end of the atmospheric grid.
/// Pressure grids are interpolated in log(p).
pub fn get_perturbation_gridpos(atm_grid: &[f64], jac_grid: &[f64], is_pressure: bool) -> Vec<GridPos> {
    let na = atm_grid.len();
    let mut pert = Vec::with_capacity(jac_grid.len() + 2);
    if is_pressure {
        pert.push(atm_grid[0] * 10.);
        pert.extend_from_slice(jac_grid);
        pert.push(atm_grid[na - 1] * 0.1);
        p2gridpos(&pert, atm_grid)
    } else {
        pert.push(atm_grid[0] - 1.);
        pert.extend_from_slice(jac_grid);
        pert.push(atm_grid[na - 1] + 1.);
        gridpos(&pert, atm_grid)
    }
}

/// Indices of the perturbation grid that are perturbed together with point
/// `index` of a retrieval grid of `length` points.
///
/// The first retrieval point also perturbs the extra outer point below it,
/// the last one the extra point above it.
pub fn get_perturbation_range(index: usize, length: usize) -> Range<usize> {
    if index == 0 {
        0..2
    } else if index + 1 == length {
        index + 1..index + 3
    } else {
        index + 1..index + 2
    }
}

/// Whether a perturbation scales or shifts the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerturbationMode {
    /// The field is multiplied by `1 + size`
    Relative,
    /// `size` is added to the field
    Absolute,
}

impl PerturbationMode {
    fn unperturbed(&self) -> f64 {
        match self {
            PerturbationMode::Relative => 1.,
            PerturbationMode::Absolute => 0.,
        }
    }

    fn apply(&self, field: f64, pert: f64) -> f64 {
        match self {
            PerturbationMode::Relative => field * pert,
            PerturbationMode::Absolute => field + pert,
        }
    }
}

/// Perturb a profile.
///
/// `p_gp` holds the positions of the atmospheric grid on a perturbation grid of
/// `p_pert_n` points, and `p_range` the perturbed points of that grid.
pub fn perturbation_field_1d(
    mut field: ArrayViewMut1<'_, f64>,
    p_gp: &[GridPos],
    p_pert_n: usize,
    p_range: Range<usize>,
    size: f64,
    mode: PerturbationMode,
) -> Result<(), RtError> {
    if field.len() != p_gp.len() {
        return Err(RtError::shape("perturbed profile", p_gp.len(), field.len()));
    }
    let mut pert_field = vec![mode.unperturbed(); p_pert_n];
    pert_field[p_range].iter_mut().for_each(|x| *x += size);
    let pert = interp1(p_gp, &pert_field);
    field.iter_mut().zip(pert).for_each(|(x, p)| *x = mode.apply(*x, p));
    Ok(())
}

/// Perturb a (p, lat) field.
#[allow(clippy::too_many_arguments)]
pub fn perturbation_field_2d(
    mut field: ArrayViewMut2<'_, f64>,
    p_gp: &[GridPos],
    lat_gp: &[GridPos],
    p_pert_n: usize,
    lat_pert_n: usize,
    p_range: Range<usize>,
    lat_range: Range<usize>,
    size: f64,
    mode: PerturbationMode,
) -> Result<(), RtError> {
    let expected = (p_gp.len(), lat_gp.len());
    if field.dim() != expected {
        return Err(RtError::shape("perturbed field", expected, field.dim()));
    }
    let mut pert_field = Array2::from_elem((p_pert_n, lat_pert_n), mode.unperturbed());
    pert_field.slice_mut(s![p_range, lat_range]).map_inplace(|x| *x += size);
    let pert = interp2(p_gp, lat_gp, pert_field.view());
    Zip::from(&mut field).and(&pert).for_each(|x, &p| *x = mode.apply(*x, p));
    Ok(())
}

/// Perturb a (p, lat, lon) field.
#[allow(clippy::too_many_arguments)]
pub fn perturbation_field_3d(
    mut field: ArrayViewMut3<'_, f64>,
    p_gp: &[GridPos],
    lat_gp: &[GridPos],
    lon_gp: &[GridPos],
    pert_n: [usize; 3],
    p_range: Range<usize>,
    lat_range: Range<usize>,
    lon_range: Range<usize>,
    size: f64,
    mode: PerturbationMode,
) -> Result<(), RtError> {
    let expected = (p_gp.len(), lat_gp.len(), lon_gp.len());
    if field.dim() != expected {
        return Err(RtError::shape("perturbed field", expected, field.dim()));
    }
    let mut pert_field = Array3::from_elem((pert_n[0], pert_n[1], pert_n[2]), mode.unperturbed());
    pert_field
        .slice_mut(s![p_range, lat_range, lon_range])
        .map_inplace(|x| *x += size);
    let pert = interp3(p_gp, lat_gp, lon_gp, pert_field.view());
    Zip::from(&mut field).and(&pert).for_each(|x, &p| *x = mode.apply(*x, p));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    fn grids_1d() -> AtmosphericGrids {
        AtmosphericGrids::new(1, &[1000e2, 500e2, 250e2, 100e2], &[], &[]).unwrap()
    }

    #[test]
    fn retrieval_grid_coverage() {
        let atm = grids_1d();
        assert!(check_retrieval_grids(&atm, &[1000e2, 100e2], &[], &[]).is_ok());
        // Half a grid step in log(p) beyond the bottom is still covered
        let edge = (1.5 * 1000e2_f64.ln() - 0.5 * 500e2_f64.ln()).exp();
        assert!(check_retrieval_grids(&atm, &[edge * 0.999, 100e2], &[], &[]).is_ok());
        assert!(matches!(
            check_retrieval_grids(&atm, &[edge * 1.01, 100e2], &[], &[]),
            Err(RtError::GridCoverage(_))
        ));
        assert!(matches!(
            check_retrieval_grids(&atm, &[1000e2, 10e2], &[], &[]),
            Err(RtError::GridCoverage(_))
        ));
        assert!(matches!(
            check_retrieval_grids(&atm, &[], &[], &[]),
            Err(RtError::InvalidGrid(_))
        ));
        assert!(matches!(
            check_retrieval_grids(&atm, &[100e2, 1000e2], &[], &[]),
            Err(RtError::InvalidGrid(_))
        ));

        let atm = AtmosphericGrids::new(2, &[1000e2, 100e2], &[0., 10., 20.], &[]).unwrap();
        let grids = check_retrieval_grids(&atm, &[1000e2], &[-4., 24.], &[99.]).unwrap();
        assert_eq!(grids.len(), 2);
        assert!(matches!(
            check_retrieval_grids(&atm, &[1000e2], &[-6., 10.], &[]),
            Err(RtError::GridCoverage(_))
        ));
        assert!(check_retrieval_grids(&atm, &[1000e2], &[], &[]).is_err());
    }

    #[test]
    fn atmospheric_grids_are_validated() {
        assert!(AtmosphericGrids::new(1, &[100e2, 1000e2], &[], &[]).is_err());
        assert!(AtmosphericGrids::new(1, &[1000e2, 100e2], &[0., 1.], &[]).is_err());
        assert!(AtmosphericGrids::new(3, &[1000e2, 100e2], &[0., 1.], &[5.]).is_err());
        assert!(AtmosphericGrids::new(4, &[1000e2, 100e2], &[], &[]).is_err());
        let atm = AtmosphericGrids::new(3, &[1000e2, 100e2], &[0., 1.], &[5., 6., 7.]).unwrap();
        assert_eq!(atm.field_shape(), (2, 2, 3));
    }

    #[test]
    fn perturbation_ranges() {
        assert_eq!(get_perturbation_range(0, 4), 0..2);
        assert_eq!(get_perturbation_range(1, 4), 2..3);
        assert_eq!(get_perturbation_range(3, 4), 4..6);
        assert_eq!(get_perturbation_range(0, 1), 0..2);
    }

    #[test]
    fn edge_perturbations_extend_outwards() {
        let atm = grids_1d();
        // Retrieval grid on every second level
        let jac_grid = [1000e2, 250e2];
        let gp = get_perturbation_gridpos(atm.p_grid(), &jac_grid, true);

        // Lowest retrieval point: full perturbation at and below it, fading
        // towards the next retrieval point
        let mut field = Array1::from_elem(4, 1.);
        let range = get_perturbation_range(0, 2);
        perturbation_field_1d(field.view_mut(), &gp, 4, range, 0.1, PerturbationMode::Relative).unwrap();
        assert_abs_diff_eq!(field[0], 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(field[1], 1.05, epsilon = 1e-12);
        assert_abs_diff_eq!(field[2], 1., epsilon = 1e-12);
        assert!(field[3] < 1.0001);

        // Highest retrieval point continues to the top of the atmosphere
        let mut field = Array1::zeros(4);
        let range = get_perturbation_range(1, 2);
        perturbation_field_1d(field.view_mut(), &gp, 4, range, 2., PerturbationMode::Absolute).unwrap();
        assert_abs_diff_eq!(field[0], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(field[1], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(field[2], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(field[3], 2., epsilon = 1e-12);
    }

    #[test]
    fn two_and_three_d_fields() {
        let atm = AtmosphericGrids::new(3, &[1000e2, 100e2], &[0., 10.], &[0., 10.]).unwrap();
        let p_gp = get_perturbation_gridpos(atm.p_grid(), &[1000e2, 100e2], true);
        let lat_gp = get_perturbation_gridpos(atm.lat_grid(), &[0., 10.], false);
        let lon_gp = get_perturbation_gridpos(atm.lon_grid(), &[0., 10.], false);

        let mut field = Array2::zeros((2, 2));
        perturbation_field_2d(
            field.view_mut(),
            &p_gp,
            &lat_gp,
            4,
            4,
            get_perturbation_range(0, 2),
            get_perturbation_range(1, 2),
            1.,
            PerturbationMode::Absolute,
        )
        .unwrap();
        assert_eq!(field, ndarray::array![[0., 1.], [0., 0.]]);

        let mut field = Array3::from_elem((2, 2, 2), 2.);
        perturbation_field_3d(
            field.view_mut(),
            &p_gp,
            &lat_gp,
            &lon_gp,
            [4, 4, 4],
            get_perturbation_range(1, 2),
            get_perturbation_range(0, 2),
            get_perturbation_range(0, 2),
            0.5,
            PerturbationMode::Relative,
        )
        .unwrap();
        assert_abs_diff_eq!(field[[1, 0, 0]], 3., epsilon = 1e-12);
        assert_abs_diff_eq!(field.sum(), 2. * 8. + 1., epsilon = 1e-12);

        let mut wrong = Array2::zeros((3, 2));
        assert!(perturbation_field_2d(
            wrong.view_mut(),
            &p_gp,
            &lat_gp,
            4,
            4,
            0..2,
            0..2,
            1.,
            PerturbationMode::Absolute
        )
        .is_err());
    }
}
