//! Basis functions of the baseline and sensor fits, and unit conversions of
//! gas species Jacobians.

use std::f64::consts::PI;

use ndarray::{Array3, ArrayView3};

use super::SpeciesUnit;
use crate::error::RtError;
use crate::physics::number_density;

/// Polynomial basis function of order `poly_coeff` over `x`.
///
/// Order 0 is a constant one. Higher orders are evaluated on `x` rescaled to
/// [-1, 1], with the mean removed.
pub fn polynomial_basis_func(x: &[f64], poly_coeff: usize) -> Result<Vec<f64>, RtError> {
    if x.len() <= poly_coeff {
        return Err(RtError::InvalidArgument(format!(
            "a polynomial of order {poly_coeff} needs more than {} points",
            x.len()
        )));
    }
    if poly_coeff == 0 {
        return Ok(vec![1.; x.len()]);
    }

    let xmin = x.iter().copied().fold(f64::INFINITY, f64::min);
    let xmax = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let dx = 0.5 * (xmax - xmin);
    if dx <= 0. {
        return Err(RtError::InvalidArgument(
            "polynomial basis functions need at least two distinct points".to_string(),
        ));
    }
    let exponent = i32::try_from(poly_coeff)
        .map_err(|_| RtError::InvalidArgument(format!("polynomial order {poly_coeff} is too large")))?;

    let mut b: Vec<f64> = x.iter().map(|&xi| ((xi - xmin) / dx - 1.).powi(exponent)).collect();
    let mean = b.iter().sum::<f64>() / b.len() as f64;
    b.iter_mut().for_each(|v| *v -= mean);
    Ok(b)
}

/// Sine and cosine basis functions of the given period, with phase zero at
/// `x[0]`.
pub fn sinefit_basis(x: &[f64], period: f64) -> (Vec<f64>, Vec<f64>) {
    let Some(&x0) = x.first() else {
        return (Vec::new(), Vec::new());
    };
    x.iter()
        .map(|&xi| {
            let a = (xi - x0) * 2. * PI / period;
            (a.sin(), a.cos())
        })
        .unzip()
}

/// Factor that converts a Jacobian with respect to the total absorption of a
/// species into the selected unit.
pub fn vmrunitscf(unit: SpeciesUnit, vmr: f64, p: f64, t: f64) -> f64 {
    match unit {
        SpeciesUnit::Rel | SpeciesUnit::Logrel => 1.,
        SpeciesUnit::Vmr => 1. / vmr,
        SpeciesUnit::Nd => 1. / (vmr * number_density(p, t)),
    }
}

/// Total number density at each point of a (p, lat, lon) temperature field.
pub fn calc_nd_field(p_grid: &[f64], t_field: ArrayView3<'_, f64>) -> Result<Array3<f64>, RtError> {
    if t_field.len_of(ndarray::Axis(0)) != p_grid.len() {
        return Err(RtError::shape(
            "temperature field pressure dimension",
            p_grid.len(),
            t_field.len_of(ndarray::Axis(0)),
        ));
    }
    Ok(Array3::from_shape_fn(t_field.dim(), |(k, lat, lon)| {
        number_density(p_grid[k], t_field[[k, lat, lon]])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn polynomial_basis() {
        let x = [0., 1., 2., 3., 4.];
        assert_eq!(polynomial_basis_func(&x, 0).unwrap(), vec![1.; 5]);

        // Order 1 is a line through zero in the middle
        let b = polynomial_basis_func(&x, 1).unwrap();
        for (bi, expected) in b.iter().zip([-1., -0.5, 0., 0.5, 1.]) {
            assert_abs_diff_eq!(*bi, expected, epsilon = 1e-12);
        }

        // Order 2 has its mean removed
        let b = polynomial_basis_func(&x, 2).unwrap();
        assert_abs_diff_eq!(b.iter().sum::<f64>(), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(b[0], b[4], epsilon = 1e-12);

        assert!(polynomial_basis_func(&x[..2], 2).is_err());
        assert!(polynomial_basis_func(&[1., 1., 1.], 1).is_err());
    }

    #[test]
    fn sine_basis() {
        let (s, c) = sinefit_basis(&[10., 10.25, 10.5], 1.);
        assert_abs_diff_eq!(s[0], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(c[0], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(s[1], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(c[2], -1., epsilon = 1e-12);
    }

    #[test]
    fn unit_factors() {
        assert_eq!(vmrunitscf(SpeciesUnit::Rel, 0.2, 1e5, 300.), 1.);
        assert_eq!(vmrunitscf(SpeciesUnit::Logrel, 0.2, 1e5, 300.), 1.);
        assert_abs_diff_eq!(vmrunitscf(SpeciesUnit::Vmr, 0.2, 1e5, 300.), 5.);
        let nd = number_density(1e5, 300.);
        assert_abs_diff_eq!(vmrunitscf(SpeciesUnit::Nd, 0.2, 1e5, 300.) * 0.2 * nd, 1., epsilon = 1e-12);
    }

    #[test]
    fn number_density_field() {
        let t = Array3::from_elem((2, 1, 3), 250.);
        let nd = calc_nd_field(&[1e5, 5e4], t.view()).unwrap();
        assert_abs_diff_eq!(nd[[1, 0, 2]], number_density(5e4, 250.));
        assert!(calc_nd_field(&[1e5], t.view()).is_err());
    }
}
