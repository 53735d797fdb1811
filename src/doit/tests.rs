use std::sync::atomic::AtomicBool;

use approx::assert_relative_eq;
use ndarray::{Array3, Array4, Array6};

use super::*;
use crate::interp::nlinspace;
use crate::physics::invrayjean;
use crate::xsec::absorption::ConstantAbsorption;

const GAS: ConstantAbsorption = ConstantAbsorption { coefficient: 2e-5 };

/// 1D atmosphere of `np` levels, 1 km apart, with the whole
/// atmosphere inside the cloudbox.
fn atmosphere_1d(np: usize, pnd: f64) -> (CloudboxLimits, CloudboxAtmosphere) {
    let limits = CloudboxLimits::new(&[0, np - 1], 1).unwrap();
    let p = nlinspace(1e5, 1e5 - 1e4 * (np - 1) as f64, np);
    let z = Array3::from_shape_fn((np, 1, 1), |(k, _, _)| 1e3 * k as f64);
    let t = Array3::from_shape_fn((np, 1, 1), |(k, _, _)| 280. - 6. * k as f64);
    let vmr = Array4::zeros((0, np, 1, 1));
    let pnd = Array4::from_elem((1, np, 1, 1), pnd);
    let atmosphere = CloudboxAtmosphere::new(&limits, &p, z.view(), t.view(), vmr.view(), pnd).unwrap();
    (limits, atmosphere)
}

fn particles() -> Vec<Box<dyn ParticleOptics>> {
    vec![Box::new(HenyeyGreenstein::new(1e-7, 4e-8, 0.3).unwrap())]
}

fn settings(epsilon: f64, max_iterations: usize, policy: NonConvergencePolicy) -> DoitSettings {
    DoitSettings::new(&[epsilon], ConvergenceTest::AbsBt, max_iterations, policy).unwrap()
}

fn solver_1d(pnd: f64, settings: DoitSettings, f_grid: &[f64]) -> DoitSolver<'static> {
    let (limits, atmosphere) = atmosphere_1d(5, pnd);
    let grids = doit_angular_grids_set(19, 10, None).unwrap();
    let incoming = IncomingField::blackbody(f_grid, &limits, &grids, 1, 2.735, 285.).unwrap();
    DoitSolver::new(settings, grids, limits, 1, f_grid, atmosphere, particles(), &GAS, incoming).unwrap()
}

#[test]
fn clear_sky_converges_in_one_iteration() {
    let solver = solver_1d(0., settings(0.01, 20, NonConvergencePolicy::Abort), &[90e9]);
    let result = solver.solve_frequency(0, None).unwrap();
    assert_eq!(result.iterations, 1);
    assert!(result.converged);
    assert_eq!(result.i_field.dim(), (5, 1, 1, 19, 1, 1));
    assert!(result.scat_field.iter().all(|&x| x == 0.));

    // Zenith looking radiance at the bottom is between space and the warmest
    // layer, the boundaries are untouched
    let bt_zenith = invrayjean(result.i_field[[0, 0, 0, 0, 0, 0]], 90e9);
    assert!(bt_zenith > 2.735 && bt_zenith < 280.);
    assert_relative_eq!(result.i_field[[4, 0, 0, 0, 0, 0]], planck(90e9, 2.735));
    assert_relative_eq!(result.i_field[[0, 0, 0, 18, 0, 0]], planck(90e9, 285.));
}

#[test]
fn repeated_solutions_and_tests_agree() {
    let solver = solver_1d(500., settings(0.01, 50, NonConvergencePolicy::Abort), &[90e9]);
    let first = solver.solve_frequency(0, None).unwrap();
    let second = solver.solve_frequency(0, None).unwrap();
    assert_eq!(first, second);

    // A converged field passes the test against itself, every time
    let test = ConvergenceTest::AbsBt;
    for _ in 0..3 {
        assert!(test
            .is_converged(first.i_field.view(), second.i_field.view(), &[0.], 90e9)
            .unwrap());
    }
}

#[test]
fn scattering_changes_the_field() {
    let clear = solver_1d(0., settings(0.01, 50, NonConvergencePolicy::Abort), &[90e9])
        .solve_frequency(0, None)
        .unwrap();
    let cloudy = solver_1d(1e3, settings(0.01, 50, NonConvergencePolicy::Abort), &[90e9])
        .solve_frequency(0, None)
        .unwrap();
    assert!(cloudy.converged);
    assert!(cloudy.iterations > 1);
    assert!(cloudy.scat_field.iter().any(|&x| x > 0.));

    // The cloud is warmer than space, so the zenith radiance at the bottom
    // increases
    assert!(cloudy.i_field[[0, 0, 0, 0, 0, 0]] > clear.i_field[[0, 0, 0, 0, 0, 0]]);
}

#[test]
fn non_convergence_policies() {
    let strict = |policy| solver_1d(1e3, settings(1e-9, 1, policy), &[90e9]).solve_frequency(0, None);

    // One tested iteration, then one more before giving up
    assert!(matches!(
        strict(NonConvergencePolicy::Abort),
        Err(RtError::NonConvergence(2))
    ));

    let nan = strict(NonConvergencePolicy::FillNan).unwrap();
    assert!(!nan.converged);
    assert_eq!(nan.iterations, 2);
    assert!(nan.i_field.iter().all(|x| x.is_nan()));

    let kept = strict(NonConvergencePolicy::KeepCurrent).unwrap();
    assert!(!kept.converged);
    assert_eq!(kept.iterations, 2);
    assert!(kept.i_field.iter().all(|x| x.is_finite()));

    // A field that passes the first test has seen a single iteration, the
    // kept field one more
    let single = solver_1d(1e3, settings(1e6, 1, NonConvergencePolicy::Abort), &[90e9])
        .solve_frequency(0, None)
        .unwrap();
    assert!(single.converged);
    assert_eq!(single.iterations, 1);
    assert_ne!(kept.i_field, single.i_field);

    let longer = solver_1d(1e3, settings(1e-9, 3, NonConvergencePolicy::KeepCurrent), &[90e9])
        .solve_frequency(0, None)
        .unwrap();
    assert_eq!(longer.iterations, 4);
}

#[test]
fn limb_integral_on_the_field_grid_matches_standard() {
    let standard = solver_1d(1e3, settings(0.001, 50, NonConvergencePolicy::Abort), &[90e9])
        .solve_frequency(0, None)
        .unwrap();

    let mut limb_settings = settings(0.001, 50, NonConvergencePolicy::Abort);
    limb_settings.scat_integral = ScatteringIntegralMethod::Limb;
    let limb = solver_1d(1e3, limb_settings, &[90e9]).solve_frequency(0, None).unwrap();
    for (a, b) in limb.i_field.iter().zip(&standard.i_field) {
        assert_relative_eq!(a, b, max_relative = 1e-9);
    }

    let mut poly_settings = settings(0.001, 50, NonConvergencePolicy::Abort);
    poly_settings.scat_integral = ScatteringIntegralMethod::Limb;
    poly_settings.za_interp = ZaInterpolation::Polynomial;
    let poly = solver_1d(1e3, poly_settings, &[90e9]).solve_frequency(0, None).unwrap();
    assert!(poly.converged);
    assert!(poly.i_field.iter().all(|x| x.is_finite()));
    // Zenith and nadir rays don't interpolate between zenith angles
    for index in [[0, 0, 0, 0, 0, 0], [4, 0, 0, 18, 0, 0]] {
        assert!(invrayjean(poly.i_field[index] - standard.i_field[index], 90e9).abs() < 1.);
    }
}

#[test]
fn all_frequencies_in_order() {
    let f_grid = [30e9, 90e9, 150e9];
    let solver = solver_1d(1e3, settings(0.01, 50, NonConvergencePolicy::Abort), &f_grid);
    assert_eq!(solver.f_grid(), &f_grid);

    let all = solver.solve_all(Some(2), None).unwrap();
    assert_eq!(all.len(), 3);
    for (f_index, result) in all.iter().enumerate() {
        let single = solver.solve_frequency(f_index, None).unwrap();
        for (a, b) in result.i_field.iter().zip(&single.i_field) {
            assert_relative_eq!(a, b, max_relative = 1e-12);
        }
    }

    assert!(solver.solve_frequency(3, None).is_err());
}

#[test]
fn cancelled_before_start() {
    let solver = solver_1d(1e3, settings(0.01, 50, NonConvergencePolicy::Abort), &[30e9, 90e9]);
    let cancel = AtomicBool::new(true);
    assert!(matches!(solver.solve_all(Some(1), Some(&cancel)), Err(RtError::Cancelled)));
    assert!(matches!(solver.solve_frequency(0, Some(&cancel)), Err(RtError::Cancelled)));
}

#[test]
fn horizontally_homogeneous_3d() {
    let limits = CloudboxLimits::new(&[0, 3, 0, 1, 0, 1], 3).unwrap();
    let p = nlinspace(1e5, 7e4, 4);
    let z = Array3::from_shape_fn((4, 2, 2), |(k, _, _)| 1e3 * k as f64);
    let t = Array3::from_shape_fn((4, 2, 2), |(k, _, _)| 280. - 6. * k as f64);
    let vmr = Array4::zeros((0, 4, 2, 2));
    let pnd = Array4::from_elem((1, 4, 2, 2), 1e3);
    let atmosphere = CloudboxAtmosphere::new(&limits, &p, z.view(), t.view(), vmr.view(), pnd).unwrap();
    let grids = doit_angular_grids_set(16, 6, None).unwrap();
    let incoming = IncomingField::blackbody(&[90e9], &limits, &grids, 1, 2.735, 285.).unwrap();
    let settings = settings(0.01, 50, NonConvergencePolicy::Abort);
    let solver =
        DoitSolver::new(settings, grids, limits, 1, &[90e9], atmosphere, particles(), &GAS, incoming).unwrap();

    let result = solver.solve_frequency(0, None).unwrap();
    assert!(result.converged);
    assert_eq!(result.i_field.dim(), (4, 2, 2, 16, 6, 1));
    for ((p, _, _, za, _, s), &x) in result.i_field.indexed_iter() {
        assert!(x.is_finite());
        assert_relative_eq!(x, result.i_field[[p, 0, 0, za, 0, s]], max_relative = 1e-9);
    }
}

#[test]
fn init_checks() {
    let limits = CloudboxLimits::new(&[0, 4], 1).unwrap();
    let grids = doit_angular_grids_set(19, 10, None).unwrap();
    let fields = doit_init(1, &limits, &grids, 1).unwrap();
    assert_eq!(fields.i_field.dim(), (5, 1, 1, 19, 1, 1));
    assert!(fields.i_field.iter().all(|&x| x == 0.));

    let limits_3d = CloudboxLimits::new(&[0, 4, 1, 2, 3, 5], 3).unwrap();
    let fields = doit_init(4, &limits_3d, &grids, 2).unwrap();
    assert_eq!(fields.scat_field.dim(), (5, 2, 3, 19, 10, 4));

    assert!(doit_init(0, &limits, &grids, 1).is_err());
    assert!(doit_init(5, &limits, &grids, 1).is_err());
    assert!(doit_init(1, &limits, &grids, 0).is_err());
    let mut bad = grids.clone();
    bad.aa_grid = nlinspace(0., 180., 10);
    assert!(doit_init(1, &limits, &bad, 1).is_err());
}

#[test]
fn setup_is_validated() {
    assert!(DoitSettings::new(&[0.1], ConvergenceTest::Lsq, 0, NonConvergencePolicy::Abort).is_err());
    assert!(DoitSettings::new(&[], ConvergenceTest::Lsq, 10, NonConvergencePolicy::Abort).is_err());
    assert!(DoitSettings::new(&[-0.1], ConvergenceTest::Lsq, 10, NonConvergencePolicy::Abort).is_err());

    let mut poly = settings(0.1, 10, NonConvergencePolicy::Abort);
    poly.za_interp = ZaInterpolation::Polynomial;
    assert!(poly.check(1, 1).is_ok());
    assert!(poly.check(1, 3).is_err());
    assert!(poly.check(2, 1).is_err());

    // Particle types must match the number density field
    let (limits, atmosphere) = atmosphere_1d(5, 1.);
    let grids = doit_angular_grids_set(19, 10, None).unwrap();
    let incoming = IncomingField::blackbody(&[90e9], &limits, &grids, 1, 2.735, 285.).unwrap();
    let mut two = particles();
    two.push(Box::new(IsotropicParticle::new(1e-7, 1e-7).unwrap()));
    let settings = settings(0.1, 10, NonConvergencePolicy::Abort);
    let solver = |f_grid: &[f64], particles| {
        DoitSolver::new(
            settings.clone(),
            grids.clone(),
            limits.clone(),
            1,
            f_grid,
            atmosphere.clone(),
            particles,
            &GAS,
            incoming.clone(),
        )
    };
    assert!(solver(&[90e9], particles()).is_ok());
    assert!(solver(&[90e9], two).is_err());
    // One incoming field per frequency
    assert!(solver(&[90e9, 100e9], particles()).is_err());

    // Cloudbox outside the atmosphere
    let limits = CloudboxLimits::new(&[2, 6], 1).unwrap();
    let z = Array3::zeros((5, 1, 1));
    let t = Array3::from_elem((5, 1, 1), 250.);
    let vmr = Array4::zeros((0, 5, 1, 1));
    let p = nlinspace(1e5, 6e4, 5);
    let pnd = Array4::zeros((1, 5, 1, 1));
    assert!(CloudboxAtmosphere::new(&limits, &p, z.view(), t.view(), vmr.view(), pnd).is_err());
}

#[test]
fn incoming_blackbody_is_unpolarized() {
    let limits = CloudboxLimits::new(&[0, 4], 1).unwrap();
    let grids = doit_angular_grids_set(19, 10, None).unwrap();
    let incoming = IncomingField::blackbody(&[90e9], &limits, &grids, 2, 10., 300.).unwrap();
    let bottom: &Array6<f64> = &incoming.bottom;
    assert_eq!(bottom.dim(), (1, 1, 1, 19, 1, 2));
    assert_relative_eq!(bottom[[0, 0, 0, 3, 0, 0]], planck(90e9, 300.));
    assert_eq!(bottom[[0, 0, 0, 3, 0, 1]], 0.);
    assert!(IncomingField::blackbody(&[90e9], &limits, &grids, 1, -1., 300.).is_err());
}
