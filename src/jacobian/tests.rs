use std::sync::atomic::AtomicBool;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{s, Array1, Array2, Array3, Array4};

use super::*;
use crate::physics::{number_density, AVOGADRO, BOLTZMANN_CONST};

const P_GRID: [f64; 4] = [1000e2, 700e2, 400e2, 100e2];
const F_GRID: [f64; 4] = [100e9, 101e9, 102e9, 103e9];
const ZA_GRID: [f64; 3] = [0., 10., 20.];
const SENSOR_TIME: [f64; 3] = [0., 60., 120.];

/// iyb linear in the O3 profile, the temperature, the top altitude, the
/// frequency and the zenith angle, plus the block index.
#[derive(Debug)]
struct LinearModel {
    w_vmr: [f64; 4],
    w_t: [f64; 4],
    w_z: f64,
    f_slope: f64,
    za_slope: f64,
}

const MODEL: LinearModel = LinearModel {
    w_vmr: [1e5, 2e5, 3e5, 4e5],
    w_t: [0.1, 0.2, 0.3, 0.4],
    w_z: 0.,
    f_slope: 1e-9,
    za_slope: 0.5,
};

impl ForwardModel for LinearModel {
    fn iyb(&self, block: usize, state: &AtmosphericState, za_offset: f64) -> Result<Array1<f64>, RtError> {
        let vmr = state.vmr_field().slice(s![1, .., 0, 0]);
        let t = state.t_field().slice(s![.., 0, 0]);
        let z_top = state.z_field()[[P_GRID.len() - 1, 0, 0]];
        let atm: f64 = vmr.iter().zip(&self.w_vmr).map(|(v, w)| v * w).sum::<f64>()
            + t.iter().zip(&self.w_t).map(|(t, w)| t * w).sum::<f64>()
            + self.w_z * z_top;
        let nf = F_GRID.len();
        Ok(Array1::from_shape_fn(nf * ZA_GRID.len(), |i| {
            let (iza, iv) = (i / nf, i % nf);
            atm + self.f_slope * F_GRID[iv] + self.za_slope * (ZA_GRID[iza] + za_offset) + block as f64
        }))
    }
}

fn grids() -> AtmosphericGrids {
    AtmosphericGrids::new(1, &P_GRID, &[], &[]).unwrap()
}

fn state() -> AtmosphericState {
    let t = Array3::from_shape_vec((4, 1, 1), vec![288., 270., 245., 215.]).unwrap();
    let z = Array3::from_shape_vec((4, 1, 1), vec![0., 3000., 7200., 16000.]).unwrap();
    let mut vmr = Array4::zeros((2, 4, 1, 1));
    vmr.slice_mut(s![0, .., 0, 0]).assign(&Array1::from(vec![1e-2, 5e-3, 1e-3, 1e-5]));
    vmr.slice_mut(s![1, .., 0, 0]).assign(&Array1::from(vec![3e-8, 5e-8, 2e-7, 5e-6]));
    AtmosphericState::new(SpeciesCatalog::builtin(), grids(), &["H2O", "O3"], t, z, vmr)
        .unwrap()
        .with_hydrostatic(Hydrostatic::earth(1000e2))
        .unwrap()
}

fn sensor() -> SensorSetup {
    SensorSetup::pencil_beam(&F_GRID, 1, &ZA_GRID, &SENSOR_TIME).unwrap()
}

/// Jacobian of one block, with the block's own iyb and yb.
fn block_jacobian(jacobian: &Jacobian, model: &LinearModel, block: usize) -> Array2<f64> {
    block_jacobian_for(jacobian, model, &state(), block)
}

fn block_jacobian_for(jacobian: &Jacobian, model: &LinearModel, state: &AtmosphericState, block: usize) -> Array2<f64> {
    let sensor = sensor();
    let iyb = model.iyb(block, state, 0.).unwrap();
    let yb = sensor.apply(iyb.view()).unwrap();
    let mut jb = Array2::zeros((sensor.n1y(), jacobian.n_columns()));
    jacobian
        .calc_block(model, state, &sensor, block, iyb.view(), yb.view(), jb.view_mut())
        .unwrap();
    jb
}

fn closed(mut jacobian: Jacobian) -> Jacobian {
    jacobian.close(SENSOR_TIME.len(), F_GRID.len() * ZA_GRID.len()).unwrap();
    jacobian
}

#[test]
fn species_perturbations_of_a_linear_model() {
    for dx in [1e-6, 1e-9] {
        let mut jacobian = Jacobian::new();
        jacobian
            .add_abs_species(&grids(), &P_GRID, &[], &[], "O3", "perturbation", "vmr", dx)
            .unwrap();
        let jacobian = closed(jacobian);
        assert_eq!(jacobian.indices().unwrap(), &[[0, 3]]);

        let jb = block_jacobian(&jacobian, &MODEL, 1);
        for (k, w) in MODEL.w_vmr.iter().enumerate() {
            for row in 0..jb.nrows() {
                assert_relative_eq!(jb[[row, k]], *w, max_relative = 1e-5);
            }
        }
    }
}

#[test]
fn relative_and_number_density_units() {
    let vmr = state().vmr_field().slice(s![1, .., 0, 0]).to_owned();
    let t = state().t_field().slice(s![.., 0, 0]).to_owned();

    let mut jacobian = Jacobian::new();
    jacobian
        .add_abs_species(&grids(), &P_GRID, &[], &[], "O3", "perturbation", "rel", 1e-3)
        .unwrap();
    let jb = block_jacobian(&closed(jacobian), &MODEL, 0);
    for k in 0..4 {
        assert_relative_eq!(jb[[5, k]], MODEL.w_vmr[k] * vmr[k], max_relative = 1e-5);
    }

    // A perturbation of 1e15 molecules/m³
    let mut jacobian = Jacobian::new();
    jacobian
        .add_abs_species(&grids(), &P_GRID, &[], &[], "O3", "perturbation", "nd", 1e15)
        .unwrap();
    let jb = block_jacobian(&closed(jacobian), &MODEL, 0);
    for k in 0..4 {
        let expected = MODEL.w_vmr[k] / number_density(P_GRID[k], t[k]);
        assert_relative_eq!(jb[[2, k]], expected, max_relative = 1e-5);
    }
}

#[test]
fn coarse_retrieval_grid_spreads_the_perturbation() {
    // Retrieval points on the lowest and highest level only
    let mut jacobian = Jacobian::new();
    jacobian
        .add_temperature(&grids(), &[1000e2, 100e2], &[], &[], "off", "perturbation", 0.1)
        .unwrap();
    let jb = block_jacobian(&closed(jacobian), &MODEL, 2);

    // Each atmospheric level belongs to the retrieval points by its log(p)
    // interpolation weights, which add up to one
    let total: f64 = MODEL.w_t.iter().sum();
    assert_relative_eq!(jb[[0, 0]] + jb[[0, 1]], total, max_relative = 1e-6);
    let w_bottom = (P_GRID[1] / P_GRID[3]).ln() / (P_GRID[0] / P_GRID[3]).ln();
    assert_relative_eq!(
        jb[[0, 0]],
        MODEL.w_t[0] + w_bottom * MODEL.w_t[1] + (1. - (P_GRID[0] / P_GRID[2]).ln() / (P_GRID[0] / P_GRID[3]).ln()) * MODEL.w_t[2],
        max_relative = 1e-6
    );
}

#[test]
fn hydrostatic_equilibrium_lifts_the_top() {
    let model = LinearModel { w_z: 1., ..MODEL };
    // Start from altitudes in equilibrium, gravity depends weakly on them
    let mut state = state();
    for _ in 0..4 {
        state.apply_hydrostatic().unwrap();
    }
    let jacobians: Vec<Array2<f64>> = ["off", "on"]
        .iter()
        .map(|hse| {
            let mut jacobian = Jacobian::new();
            jacobian
                .add_temperature(&grids(), &P_GRID, &[], &[], hse, "perturbation", 0.1)
                .unwrap();
            block_jacobian_for(&closed(jacobian), &model, &state, 0)
        })
        .collect();

    // Warming a level thickens the layers next to it, by R / (M g) per K and
    // unit of log(p), half for each layer
    let scale_height_per_k = BOLTZMANN_CONST * AVOGADRO / (28.966e-3 * 9.80665);
    let log_p: Vec<f64> = P_GRID.iter().map(|p| p.ln()).collect();
    for k in 0..4 {
        assert_relative_eq!(jacobians[0][[0, k]], MODEL.w_t[k], max_relative = 1e-6);
        let below = if k > 0 { log_p[k - 1] - log_p[k] } else { 0. };
        let above = if k < 3 { log_p[k] - log_p[k + 1] } else { 0. };
        let lift = jacobians[1][[0, k]] - MODEL.w_t[k];
        assert_relative_eq!(lift, scale_height_per_k * 0.5 * (below + above), max_relative = 1e-2);
    }
}

#[test]
fn frequency_shift_and_stretch() {
    let mut jacobian = Jacobian::new();
    jacobian.add_freq_shift(&sensor(), -1, 1e5).unwrap();
    jacobian.add_freq_stretch(&sensor(), 0, 1e5).unwrap();
    let jacobian = closed(jacobian);
    assert_eq!(jacobian.indices().unwrap(), &[[0, 2], [3, 3]]);

    let jb = block_jacobian(&jacobian, &MODEL, 1);
    let w = basis::polynomial_basis_func(&F_GRID, 1).unwrap();
    for row in 0..jb.nrows() {
        // One shift column per block
        assert_eq!(jb[[row, 0]], 0.);
        assert_relative_eq!(jb[[row, 1]], MODEL.f_slope, max_relative = 1e-5);
        assert_eq!(jb[[row, 2]], 0.);
        assert_abs_diff_eq!(jb[[row, 3]], MODEL.f_slope * w[row % F_GRID.len()], epsilon = 1e-14);
    }
}

#[test]
fn pointing_by_interpolation_and_recalculation() {
    for calcmode in ["interp", "recalc"] {
        let mut jacobian = Jacobian::new();
        jacobian.add_pointing_za(&sensor(), 1, calcmode, 0.01).unwrap();
        let jb = block_jacobian(&closed(jacobian), &MODEL, 2);
        let w1 = basis::polynomial_basis_func(&SENSOR_TIME, 1).unwrap();
        for row in 0..jb.nrows() {
            assert_relative_eq!(jb[[row, 0]], MODEL.za_slope, max_relative = 1e-6);
            assert_relative_eq!(jb[[row, 1]], MODEL.za_slope * w1[2], max_relative = 1e-6);
        }
    }
}

#[test]
fn zeroth_order_polyfit_is_constant() {
    let mut jacobian = Jacobian::new();
    jacobian.add_polyfit(&sensor(), 0, true, true, true).unwrap();
    assert_eq!(jacobian.quantities().len(), 1);
    let jacobian = closed(jacobian);

    let (_, j) = jacobian.calc_all(&MODEL, &state(), &sensor(), Some(2), None).unwrap();
    assert_eq!(j.dim(), (36, 1));
    assert!(j.iter().all(|&x| x == 1.));
}

#[test]
fn polyfit_per_viewing_direction_and_block() {
    let mut jacobian = Jacobian::new();
    jacobian.add_polyfit(&sensor(), 1, true, false, false).unwrap();
    assert_eq!(jacobian.quantities().len(), 2);
    let jacobian = closed(jacobian);
    assert_eq!(jacobian.indices().unwrap(), &[[0, 8], [9, 17]]);

    let jb = block_jacobian(&jacobian, &MODEL, 1);
    let w1 = basis::polynomial_basis_func(&F_GRID, 1).unwrap();
    for l in 0..3 {
        for f in 0..4 {
            let row = l * 4 + f;
            for col in 0..18 {
                let expected = if col == 3 + l {
                    1.
                } else if col == 9 + 3 + l {
                    w1[f]
                } else {
                    0.
                };
                assert_eq!(jb[[row, col]], expected, "row {row}, column {col}");
            }
        }
    }
}

#[test]
fn sinefit_columns() {
    let mut jacobian = Jacobian::new();
    jacobian.add_sinefit(&sensor(), &[4e9, 8e9], true, true, true).unwrap();
    let jacobian = closed(jacobian);
    assert_eq!(jacobian.indices().unwrap(), &[[0, 1], [2, 3]]);

    let jb = block_jacobian(&jacobian, &MODEL, 0);
    let sine = [0., 1., 0., -1.];
    let cosine = [1., 0., -1., 0.];
    for row in 0..jb.nrows() {
        assert_abs_diff_eq!(jb[[row, 0]], sine[row % 4], epsilon = 1e-12);
        assert_abs_diff_eq!(jb[[row, 1]], cosine[row % 4], epsilon = 1e-12);
    }
}

#[test]
fn all_blocks_match_single_blocks() {
    let mut jacobian = Jacobian::new();
    jacobian
        .add_abs_species(&grids(), &P_GRID, &[], &[], "O3", "perturbation", "vmr", 1e-9)
        .unwrap();
    jacobian
        .add_abs_species(&grids(), &P_GRID, &[], &[], "H2O", "analytical", "rel", 0.)
        .unwrap();
    jacobian.add_freq_shift(&sensor(), -1, 1e5).unwrap();
    let jacobian = closed(jacobian);

    for num_threads in [Some(1), Some(4)] {
        let (y, j) = jacobian.calc_all(&MODEL, &state(), &sensor(), num_threads, None).unwrap();
        assert_eq!(j.dim(), (36, 4 + 4 + 3));
        for block in 0..3 {
            let rows = block * 12..(block + 1) * 12;
            let iyb = MODEL.iyb(block, &state(), 0.).unwrap();
            assert_eq!(y.slice(s![rows.clone()]), iyb);
            assert_eq!(j.slice(s![rows, ..]), block_jacobian(&jacobian, &MODEL, block));
        }
        // Analytical columns are left for the radiative transfer code
        assert!(j.slice(s![.., 4..8]).iter().all(|&x| x == 0.));
    }
}

#[test]
fn cancelled_and_switched_off() {
    let jacobian = closed({
        let mut jacobian = Jacobian::new();
        jacobian.add_polyfit(&sensor(), 0, true, true, true).unwrap();
        jacobian
    });
    let cancel = AtomicBool::new(true);
    assert!(matches!(
        jacobian.calc_all(&MODEL, &state(), &sensor(), None, Some(&cancel)),
        Err(RtError::Cancelled)
    ));

    let off = Jacobian::off();
    assert!(!off.is_enabled());
    let (y, j) = off.calc_all(&MODEL, &state(), &sensor(), None, None).unwrap();
    assert_eq!(y.len(), 36);
    assert_eq!(j.dim(), (36, 0));
    let mut off = Jacobian::off();
    assert!(matches!(
        off.add_wind(&grids(), &P_GRID, &[], &[], "u"),
        Err(RtError::JacobianClosed)
    ));
}

#[test]
fn registration_errors() {
    let atm = grids();
    let mut jacobian = Jacobian::new();
    jacobian
        .add_abs_species(&atm, &P_GRID, &[], &[], "H2O", "perturbation", "nd", 1e15)
        .unwrap();
    assert!(matches!(
        jacobian.add_abs_species(&atm, &P_GRID, &[], &[], "H2O", "analytical", "vmr", 0.),
        Err(RtError::DuplicateRetrievalQuantity { .. })
    ));
    assert!(matches!(
        jacobian.add_temperature(&atm, &P_GRID, &[], &[], "off", "perturbation", 1.),
        Err(RtError::ModeConflict)
    ));
    assert!(matches!(
        jacobian.add_abs_species(&atm, &[2000e2, 100e2], &[], &[], "O3", "perturbation", "vmr", 1e-9),
        Err(RtError::GridCoverage(_))
    ));
    assert!(matches!(
        jacobian.add_abs_species(&atm, &P_GRID, &[], &[], "XYZ", "perturbation", "vmr", 1e-9),
        Err(RtError::UnknownSpecies(_))
    ));
    for (method, mode) in [("finite", "vmr"), ("perturbation", "ppm")] {
        assert!(matches!(
            jacobian.add_abs_species(&atm, &P_GRID, &[], &[], "O3", method, mode, 1e-9),
            Err(RtError::InvalidArgument(_))
        ));
    }

    let mut jacobian = Jacobian::new();
    jacobian
        .add_temperature(&atm, &P_GRID, &[], &[], "on", "perturbation", 1.)
        .unwrap();
    assert!(matches!(
        jacobian.add_abs_species(&atm, &P_GRID, &[], &[], "O3", "perturbation", "nd", 1e15),
        Err(RtError::ModeConflict)
    ));
    assert!(matches!(
        jacobian.add_temperature(&atm, &P_GRID, &[], &[], "off", "perturbation", 1.),
        Err(RtError::DuplicateRetrievalQuantity { .. })
    ));
    jacobian.add_wind(&atm, &P_GRID, &[], &[], "w").unwrap();
    assert!(jacobian.add_wind(&atm, &P_GRID, &[], &[], "w").is_err());
    assert!(jacobian.add_wind(&atm, &P_GRID, &[], &[], "x").is_err());

    let sensor = sensor();
    assert!(jacobian.add_freq_shift(&sensor, -2, 1e5).is_err());
    assert!(jacobian.add_freq_shift(&sensor, 3, 1e5).is_err());
    assert!(jacobian.add_freq_shift(&sensor, 0, 0.).is_err());
    assert!(jacobian.add_freq_shift(&sensor, 0, 2e6).is_err());
    jacobian.add_freq_shift(&sensor, 0, 1e5).unwrap();
    assert!(jacobian.add_freq_shift(&sensor, 1, 1e5).is_err());
    assert!(jacobian.add_pointing_za(&sensor, 0, "interp", 0.2).is_err());
    assert!(jacobian.add_pointing_za(&sensor, 0, "guess", 0.01).is_err());
    jacobian.add_pointing_za(&sensor, 0, "recalc", 0.01).unwrap();
    assert!(jacobian.add_pointing_za(&sensor, 0, "interp", 0.01).is_err());
    assert!(jacobian.add_sinefit(&sensor, &[], false, false, false).is_err());
    jacobian.add_polyfit(&sensor, 2, false, false, false).unwrap();
    assert!(jacobian.add_polyfit(&sensor, 0, false, false, false).is_err());
}

#[test]
fn closing() {
    let mut jacobian = Jacobian::new();
    assert!(jacobian.close(3, 12).is_err());
    jacobian
        .add_temperature(&grids(), &P_GRID, &[], &[], "off", "perturbation", 1.)
        .unwrap();

    let state = state();
    let sensor = sensor();
    let iyb = MODEL.iyb(0, &state, 0.).unwrap();
    let mut jb = Array2::zeros((12, 4));
    assert!(matches!(
        jacobian.calc_block(&MODEL, &state, &sensor, 0, iyb.view(), iyb.view(), jb.view_mut()),
        Err(RtError::JacobianNotClosed)
    ));
    assert!(matches!(
        jacobian.columns_of(&QuantityKind::Temperature { hse: false }),
        Err(RtError::JacobianNotClosed)
    ));

    assert!(jacobian.close(0, 12).is_err());
    assert!(jacobian.close(3, 0).is_err());
    jacobian.close(3, 12).unwrap();
    assert!(matches!(jacobian.close(3, 12), Err(RtError::JacobianClosed)));
    assert!(matches!(
        jacobian.add_wind(&grids(), &P_GRID, &[], &[], "u"),
        Err(RtError::JacobianClosed)
    ));
    assert_eq!(jacobian.columns_of(&QuantityKind::Temperature { hse: true }).unwrap(), [0, 3]);
    assert!(matches!(
        jacobian.columns_of(&QuantityKind::FrequencyShift),
        Err(RtError::MissingRetrievalQuantity(_))
    ));

    // Sensor and block must match the closed layout
    assert!(jacobian
        .calc_block(&MODEL, &state, &sensor, 3, iyb.view(), iyb.view(), jb.view_mut())
        .is_err());
    let mut wrong = Array2::zeros((12, 5));
    assert!(jacobian
        .calc_block(&MODEL, &state, &sensor, 0, iyb.view(), iyb.view(), wrong.view_mut())
        .is_err());
}
