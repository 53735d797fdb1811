//! Built-in species data.
//!
//! Abundances and masses are the HITRAN values. The partition functions are
//! rigid-rotor approximations: linear molecules use `Q = kT/(σhcB) + 1/3` and
//! the nonlinear ones a tabulated `Q = a T^1.5` scaled to the HITRAN value at
//! 296 K.
#![allow(clippy::excessive_precision)]

use smallvec::{smallvec, SmallVec};

use super::{IsotopologueRecord, PartitionFunction, SpeciesRecord};

/// Temperature grid for tabulated partition functions, in K
const PF_TEMPERATURES: [f64; 9] = [100., 150., 200., 225., 250., 275., 296., 325., 400.];

/// Interpolation order of the tabulated partition functions
const PF_ORDER: usize = 3;

/// Linear rotor, `Q(T) = 1/3 + k T / (σ h c B)`.
fn linear_rotor(t_coeff: f64) -> PartitionFunction {
    PartitionFunction::FromCoeff(smallvec![1. / 3., t_coeff, 0., 0.])
}

/// Nonlinear rotor, tabulated as `a T^1.5`.
fn nonlinear_rotor(q296: f64) -> PartitionFunction {
    let a = q296 / 296_f64.powf(1.5);
    PartitionFunction::FromTemp {
        temperatures: PF_TEMPERATURES.to_vec(),
        values: PF_TEMPERATURES.iter().map(|t| a * t.powf(1.5)).collect(),
        order: PF_ORDER,
    }
}

fn iso(
    name: &str,
    abundance: f64,
    mass: f64,
    jpl_tags: &[u32],
    hitran_tag: Option<u32>,
    partition: PartitionFunction,
) -> IsotopologueRecord {
    IsotopologueRecord {
        name: name.to_string(),
        abundance,
        mass,
        jpl_tags: SmallVec::from_slice(jpl_tags),
        hitran_tag,
        partition,
    }
}

/// A continuum pseudo-isotopologue has no abundance and no partition function.
fn continuum(name: &str, mass: f64) -> IsotopologueRecord {
    iso(
        name,
        f64::NAN,
        mass,
        &[],
        None,
        PartitionFunction::FromCoeff(SmallVec::new()),
    )
}

fn species(name: &str, degrees_of_freedom: u32, isotopologues: Vec<IsotopologueRecord>) -> SpeciesRecord {
    SpeciesRecord {
        name: name.to_string(),
        degrees_of_freedom,
        isotopologues,
    }
}

/// All built-in species. The order defines the species indices.
pub(super) fn species_data() -> Vec<SpeciesRecord> {
    let q_h2o = || nonlinear_rotor(174.58);
    let q_o3 = || nonlinear_rotor(3483.7);
    let q_ch4 = || nonlinear_rotor(590.48);
    let q_so2 = || nonlinear_rotor(6340.3);

    vec![
        species(
            "H2O",
            3,
            vec![
                iso("161", 0.997317, 18.010565, &[18003, 18005], Some(11), q_h2o()),
                iso("181", 1.99983e-3, 20.014811, &[20003], Some(12), q_h2o()),
                iso("171", 3.71884e-4, 19.014780, &[19003], Some(13), q_h2o()),
                iso("162", 3.10693e-4, 19.016740, &[19002], Some(14), q_h2o()),
                continuum("SelfContStandardType", 18.010565),
                continuum("ForeignContStandardType", 18.010565),
                continuum("CKDMT100", 18.010565),
                continuum("PWR98", 18.010565),
                continuum("MPM93", 18.010565),
            ],
        ),
        species(
            "CO2",
            2,
            vec![
                iso("626", 0.984204, 43.98983, &[44004], Some(21), linear_rotor(0.8906)),
                iso("636", 1.10574e-2, 44.993185, &[45012], Some(22), linear_rotor(1.8876)),
                iso("628", 3.94707e-3, 45.994076, &[46013], Some(23), linear_rotor(1.8912)),
                iso("627", 7.33989e-4, 44.994045, &[45013], Some(24), linear_rotor(1.8361)),
                continuum("CKD241", 43.98983),
                continuum("CKDMT100", 43.98983),
                continuum("PWR93", 43.98983),
            ],
        ),
        species(
            "O3",
            3,
            vec![
                iso("666", 0.992901, 47.984745, &[48004, 48005, 48006, 48007, 48008], Some(31), q_o3()),
                iso("668", 3.98194e-3, 49.988991, &[50004, 50006], Some(32), nonlinear_rotor(7465.7)),
                iso("686", 1.99097e-3, 49.988991, &[50003, 50005], Some(33), nonlinear_rotor(3647.1)),
                iso("667", 7.40475e-4, 48.98896, &[49002], Some(34), nonlinear_rotor(43330.)),
                iso("676", 3.70237e-4, 48.98896, &[49001], Some(35), nonlinear_rotor(21404.)),
            ],
        ),
        species(
            "N2O",
            2,
            vec![
                iso("446", 0.990333, 44.001062, &[44009, 44012], Some(41), linear_rotor(1.6585)),
                iso("456", 3.64093e-3, 44.998096, &[45007], Some(42), linear_rotor(1.1109)),
                iso("546", 3.64093e-3, 44.998096, &[45008], Some(43), linear_rotor(1.1468)),
                iso("448", 1.98582e-3, 46.005308, &[46007], Some(44), linear_rotor(1.7462)),
            ],
        ),
        species(
            "CO",
            2,
            vec![
                iso("26", 0.986544, 27.994915, &[28001], Some(51), linear_rotor(0.3615)),
                iso("36", 1.10836e-2, 28.99827, &[29001], Some(52), linear_rotor(0.7582)),
                iso("28", 1.97822e-3, 29.999161, &[30001], Some(53), linear_rotor(0.3796)),
            ],
        ),
        species(
            "CH4",
            3,
            vec![
                iso("211", 0.988274, 16.0313, &[], Some(61), q_ch4()),
                iso("311", 1.11031e-2, 17.034655, &[], Some(62), nonlinear_rotor(1180.8)),
                iso("212", 6.15751e-4, 17.037475, &[17003], Some(63), nonlinear_rotor(4794.7)),
            ],
        ),
        species(
            "O2",
            2,
            vec![
                iso("66", 0.995262, 31.98983, &[32001, 32002], Some(71), linear_rotor(0.7236)),
                iso("68", 3.99141e-3, 33.994076, &[34001], Some(72), linear_rotor(1.5299)),
                iso("67", 7.42235e-4, 32.994045, &[33002], Some(73), linear_rotor(8.9302)),
                continuum("PWR93", 31.98983),
                continuum("MPM93", 31.98983),
                continuum("SelfContStandardType", 31.98983),
            ],
        ),
        species(
            "NO",
            2,
            vec![
                iso("46", 0.993974, 29.997989, &[30008], Some(81), linear_rotor(3.8842)),
                iso("56", 3.65431e-3, 30.995023, &[], Some(82), linear_rotor(2.6913)),
                iso("48", 1.99312e-3, 32.002234, &[32006], Some(83), linear_rotor(4.0869)),
            ],
        ),
        species(
            "SO2",
            3,
            vec![
                iso("626", 0.945678, 63.961901, &[64002, 64005], Some(91), q_so2()),
                iso("646", 4.19503e-2, 65.957695, &[66002], Some(92), nonlinear_rotor(6368.1)),
            ],
        ),
        species(
            "N2",
            2,
            vec![
                iso("44", 0.992687, 28.006148, &[], Some(221), linear_rotor(1.7400)),
                iso("45", 7.47809e-3, 29.003182, &[], Some(222), linear_rotor(1.2014)),
                continuum("SelfContStandardType", 28.006148),
                continuum("SelfContMPM93", 28.006148),
                continuum("CIArotCKDMT100", 28.006148),
            ],
        ),
        species(
            "H2",
            2,
            vec![
                iso("11", 0.999688, 2.01565, &[], Some(451), linear_rotor(5.7109e-3)),
                iso("12", 3.11432e-4, 3.021825, &[], Some(452), linear_rotor(1.5268e-2)),
            ],
        ),
        species(
            "He",
            0,
            vec![iso(
                "4",
                1.0,
                4.002602,
                &[],
                None,
                PartitionFunction::FromCoeff(smallvec![1.]),
            )],
        ),
    ]
}
