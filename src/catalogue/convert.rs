//! Conversion of ARTSCAT-3 lines to ARTSCAT-4.

use super::{Artscat4Fields, LineFormat, LineRecord, BROADENING_SPECIES, N_BROADENING_SPECIES};
use crate::error::RtError;
use crate::species::SpeciesCatalog;

/// Convert a line to ARTSCAT-4. Version 4 lines are returned unchanged.
///
/// The air broadening and shift parameters are copied to every foreign
/// broadening species, except the slot of the line's own species, which gets
/// the self broadening parameters and no shift. Absorption computed from the
/// converted line is then identical to the original.
///
/// ARTSCAT-4 uses `T_I0` as the reference temperature for broadening, so the
/// conversion requires `T_GAM == T_I0`. The fields without an ARTSCAT-4
/// counterpart (Einstein A and the statistical weights) are NaN.
pub fn artscat4_from_artscat3(line: &LineRecord, catalog: &SpeciesCatalog) -> Result<LineRecord, RtError> {
    let v3 = match &line.format {
        LineFormat::Artscat4(_) => return Ok(line.clone()),
        LineFormat::Artscat3(v3) => v3,
    };

    if v3.tgam != line.ti0 {
        return Err(RtError::InvalidArgument(format!(
            "line at {} Hz has T_GAM = {} K and T_I0 = {} K, they must agree for ARTSCAT-4",
            line.f, v3.tgam, line.ti0
        )));
    }

    let species_name = catalog
        .get(line.species)
        .map(|sr| sr.name.as_str())
        .ok_or_else(|| RtError::UnknownSpecies(format!("species index {}", line.species)))?;

    let mut gamma_foreign = [v3.agam; N_BROADENING_SPECIES];
    let mut n_foreign = [v3.nair; N_BROADENING_SPECIES];
    let mut delta_foreign = [v3.psf; N_BROADENING_SPECIES];
    if let Some(slot) = BROADENING_SPECIES.iter().position(|&s| s == species_name) {
        gamma_foreign[slot] = line.sgam;
        n_foreign[slot] = line.nself;
        delta_foreign[slot] = 0.;
    }

    Ok(LineRecord {
        format: LineFormat::Artscat4(Artscat4Fields {
            a: f64::NAN,
            g_upper: f64::NAN,
            g_lower: f64::NAN,
            gamma_foreign,
            n_foreign,
            delta_foreign,
            quantum_numbers: String::new(),
        }),
        ..line.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{test_lines, Artscat3Fields};

    #[test]
    fn air_parameters_fill_foreign_slots() {
        let catalog = SpeciesCatalog::builtin();
        let v3 = test_lines::o3_v3();
        let v4 = artscat4_from_artscat3(&v3, catalog).unwrap();
        let fields = v4.artscat4().unwrap();

        assert_eq!(v4.version(), 4);
        assert_eq!(fields.gamma_foreign, [23_000.; 6]);
        assert_eq!(fields.n_foreign, [0.73; 6]);
        assert_eq!(fields.delta_foreign, [0.8; 6]);
        assert!(fields.a.is_nan());
        assert_eq!((v4.f, v4.sgam, v4.nself), (v3.f, v3.sgam, v3.nself));
    }

    #[test]
    fn self_slot_gets_self_parameters() {
        let catalog = SpeciesCatalog::builtin();
        let (species, isotopologue) = catalog.lookup("H2O-161").unwrap();
        let v3 = LineRecord {
            species,
            isotopologue,
            ..test_lines::o3_v3()
        };
        let v4 = artscat4_from_artscat3(&v3, catalog).unwrap();
        let fields = v4.artscat4().unwrap();
        // H2O is slot 2
        assert_eq!(fields.gamma_foreign[2], v3.sgam);
        assert_eq!(fields.n_foreign[2], v3.nself);
        assert_eq!(fields.delta_foreign[2], 0.);
        assert_eq!(fields.gamma_foreign[0], 23_000.);
    }

    #[test]
    fn reference_temperatures_must_agree() {
        let catalog = SpeciesCatalog::builtin();
        let mut line = test_lines::o3_v3();
        if let LineFormat::Artscat3(Artscat3Fields { tgam, .. }) = &mut line.format {
            *tgam = 300.;
        }
        assert!(matches!(
            artscat4_from_artscat3(&line, catalog),
            Err(RtError::InvalidArgument(_))
        ));
    }

    #[test]
    fn artscat4_is_unchanged() {
        let catalog = SpeciesCatalog::builtin();
        let line = test_lines::h2o_v4();
        assert_eq!(artscat4_from_artscat3(&line, catalog).unwrap(), line);
    }
}
