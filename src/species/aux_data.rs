//! Per-isotopologue auxiliary parameters, e.g. isotopologue ratio overrides.

use std::io::BufRead;

use log::debug;
use ndarray::Array2;

use super::{SpeciesCatalog, SpeciesTag};
use crate::error::RtError;

/// A matrix of parameters (isotopologue × parameter) for every species of a
/// catalogue. Parameter 0 is the isotopologue ratio.
#[derive(Debug, Clone)]
pub struct SpeciesAuxData {
    params: Vec<Array2<f64>>,
}

impl SpeciesAuxData {
    /// All parameters set to NaN.
    pub fn init_params(catalog: &SpeciesCatalog, nparams: usize) -> Self {
        let params = catalog
            .species()
            .iter()
            .map(|sr| Array2::from_elem((sr.isotopologues.len(), nparams), f64::NAN))
            .collect();
        Self { params }
    }

    /// One parameter holding the catalogue abundances.
    pub fn from_catalog_abundances(catalog: &SpeciesCatalog) -> Self {
        let mut aux = Self::init_params(catalog, 1);
        for (sp, sr) in catalog.species().iter().enumerate() {
            for (iso, rec) in sr.isotopologues.iter().enumerate() {
                aux.params[sp][[iso, 0]] = rec.abundance;
            }
        }
        aux
    }

    /// Read `nparams` parameters per record from a stream.
    ///
    /// Records start with `@` followed by a "Species-Isotopologue" identifier
    /// and the parameters, all separated by whitespace. Any other line is a
    /// comment. Isotopologues without a record keep NaN.
    pub fn read_from_stream<R: BufRead>(
        catalog: &SpeciesCatalog,
        reader: R,
        nparams: usize,
    ) -> Result<Self, RtError> {
        let mut aux = Self::init_params(catalog, nparams);
        let mut nrecords = 0;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let Some(record) = line.strip_prefix('@') else {
                continue;
            };

            let mut fields = record.split_whitespace();
            let Some(id) = fields.next() else {
                continue;
            };
            let (sp, iso) = catalog.lookup(id)?;

            for ip in 0..nparams {
                let value = fields
                    .next()
                    .ok_or_else(|| RtError::malformed(index + 1, format!("{id}: missing parameter {ip}")))?
                    .parse::<f64>()
                    .map_err(|e| RtError::malformed(index + 1, format!("{id}: parameter {ip}: {e}")))?;
                aux.params[sp][[iso, ip]] = value;
            }
            nrecords += 1;
        }

        debug!("read {nrecords} species auxiliary data records");
        Ok(aux)
    }

    /// Parameter `ip` of an isotopologue.
    #[inline]
    pub fn get_param(&self, species: usize, isotopologue: usize, ip: usize) -> f64 {
        self.params[species][[isotopologue, ip]]
    }

    /// Set parameter `ip` of an isotopologue.
    pub fn set_param(&mut self, species: usize, isotopologue: usize, ip: usize, value: f64) {
        self.params[species][[isotopologue, ip]] = value;
    }

    /// Parameter matrices, one per species.
    pub fn params(&self) -> &[Array2<f64>] {
        &self.params
    }

    /// Check that every non-continuum isotopologue of the used species has a
    /// valid (non-negative, not NaN) ratio.
    pub fn check_isotopologue_ratios(
        &self,
        catalog: &SpeciesCatalog,
        abs_species: &[Vec<SpeciesTag>],
    ) -> Result<(), RtError> {
        if self.params.len() != catalog.len() {
            return Err(RtError::InconsistentInputs(format!(
                "number of species in auxiliary data ({}) does not fit the species catalogue ({})",
                self.params.len(),
                catalog.len()
            )));
        }

        for group in abs_species {
            let Some(tag) = group.first() else {
                continue;
            };
            let sp = tag.species;
            let sr = catalog
                .get(sp)
                .ok_or_else(|| RtError::UnknownSpecies(format!("species index {sp}")))?;

            if sr.isotopologues.len() != self.params[sp].nrows() {
                return Err(RtError::InconsistentInputs(format!(
                    "species {}: auxiliary data has {} isotopologues, the catalogue {}",
                    sr.name,
                    self.params[sp].nrows(),
                    sr.isotopologues.len()
                )));
            }
            if self.params[sp].ncols() == 0 {
                return Err(RtError::InconsistentInputs(
                    "auxiliary data has no isotopologue ratio parameter".into(),
                ));
            }

            for (iso, rec) in sr.isotopologues.iter().enumerate() {
                let ratio = self.params[sp][[iso, 0]];
                if !rec.is_continuum() && (ratio.is_nan() || ratio < 0.) {
                    return Err(RtError::InvalidArgument(format!(
                        "invalid isotopologue ratio {ratio} for {}-{}",
                        sr.name, rec.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_overrides_one_ratio() {
        let catalog = SpeciesCatalog::builtin();
        let text = "# isotopologue ratios\n@ O3-668 0.004 1.5\n\n@ O3-666 0.99 2\n";
        let aux = SpeciesAuxData::read_from_stream(catalog, Cursor::new(text), 2).unwrap();

        let (sp, iso) = catalog.lookup("O3-668").unwrap();
        assert_eq!(aux.get_param(sp, iso, 0), 0.004);
        assert_eq!(aux.get_param(sp, iso, 1), 1.5);
        let (_, iso) = catalog.lookup("O3-686").unwrap();
        assert!(aux.get_param(sp, iso, 0).is_nan());
    }

    #[test]
    fn unknown_identifier_is_fatal() {
        let catalog = SpeciesCatalog::builtin();
        let err = SpeciesAuxData::read_from_stream(catalog, Cursor::new("@ O3-000 1\n"), 1).unwrap_err();
        assert!(matches!(err, RtError::UnknownSpecies(_)));

        let err = SpeciesAuxData::read_from_stream(catalog, Cursor::new("@ O3-666\n"), 1).unwrap_err();
        assert!(matches!(err, RtError::MalformedCatalogue { line: 1, .. }));
    }

    #[test]
    fn ratio_checks_skip_continua() {
        let catalog = SpeciesCatalog::builtin();
        let mut aux = SpeciesAuxData::from_catalog_abundances(catalog);
        let h2o = vec![SpeciesTag::parse(catalog, "H2O").unwrap()];
        aux.check_isotopologue_ratios(catalog, &[h2o.clone()]).unwrap();

        let (sp, iso) = catalog.lookup("H2O-181").unwrap();
        aux.set_param(sp, iso, 0, -1.);
        assert!(aux.check_isotopologue_ratios(catalog, &[h2o]).is_err());
    }
}
