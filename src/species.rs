//! Species and isotopologue lookup tables.
//!
//! A [`SpeciesCatalog`] is built once, never mutated, and handed by reference to
//! everything that needs species data. The built-in table is available through
//! [`SpeciesCatalog::builtin`].

mod aux_data;
mod builtin;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use log::debug;
use smallvec::SmallVec;

pub use self::aux_data::SpeciesAuxData;
use crate::error::RtError;
use crate::interp::interp_poly;

/// Representation of the partition function of one isotopologue.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionFunction {
    /// Polynomial in temperature, `Q(T) = sum_i c_i T^i`
    FromCoeff(SmallVec<[f64; 4]>),
    /// Tabulated values on a temperature grid, interpolated with a Lagrange
    /// polynomial of the given order
    FromTemp {
        /// Temperature grid in K, strictly increasing
        temperatures: Vec<f64>,
        /// Partition function values on `temperatures`
        values: Vec<f64>,
        /// Interpolation order
        order: usize,
    },
}

impl PartitionFunction {
    /// Evaluate the partition function at `temperature` (K).
    pub fn at(&self, temperature: f64) -> f64 {
        match self {
            PartitionFunction::FromCoeff(coeff) => coeff
                .iter()
                .rev()
                .fold(0., |acc, c| acc * temperature + c),
            PartitionFunction::FromTemp {
                temperatures,
                values,
                order,
            } => {
                if temperatures.is_empty() {
                    0.
                } else {
                    interp_poly(temperatures, values, temperature, *order)
                }
            }
        }
    }
}

/// One isotopologue of a species.
#[derive(Debug, Clone)]
pub struct IsotopologueRecord {
    /// Isotopologue name, e.g. "666" for O3-666, or a continuum model name
    pub name: String,
    /// Natural abundance in [0, 1], NaN when unknown (continua)
    pub abundance: f64,
    /// Molecular mass in g/mol (atomic mass units)
    pub mass: f64,
    /// Molecular tag numbers of the JPL catalogue
    pub jpl_tags: SmallVec<[u32; 2]>,
    /// HITRAN molecule and isotopologue code, e.g. 31 for O3-666
    pub hitran_tag: Option<u32>,
    /// Partition function
    pub partition: PartitionFunction,
}

impl IsotopologueRecord {
    /// Continua are pseudo-isotopologues whose names don't start with a digit.
    pub fn is_continuum(&self) -> bool {
        !self.name.starts_with(|c: char| c.is_ascii_digit())
    }

    /// Ratio of the partition function at the reference temperature to the one
    /// at the actual temperature, `Q(T_ref) / Q(T)`.
    ///
    /// For the tabulated representation both values are taken at the actual
    /// temperature, so the ratio is always one. This matches the established
    /// behaviour of the line-by-line code and is kept until it is confirmed
    /// otherwise.
    pub fn partition_fct_ratio(
        &self,
        reference_temperature: f64,
        actual_temperature: f64,
    ) -> Result<f64, RtError> {
        let (q_ref, q_actual) = match &self.partition {
            PartitionFunction::FromCoeff(_) => (
                self.partition.at(reference_temperature),
                self.partition.at(actual_temperature),
            ),
            PartitionFunction::FromTemp { .. } => (
                self.partition.at(actual_temperature),
                self.partition.at(actual_temperature),
            ),
        };

        if q_actual > 0. {
            Ok(q_ref / q_actual)
        } else {
            Err(RtError::PartitionFunction(format!(
                "partition function of isotopologue {} is {q_actual} at {actual_temperature} K",
                self.name
            )))
        }
    }
}

/// One species with its isotopologues.
#[derive(Debug, Clone)]
pub struct SpeciesRecord {
    /// Species name, e.g. "O3"
    pub name: String,
    /// Rotational degrees of freedom
    pub degrees_of_freedom: u32,
    /// Isotopologues, sorted by decreasing abundance (continua last)
    pub isotopologues: Vec<IsotopologueRecord>,
}

/// Immutable species lookup tables.
#[derive(Debug)]
pub struct SpeciesCatalog {
    species: Vec<SpeciesRecord>,
    /// Species name to species index
    species_map: HashMap<String, usize>,
    /// "Species-Isotopologue" to (species index, isotopologue index)
    isotopologue_map: HashMap<String, (usize, usize)>,
}

impl SpeciesCatalog {
    /// Build a catalogue from species records.
    ///
    /// Abundances must be in [0, 1] (or NaN) and non-continuum isotopologues
    /// must be sorted by decreasing abundance.
    pub fn new(species: Vec<SpeciesRecord>) -> Result<Self, RtError> {
        for (i, sr) in species.iter().enumerate() {
            if species[..i].iter().any(|other| other.name == sr.name) {
                return Err(RtError::InvalidArgument(format!(
                    "species {} is defined twice",
                    sr.name
                )));
            }

            for iso in &sr.isotopologues {
                if !(iso.abundance.is_nan() || (0. ..=1.).contains(&iso.abundance)) {
                    return Err(RtError::InvalidArgument(format!(
                        "abundance of {}-{} is {}, must be in [0, 1] or NaN",
                        sr.name, iso.name, iso.abundance
                    )));
                }
            }

            let abundances: SmallVec<[f64; 8]> = sr
                .isotopologues
                .iter()
                .filter(|iso| !iso.is_continuum())
                .map(|iso| iso.abundance)
                .collect();
            if abundances.windows(2).any(|w| w[1] > w[0]) {
                return Err(RtError::InvalidArgument(format!(
                    "isotopologues of {} are not sorted by decreasing abundance",
                    sr.name
                )));
            }
        }

        Ok(Self::index(species))
    }

    /// Build the lookup maps.
    fn index(species: Vec<SpeciesRecord>) -> Self {
        let mut species_map = HashMap::with_capacity(species.len());
        let mut isotopologue_map = HashMap::new();
        for (i, sr) in species.iter().enumerate() {
            species_map.insert(sr.name.clone(), i);
            for (j, iso) in sr.isotopologues.iter().enumerate() {
                isotopologue_map.insert(format!("{}-{}", sr.name, iso.name), (i, j));
            }
        }

        debug!(
            "species catalogue with {} species and {} isotopologues",
            species.len(),
            isotopologue_map.len()
        );

        Self {
            species,
            species_map,
            isotopologue_map,
        }
    }

    /// The built-in species table, constructed on first use.
    pub fn builtin() -> &'static SpeciesCatalog {
        static CATALOG: OnceLock<SpeciesCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| Self::index(builtin::species_data()))
    }

    /// Look up a "Species-Isotopologue" identifier, e.g. "O3-666".
    pub fn lookup(&self, name: &str) -> Result<(usize, usize), RtError> {
        self.isotopologue_map
            .get(name)
            .copied()
            .ok_or_else(|| RtError::UnknownSpecies(name.to_string()))
    }

    /// Index of a species by name, e.g. "O3".
    pub fn species_index(&self, name: &str) -> Result<usize, RtError> {
        self.species_map
            .get(name)
            .copied()
            .ok_or_else(|| RtError::UnknownSpecies(name.to_string()))
    }

    /// All species records.
    pub fn species(&self) -> &[SpeciesRecord] {
        &self.species
    }

    /// Species record by index.
    pub fn get(&self, species: usize) -> Option<&SpeciesRecord> {
        self.species.get(species)
    }

    /// Isotopologue record by (species, isotopologue) index pair.
    pub fn isotopologue(&self, species: usize, isotopologue: usize) -> Option<&IsotopologueRecord> {
        self.species.get(species)?.isotopologues.get(isotopologue)
    }

    /// Number of species.
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// True if the catalogue holds no species.
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

/// An absorption species tag: a species, optionally restricted to one
/// isotopologue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeciesTag {
    /// Species index
    pub species: usize,
    /// Isotopologue index, `None` for all isotopologues
    pub isotopologue: Option<usize>,
}

impl SpeciesTag {
    /// Parse "O3", "O3-*" or "O3-666" against a catalogue.
    pub fn parse(catalog: &SpeciesCatalog, tag: &str) -> Result<Self, RtError> {
        let tag = tag.trim();
        match tag.split_once('-') {
            None => Ok(Self {
                species: catalog.species_index(tag)?,
                isotopologue: None,
            }),
            Some((name, "*")) => Ok(Self {
                species: catalog.species_index(name)?,
                isotopologue: None,
            }),
            Some(_) => {
                let (species, isotopologue) = catalog.lookup(tag)?;
                Ok(Self {
                    species,
                    isotopologue: Some(isotopologue),
                })
            }
        }
    }

    /// Name of the tag, e.g. "O3-666".
    pub fn name(&self, catalog: &SpeciesCatalog) -> String {
        let Some(sr) = catalog.get(self.species) else {
            return format!("<species {}>", self.species);
        };
        match self.isotopologue.and_then(|i| sr.isotopologues.get(i)) {
            Some(iso) => format!("{}-{}", sr.name, iso.name),
            None => sr.name.clone(),
        }
    }
}

/// Parse a comma separated tag group, e.g. "H2O-161, H2O-181".
pub fn parse_tag_group(catalog: &SpeciesCatalog, group: &str) -> Result<Vec<SpeciesTag>, RtError> {
    group
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| SpeciesTag::parse(catalog, s))
        .collect()
}

impl FromStr for SpeciesTag {
    type Err = RtError;

    /// Parse against the built-in catalogue.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(SpeciesCatalog::builtin(), s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lookup_known_and_unknown() {
        let catalog = SpeciesCatalog::builtin();
        let (sp, iso) = catalog.lookup("O3-668").unwrap();
        assert_eq!(catalog.species()[sp].name, "O3");
        assert_eq!(catalog.species()[sp].isotopologues[iso].name, "668");

        assert!(matches!(
            catalog.lookup("O3-999"),
            Err(RtError::UnknownSpecies(_))
        ));
        assert!(matches!(
            catalog.species_index("Xx"),
            Err(RtError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn builtin_table_passes_validation() {
        SpeciesCatalog::new(builtin::species_data()).unwrap();
    }

    #[test]
    fn abundances_sorted_and_in_range() {
        for sr in SpeciesCatalog::builtin().species() {
            let mut last = f64::INFINITY;
            for iso in sr.isotopologues.iter().filter(|i| !i.is_continuum()) {
                assert!((0. ..=1.).contains(&iso.abundance), "{}-{}", sr.name, iso.name);
                assert!(iso.abundance <= last);
                last = iso.abundance;
            }
        }
    }

    #[test]
    fn continua_have_unknown_abundance() {
        let catalog = SpeciesCatalog::builtin();
        let (sp, iso) = catalog.lookup("H2O-PWR98").unwrap();
        let rec = catalog.isotopologue(sp, iso).unwrap();
        assert!(rec.is_continuum());
        assert!(rec.abundance.is_nan());
    }

    #[test]
    fn partition_ratio_is_one_at_reference() {
        let catalog = SpeciesCatalog::builtin();
        for id in ["CO-26", "O3-666", "H2O-161", "CO2-626"] {
            let (sp, iso) = catalog.lookup(id).unwrap();
            let rec = catalog.isotopologue(sp, iso).unwrap();
            assert_relative_eq!(rec.partition_fct_ratio(296., 296.).unwrap(), 1.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn tabulated_partition_ratio_ignores_reference_temperature() {
        // The tabulated branch evaluates both values at the actual temperature
        let catalog = SpeciesCatalog::builtin();
        let (sp, iso) = catalog.lookup("O3-666").unwrap();
        let rec = catalog.isotopologue(sp, iso).unwrap();
        assert!(matches!(rec.partition, PartitionFunction::FromTemp { .. }));
        assert_eq!(rec.partition_fct_ratio(296., 200.).unwrap(), 1.0);
        assert_eq!(rec.partition_fct_ratio(150., 320.).unwrap(), 1.0);
    }

    #[test]
    fn polynomial_partition_ratio() {
        let catalog = SpeciesCatalog::builtin();
        let (sp, iso) = catalog.lookup("CO-26").unwrap();
        let rec = catalog.isotopologue(sp, iso).unwrap();
        let expected = rec.partition.at(296.) / rec.partition.at(200.);
        assert_relative_eq!(rec.partition_fct_ratio(296., 200.).unwrap(), expected);
        assert!(expected > 1.);
    }

    #[test]
    fn zero_partition_function_is_an_error() {
        let rec = IsotopologueRecord {
            name: "11".into(),
            abundance: 1.,
            mass: 1.,
            jpl_tags: SmallVec::new(),
            hitran_tag: None,
            partition: PartitionFunction::FromCoeff(SmallVec::new()),
        };
        assert!(matches!(
            rec.partition_fct_ratio(296., 250.),
            Err(RtError::PartitionFunction(_))
        ));
    }

    #[test]
    fn species_tags() {
        let catalog = SpeciesCatalog::builtin();
        let all: SpeciesTag = "O3".parse().unwrap();
        assert_eq!(all.isotopologue, None);
        let one = SpeciesTag::parse(catalog, "O3-666").unwrap();
        assert_eq!(one.species, all.species);
        assert_eq!(one.isotopologue, Some(0));
        assert_eq!(one.name(catalog), "O3-666");

        let group = parse_tag_group(catalog, "H2O-161, H2O-PWR98").unwrap();
        assert_eq!(group.len(), 2);
    }
}
