//! Spectral line records and the ARTSCAT line catalogue format.
//!
//! A catalogue document has an XML-like header naming the format version,
//!
//! ```text
//! <?xml version="1.0"?>
//! <arts format="ascii" version="1">
//! <ArrayOfLineRecord version="ARTSCAT-3" nelem="2">
//! @ O3-676 80015326542.0992 0 3.70209114155527e-19 296 7.73661776567701e-21 21480.3182341969
//! 28906.7092490501 0.76 0.76 296 0
//! ...
//! </ArrayOfLineRecord>
//! </arts>
//! ```
//!
//! followed by one entry per line, each starting with `@`. Fields are separated
//! by whitespace and an entry may continue over several physical lines.
//!
//! ARTSCAT-3 fields: `NAME F PSF I0 T_I0 ELOW AGAM SGAM NAIR NSELF T_GAM N_AUX
//! AUX...`, optionally followed by the accuracies `DF DI0 DAGAM DSGAM DNAIR
//! DNSELF DPSF` (-1 for unknown).
//!
//! ARTSCAT-4 fields: `NAME F I0 T_I0 ELOW A G_UP G_LOW GAMMA_SELF GAMMA_x6
//! N_SELF N_x6 DELTA_x6`, optionally followed by quantum numbers as free text.
//! The six foreign broadening species are, in order, those of
//! [`BROADENING_SPECIES`].

mod convert;
mod reader;
mod writer;

use smallvec::SmallVec;

pub use self::convert::artscat4_from_artscat3;
pub use self::reader::{read_catalogue, CatalogueReader};
pub use self::writer::{write_catalogue, write_line_record};

/// Number of foreign broadening species of ARTSCAT-4
pub const N_BROADENING_SPECIES: usize = 6;

/// Names of the foreign broadening species of ARTSCAT-4, in slot order.
pub const BROADENING_SPECIES: [&str; N_BROADENING_SPECIES] = ["N2", "O2", "H2O", "CO2", "H2", "He"];

/// Fields that only exist in ARTSCAT-3 entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Artscat3Fields {
    /// Pressure shift of F in Hz/Pa
    pub psf: f64,
    /// Air broadened width in Hz/Pa
    pub agam: f64,
    /// Temperature exponent of AGAM
    pub nair: f64,
    /// Reference temperature of AGAM and SGAM in K
    pub tgam: f64,
    /// Auxiliary parameters
    pub aux: SmallVec<[f64; 4]>,
    /// Accuracy of F in Hz, -1 if unknown
    pub df: f64,
    /// Accuracy of I0 in %, -1 if unknown
    pub di0: f64,
    /// Accuracy of AGAM in %, -1 if unknown
    pub dagam: f64,
    /// Accuracy of SGAM in %, -1 if unknown
    pub dsgam: f64,
    /// Accuracy of NAIR in %, -1 if unknown
    pub dnair: f64,
    /// Accuracy of NSELF in %, -1 if unknown
    pub dnself: f64,
    /// Accuracy of PSF in %, -1 if unknown
    pub dpsf: f64,
}

/// Fields that only exist in ARTSCAT-4 entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Artscat4Fields {
    /// Einstein A coefficient in 1/s
    pub a: f64,
    /// Upper state statistical weight
    pub g_upper: f64,
    /// Lower state statistical weight
    pub g_lower: f64,
    /// Foreign broadening parameters in Hz/Pa
    pub gamma_foreign: [f64; N_BROADENING_SPECIES],
    /// Foreign broadening temperature exponents
    pub n_foreign: [f64; N_BROADENING_SPECIES],
    /// Foreign pressure shift parameters in Hz/Pa
    pub delta_foreign: [f64; N_BROADENING_SPECIES],
    /// Vibrational and rotational assignments, species specific coding
    pub quantum_numbers: String,
}

/// The format specific part of a line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineFormat {
    /// ARTSCAT-3: air and self broadening
    Artscat3(Artscat3Fields),
    /// ARTSCAT-4: self broadening plus six explicit foreign species
    Artscat4(Artscat4Fields),
}

/// One spectroscopic transition.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    /// Species index in the species catalogue
    pub species: usize,
    /// Isotopologue index within the species
    pub isotopologue: usize,
    /// Center frequency in Hz
    pub f: f64,
    /// Line intensity in Hz m² per isotopologue, at `ti0`
    pub i0: f64,
    /// Reference temperature of `i0` in K. For ARTSCAT-4 also the reference
    /// temperature of the broadening parameters.
    pub ti0: f64,
    /// Lower state energy in J
    pub elow: f64,
    /// Self broadened width in Hz/Pa
    pub sgam: f64,
    /// Temperature exponent of `sgam`
    pub nself: f64,
    /// Version specific fields
    pub format: LineFormat,
}

impl LineRecord {
    /// The catalogue version number, 3 or 4.
    pub fn version(&self) -> u32 {
        match self.format {
            LineFormat::Artscat3(_) => 3,
            LineFormat::Artscat4(_) => 4,
        }
    }

    /// Species index in the species catalogue.
    pub fn species_index(&self) -> usize {
        self.species
    }

    /// Isotopologue index within the species.
    pub fn isotopologue_index(&self) -> usize {
        self.isotopologue
    }

    /// The ARTSCAT-3 fields, if this is a version 3 line.
    pub fn artscat3(&self) -> Option<&Artscat3Fields> {
        match &self.format {
            LineFormat::Artscat3(v3) => Some(v3),
            LineFormat::Artscat4(_) => None,
        }
    }

    /// The ARTSCAT-4 fields, if this is a version 4 line.
    pub fn artscat4(&self) -> Option<&Artscat4Fields> {
        match &self.format {
            LineFormat::Artscat3(_) => None,
            LineFormat::Artscat4(v4) => Some(v4),
        }
    }
}
