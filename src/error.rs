use thiserror::Error;

/// Possible errors from the absorption, scattering and Jacobian code.
#[derive(Debug, Error)]
pub enum RtError {
    /// The inputs don't have the expected shape(s)
    #[error("inconsistent inputs: {0}")]
    InconsistentInputs(String),

    /// A species or isotopologue identifier is not in the species table
    #[error("unknown species or isotopologue: {0}")]
    UnknownSpecies(String),

    /// A line catalogue entry could not be parsed
    #[error("malformed catalogue at line {line}: {reason}")]
    MalformedCatalogue {
        /// Physical line number (1-based) where the entry starts
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Only ARTSCAT-3 and ARTSCAT-4 are understood
    #[error("unsupported line catalogue version ARTSCAT-{0}, allowed are 3 and 4")]
    UnsupportedCatalogueVersion(u32),

    /// A foreign broadening slot that coincides with "self" disagrees with the self parameters
    #[error("broadening by {species} should be identical to self broadening for line at {frequency} Hz")]
    BroadeningInconsistency {
        /// Name of the broadening species slot
        species: &'static str,
        /// Line center frequency
        frequency: f64,
    },

    /// Cutoff requires a sorted frequency grid
    #[error("frequency grid must be sorted when a lineshape cutoff is used (duplicates are allowed)")]
    UnsortedFrequencyGrid,

    /// Temperatures must be non-negative
    #[error("temperature profile contains a negative value ({0} K)")]
    NegativeTemperature(f64),

    /// Partition function missing or non-positive
    #[error("partition function error: {0}")]
    PartitionFunction(String),

    /// An angular, atmospheric or cloudbox grid is not usable
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// A keyword or numeric argument is outside its allowed range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The scattering solver exceeded its iteration limit
    #[error("DOIT did not converge after {0} iterations")]
    NonConvergence(usize),

    /// The same (main tag, subtag) pair was registered twice
    #[error("{maintag} retrieval quantity '{subtag}' is already included")]
    DuplicateRetrievalQuantity {
        /// Main tag of the quantity
        maintag: String,
        /// Subtag of the quantity
        subtag: String,
    },

    /// A retrieval grid is not covered by the atmospheric grid
    #[error("retrieval grid {0} is not covered by the corresponding atmospheric grid")]
    GridCoverage(String),

    /// Number density species retrievals and temperature retrievals are exclusive
    #[error("retrieval of temperature and number densities can not be mixed")]
    ModeConflict,

    /// Retrieval quantities can't be added once the Jacobian is closed
    #[error("the Jacobian is closed, no retrieval quantities can be added")]
    JacobianClosed,

    /// Jacobian calculations need column indices from `close`
    #[error("the Jacobian must be closed before any calculation")]
    JacobianNotClosed,

    /// A calculation refers to a quantity that was never added
    #[error("no retrieval quantity defined for {0}")]
    MissingRetrievalQuantity(String),

    /// The operation was aborted early
    #[error("operation cancelled early")]
    Cancelled,

    /// Reading or writing a stream failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RtError {
    /// Shape mismatch for a named variable.
    pub(crate) fn shape(name: &str, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        RtError::InconsistentInputs(format!(
            "{name} has shape {actual:?}, expected {expected:?}"
        ))
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        RtError::MalformedCatalogue {
            line,
            reason: reason.into(),
        }
    }
}
