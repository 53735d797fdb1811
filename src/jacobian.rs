//! Jacobians of simulated measurements.
//!
//! Retrieval quantities are registered with the `add_*` methods of
//! [`Jacobian`]. Closing the Jacobian assigns each quantity a range of
//! columns. After that, [`Jacobian::calc_block`] fills the rows of one
//! measurement block, quantity by quantity in registration order.
//!
//! A quantity is either calculated analytically by the radiative transfer
//! code (see [`analytical`]) or here, by perturbing the atmosphere or the
//! sensor, recalculating the measurement and dividing the difference by the
//! perturbation size. Baseline fits need no recalculation: their Jacobian is
//! the basis function itself.

pub mod analytical;
pub mod basis;
mod calc;
pub mod grids;
pub mod model;

#[cfg(test)]
mod tests;

use std::fmt;

use log::{debug, info};

pub use self::grids::AtmosphericGrids;
pub use self::model::{AtmosphericState, ForwardModel, Hydrostatic, SensorSetup};
use self::grids::check_retrieval_grids;
use crate::error::RtError;
use crate::species::{parse_tag_group, SpeciesCatalog, SpeciesTag};

/// Largest allowed frequency shift or stretch perturbation (Hz)
const MAX_DF: f64 = 1e6;

/// Largest allowed pointing perturbation (degrees)
const MAX_DZA: f64 = 0.1;

/// How a quantity's Jacobian is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcMethod {
    /// Along the propagation path, by the radiative transfer code
    Analytical,
    /// By finite differences of perturbed forward model runs
    Perturbation,
}

impl CalcMethod {
    /// Parse "analytical" or "perturbation".
    pub fn from_keyword(keyword: &str) -> Result<Self, RtError> {
        match keyword {
            "analytical" => Ok(CalcMethod::Analytical),
            "perturbation" => Ok(CalcMethod::Perturbation),
            _ => Err(RtError::InvalidArgument(format!(
                "the calculation method can only be \"analytical\" or \"perturbation\", got \"{keyword}\""
            ))),
        }
    }
}

/// Unit of a gas species Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeciesUnit {
    /// Volume mixing ratio
    Vmr,
    /// Number density
    Nd,
    /// Fraction of the a priori profile
    Rel,
    /// Natural logarithm of the relative profile
    Logrel,
}

impl SpeciesUnit {
    /// Parse "vmr", "nd", "rel" or "logrel".
    pub fn from_keyword(keyword: &str) -> Result<Self, RtError> {
        match keyword {
            "vmr" => Ok(SpeciesUnit::Vmr),
            "nd" => Ok(SpeciesUnit::Nd),
            "rel" => Ok(SpeciesUnit::Rel),
            "logrel" => Ok(SpeciesUnit::Logrel),
            _ => Err(RtError::InvalidArgument(format!(
                "allowed units for gas species Jacobians are \"rel\", \"vmr\", \"nd\" and \"logrel\", got \"{keyword}\""
            ))),
        }
    }

    /// The unit keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            SpeciesUnit::Vmr => "vmr",
            SpeciesUnit::Nd => "nd",
            SpeciesUnit::Rel => "rel",
            SpeciesUnit::Logrel => "logrel",
        }
    }
}

/// A wind component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindComponent {
    /// Eastward
    U,
    /// Northward
    V,
    /// Upward
    W,
}

impl WindComponent {
    /// Parse "u", "v" or "w".
    pub fn from_keyword(keyword: &str) -> Result<Self, RtError> {
        match keyword {
            "u" => Ok(WindComponent::U),
            "v" => Ok(WindComponent::V),
            "w" => Ok(WindComponent::W),
            _ => Err(RtError::InvalidArgument(format!(
                "the wind component can only be \"u\", \"v\" or \"w\", got \"{keyword}\""
            ))),
        }
    }

    /// 1, 2 or 3 for u, v and w.
    pub fn index(&self) -> usize {
        match self {
            WindComponent::U => 1,
            WindComponent::V => 2,
            WindComponent::W => 3,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            WindComponent::U => "u",
            WindComponent::V => "v",
            WindComponent::W => "w",
        }
    }
}

/// How a pointing Jacobian is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointingCalc {
    /// Rerun the forward model with an offset line of sight
    Recalc,
    /// Interpolate iyb in zenith angle
    Interp,
}

impl PointingCalc {
    /// Parse "recalc" or "interp".
    pub fn from_keyword(keyword: &str) -> Result<Self, RtError> {
        match keyword {
            "recalc" => Ok(PointingCalc::Recalc),
            "interp" => Ok(PointingCalc::Interp),
            _ => Err(RtError::InvalidArgument(format!(
                "possible choices for the pointing calculation are \"recalc\" and \"interp\", got \"{keyword}\""
            ))),
        }
    }
}

/// What a retrieval quantity is.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityKind {
    /// Profile of a gas species
    AbsSpecies {
        /// Tag group of the species
        tags: Vec<SpeciesTag>,
        /// Name of the tag group
        name: String,
        /// Unit of the Jacobian
        unit: SpeciesUnit,
    },
    /// Atmospheric temperature
    Temperature {
        /// Altitudes follow hydrostatic equilibrium
        hse: bool,
    },
    /// A wind component
    Wind(WindComponent),
    /// Frequency shift of the sensor
    FrequencyShift,
    /// Frequency stretch of the sensor
    FrequencyStretch,
    /// Zenith angle offset of the sensor pointing
    PointingZa(PointingCalc),
    /// Polynomial baseline, one quantity per coefficient
    Polyfit {
        /// Polynomial order of the coefficient
        coefficient: usize,
    },
    /// Sinusoidal baseline, one quantity per period
    Sinefit {
        /// Index of the period
        period: usize,
    },
}

impl QuantityKind {
    /// Main tag, the type of the quantity.
    pub fn maintag(&self) -> &'static str {
        match self {
            QuantityKind::AbsSpecies { .. } => "Absorption species",
            QuantityKind::Temperature { .. } => "Temperature",
            QuantityKind::Wind(_) => "Wind",
            QuantityKind::FrequencyShift | QuantityKind::FrequencyStretch => "Frequency",
            QuantityKind::PointingZa(_) => "Sensor pointing",
            QuantityKind::Polyfit { .. } => "Polynomial baseline fit",
            QuantityKind::Sinefit { .. } => "Sinusoidal baseline fit",
        }
    }

    /// Subtag, which quantity of its type.
    pub fn subtag(&self) -> String {
        match self {
            QuantityKind::AbsSpecies { name, .. } => name.clone(),
            QuantityKind::Temperature { hse: true } => "HSE on".to_string(),
            QuantityKind::Temperature { hse: false } => "HSE off".to_string(),
            QuantityKind::Wind(component) => component.keyword().to_string(),
            QuantityKind::FrequencyShift => "Shift".to_string(),
            QuantityKind::FrequencyStretch => "Stretch".to_string(),
            QuantityKind::PointingZa(_) => "Zenith angle off-set".to_string(),
            QuantityKind::Polyfit { coefficient } => format!("Coefficient {coefficient}"),
            QuantityKind::Sinefit { period } => format!("Period {period}"),
        }
    }

    /// Whether `other` is the same quantity. There is only one temperature
    /// and one pointing quantity, whatever their subtag.
    fn same_quantity(&self, other: &QuantityKind) -> bool {
        match (self, other) {
            (QuantityKind::AbsSpecies { tags: a, .. }, QuantityKind::AbsSpecies { tags: b, .. }) => a == b,
            (QuantityKind::Temperature { .. }, QuantityKind::Temperature { .. })
            | (QuantityKind::PointingZa(_), QuantityKind::PointingZa(_)) => true,
            _ => self == other,
        }
    }
}

/// One registered retrieval quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuantity {
    kind: QuantityKind,
    method: CalcMethod,
    perturbation: f64,
    grids: Vec<Vec<f64>>,
}

impl RetrievalQuantity {
    /// What the quantity is
    pub fn kind(&self) -> &QuantityKind {
        &self.kind
    }

    /// See [`QuantityKind::maintag`]
    pub fn maintag(&self) -> &'static str {
        self.kind.maintag()
    }

    /// See [`QuantityKind::subtag`]
    pub fn subtag(&self) -> String {
        self.kind.subtag()
    }

    /// Calculated along the propagation path
    pub fn is_analytical(&self) -> bool {
        self.method == CalcMethod::Analytical
    }

    /// Perturbation size, in the unit of the quantity
    pub fn perturbation(&self) -> f64 {
        self.perturbation
    }

    /// The retrieval grids. Atmospheric quantities have a pressure grid plus a
    /// latitude and longitude grid in 2D and 3D. Sensor quantities have a
    /// single grid of polynomial orders (one point per measurement block for
    /// a polynomial order of -1). Baseline fits have four: coefficient,
    /// polarization, viewing direction and measurement block.
    pub fn grids(&self) -> &[Vec<f64>] {
        &self.grids
    }

    /// Number of Jacobian columns of the quantity.
    pub fn n_columns(&self) -> usize {
        self.grids.iter().map(Vec::len).product()
    }
}

impl fmt::Display for RetrievalQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.maintag(), self.subtag())
    }
}

/// Column ranges assigned when closing.
#[derive(Debug, Clone, PartialEq)]
struct Layout {
    indices: Vec<[usize; 2]>,
    n_blocks: usize,
    n1y: usize,
}

/// The retrieval quantities and their Jacobian columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Jacobian {
    enabled: bool,
    quantities: Vec<RetrievalQuantity>,
    layout: Option<Layout>,
}

impl Default for Jacobian {
    fn default() -> Self {
        Self::new()
    }
}

impl Jacobian {
    /// An open Jacobian without quantities.
    pub fn new() -> Self {
        Self {
            enabled: true,
            quantities: Vec::new(),
            layout: None,
        }
    }

    /// No Jacobian calculations. Nothing can be added, and the calculations
    /// do nothing.
    pub fn off() -> Self {
        Self {
            enabled: false,
            quantities: Vec::new(),
            layout: Some(Layout {
                indices: Vec::new(),
                n_blocks: 0,
                n1y: 0,
            }),
        }
    }

    /// Whether Jacobians are calculated at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The registered quantities, in registration order
    pub fn quantities(&self) -> &[RetrievalQuantity] {
        &self.quantities
    }

    /// First and last column of each quantity, once closed.
    pub fn indices(&self) -> Option<&[[usize; 2]]> {
        self.layout.as_ref().map(|l| l.indices.as_slice())
    }

    /// First and last column of a registered quantity.
    pub fn columns_of(&self, kind: &QuantityKind) -> Result<[usize; 2], RtError> {
        let layout = self.layout()?;
        self.quantities
            .iter()
            .zip(&layout.indices)
            .find(|(q, _)| q.kind.same_quantity(kind))
            .map(|(_, range)| *range)
            .ok_or_else(|| RtError::MissingRetrievalQuantity(format!("{}: {}", kind.maintag(), kind.subtag())))
    }

    /// Total number of columns
    pub fn n_columns(&self) -> usize {
        self.quantities.iter().map(RetrievalQuantity::n_columns).sum()
    }

    fn push(&mut self, quantity: RetrievalQuantity) -> Result<(), RtError> {
        if self.layout.is_some() {
            return Err(RtError::JacobianClosed);
        }
        if self.quantities.iter().any(|q| q.kind.same_quantity(&quantity.kind)) {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: quantity.maintag().to_string(),
                subtag: quantity.subtag(),
            });
        }
        debug!("adding retrieval quantity {quantity} with {} columns", quantity.n_columns());
        self.quantities.push(quantity);
        Ok(())
    }

    fn check_open(&self) -> Result<(), RtError> {
        match self.layout {
            Some(_) => Err(RtError::JacobianClosed),
            None => Ok(()),
        }
    }

    /// Add a gas species profile.
    ///
    /// `species` is a tag group of the builtin species catalogue, `method`
    /// "analytical" or "perturbation" and `mode` one of "vmr", "nd", "rel" and
    /// "logrel". Perturbations of `dx` are fractions of the profile for
    /// "rel" and absolute for the other units. Number densities can not be
    /// combined with temperature.
    #[allow(clippy::too_many_arguments)]
    pub fn add_abs_species(
        &mut self,
        atmosphere: &AtmosphericGrids,
        rq_p_grid: &[f64],
        rq_lat_grid: &[f64],
        rq_lon_grid: &[f64],
        species: &str,
        method: &str,
        mode: &str,
        dx: f64,
    ) -> Result<(), RtError> {
        self.check_open()?;
        let catalog = SpeciesCatalog::builtin();
        let tags = parse_tag_group(catalog, species)?;
        let name = tags.iter().map(|t| t.name(catalog)).collect::<Vec<_>>().join(",");
        let unit = SpeciesUnit::from_keyword(mode)?;
        let kind = QuantityKind::AbsSpecies { tags, name, unit };
        if let Some(q) = self.quantities.iter().find(|q| q.kind.same_quantity(&kind)) {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: q.maintag().to_string(),
                subtag: q.subtag(),
            });
        }

        let grids = check_retrieval_grids(atmosphere, rq_p_grid, rq_lat_grid, rq_lon_grid)?;
        let method = CalcMethod::from_keyword(method)?;
        if unit == SpeciesUnit::Nd && self.has_temperature() {
            return Err(RtError::ModeConflict);
        }
        check_perturbation_size(method, dx)?;

        self.push(RetrievalQuantity {
            kind,
            method,
            perturbation: dx,
            grids,
        })
    }

    fn has_temperature(&self) -> bool {
        self.quantities
            .iter()
            .any(|q| matches!(q.kind, QuantityKind::Temperature { .. }))
    }

    /// Add the atmospheric temperature.
    ///
    /// `hse` is "on" or "off": with hydrostatic equilibrium, the altitudes
    /// are recalculated after each perturbation. Perturbations of `dx` K are
    /// absolute.
    #[allow(clippy::too_many_arguments)]
    pub fn add_temperature(
        &mut self,
        atmosphere: &AtmosphericGrids,
        rq_p_grid: &[f64],
        rq_lat_grid: &[f64],
        rq_lon_grid: &[f64],
        hse: &str,
        method: &str,
        dx: f64,
    ) -> Result<(), RtError> {
        self.check_open()?;
        if self.has_temperature() {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: "Temperature".to_string(),
                subtag: hse.to_string(),
            });
        }
        let nd_species = self.quantities.iter().any(|q| {
            matches!(
                q.kind,
                QuantityKind::AbsSpecies {
                    unit: SpeciesUnit::Nd,
                    ..
                }
            )
        });
        if nd_species {
            return Err(RtError::ModeConflict);
        }

        let grids = check_retrieval_grids(atmosphere, rq_p_grid, rq_lat_grid, rq_lon_grid)?;
        let method = CalcMethod::from_keyword(method)?;
        let hse = match hse {
            "on" => true,
            "off" => false,
            _ => {
                return Err(RtError::InvalidArgument(format!(
                    "hydrostatic equilibrium can only be \"on\" or \"off\", got \"{hse}\""
                )))
            }
        };
        check_perturbation_size(method, dx)?;

        if method == CalcMethod::Perturbation {
            info!("temperature Jacobian by perturbations of {dx} K");
        }
        self.push(RetrievalQuantity {
            kind: QuantityKind::Temperature { hse },
            method,
            perturbation: dx,
            grids,
        })
    }

    /// Add a wind component, "u", "v" or "w". Winds are always analytical.
    pub fn add_wind(
        &mut self,
        atmosphere: &AtmosphericGrids,
        rq_p_grid: &[f64],
        rq_lat_grid: &[f64],
        rq_lon_grid: &[f64],
        component: &str,
    ) -> Result<(), RtError> {
        self.check_open()?;
        let component = WindComponent::from_keyword(component)?;
        if self.quantities.iter().any(|q| q.kind == QuantityKind::Wind(component)) {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: "Wind".to_string(),
                subtag: component.keyword().to_string(),
            });
        }
        let grids = check_retrieval_grids(atmosphere, rq_p_grid, rq_lat_grid, rq_lon_grid)?;
        self.push(RetrievalQuantity {
            kind: QuantityKind::Wind(component),
            method: CalcMethod::Analytical,
            perturbation: 0.,
            grids,
        })
    }

    /// Add a frequency shift of the sensor, as a polynomial in time of order
    /// `poly_order`, or one shift per measurement block for -1. `df` (Hz) is
    /// the perturbation.
    pub fn add_freq_shift(&mut self, sensor: &SensorSetup, poly_order: i64, df: f64) -> Result<(), RtError> {
        self.add_frequency(QuantityKind::FrequencyShift, sensor, poly_order, df)
    }

    /// Add a frequency stretch of the sensor: a shift growing linearly over
    /// the frequencies of the sensor response. Arguments as for
    /// [`Jacobian::add_freq_shift`].
    pub fn add_freq_stretch(&mut self, sensor: &SensorSetup, poly_order: i64, df: f64) -> Result<(), RtError> {
        self.add_frequency(QuantityKind::FrequencyStretch, sensor, poly_order, df)
    }

    fn add_frequency(
        &mut self,
        kind: QuantityKind,
        sensor: &SensorSetup,
        poly_order: i64,
        df: f64,
    ) -> Result<(), RtError> {
        self.check_open()?;
        let grid = time_polynomial_grid(sensor, poly_order)?;
        if self.quantities.iter().any(|q| q.kind == kind) {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: kind.maintag().to_string(),
                subtag: kind.subtag(),
            });
        }
        if df.is_nan() || df <= 0. {
            return Err(RtError::InvalidArgument(format!("df must be > 0, got {df}")));
        }
        if df > MAX_DF {
            return Err(RtError::InvalidArgument(format!(
                "df is not allowed to exceed 1 MHz, got {} kHz",
                df / 1e3
            )));
        }
        let f_grid = sensor.f_grid();
        let nf = f_grid.len();
        if nf < 2 {
            return Err(RtError::InvalidGrid(
                "frequency Jacobians need at least two frequencies".to_string(),
            ));
        }
        let max_df = f_grid[nf - 1] - f_grid[nf - 2];
        if df > max_df {
            return Err(RtError::InvalidArgument(format!(
                "df is too big for the spacing of f_grid, the maximum is the spacing between the two last frequencies: {} kHz, df is {} kHz",
                max_df / 1e3,
                df / 1e3
            )));
        }

        self.push(RetrievalQuantity {
            kind,
            method: CalcMethod::Perturbation,
            perturbation: df,
            grids: vec![grid],
        })
    }

    /// Add a zenith angle offset of the sensor pointing, as a polynomial in
    /// time (see [`Jacobian::add_freq_shift`]). `calcmode` is "recalc" or
    /// "interp" and `dza` (degrees) the perturbation.
    pub fn add_pointing_za(
        &mut self,
        sensor: &SensorSetup,
        poly_order: i64,
        calcmode: &str,
        dza: f64,
    ) -> Result<(), RtError> {
        self.check_open()?;
        let grid = time_polynomial_grid(sensor, poly_order)?;
        let calc = PointingCalc::from_keyword(calcmode)?;
        if dza.is_nan() || dza <= 0. {
            return Err(RtError::InvalidArgument(format!("dza must be > 0, got {dza}")));
        }
        if dza > MAX_DZA {
            return Err(RtError::InvalidArgument(format!(
                "dza is not allowed to exceed 0.1 deg, got {dza}"
            )));
        }
        if calc == PointingCalc::Interp && sensor.mblock_za_grid().len() < 2 {
            return Err(RtError::InvalidGrid(
                "pointing by interpolation needs at least two block zenith angles".to_string(),
            ));
        }

        self.push(RetrievalQuantity {
            kind: QuantityKind::PointingZa(calc),
            method: CalcMethod::Perturbation,
            perturbation: dza,
            grids: vec![grid],
        })
    }

    /// Add a polynomial baseline of order `poly_order`, one quantity per
    /// coefficient. Unless disabled, each polarization, viewing direction and
    /// measurement block gets its own baseline.
    pub fn add_polyfit(
        &mut self,
        sensor: &SensorSetup,
        poly_order: usize,
        no_pol_variation: bool,
        no_los_variation: bool,
        no_mblock_variation: bool,
    ) -> Result<(), RtError> {
        self.check_open()?;
        if self
            .quantities
            .iter()
            .any(|q| matches!(q.kind, QuantityKind::Polyfit { .. }))
        {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: "Polynomial baseline fit".to_string(),
                subtag: "Coefficient 0".to_string(),
            });
        }
        let variation = baseline_grids(sensor, no_pol_variation, no_los_variation, no_mblock_variation);
        for coefficient in 0..=poly_order {
            let mut grids = vec![vec![coefficient as f64]];
            grids.extend(variation.iter().cloned());
            self.push(RetrievalQuantity {
                kind: QuantityKind::Polyfit { coefficient },
                method: CalcMethod::Perturbation,
                perturbation: 0.,
                grids,
            })?;
        }
        Ok(())
    }

    /// Add a sinusoidal baseline, one quantity per period length (in the
    /// unit of the sensor response frequencies). Each quantity has a sine
    /// and a cosine column per baseline, see [`Jacobian::add_polyfit`].
    pub fn add_sinefit(
        &mut self,
        sensor: &SensorSetup,
        period_lengths: &[f64],
        no_pol_variation: bool,
        no_los_variation: bool,
        no_mblock_variation: bool,
    ) -> Result<(), RtError> {
        self.check_open()?;
        if period_lengths.is_empty() {
            return Err(RtError::InvalidArgument("no sinusoidal periods have been given".to_string()));
        }
        if let Some(p) = period_lengths.iter().find(|&&p| p.is_nan() || p <= 0.) {
            return Err(RtError::InvalidArgument(format!("period lengths must be positive, got {p}")));
        }
        if self
            .quantities
            .iter()
            .any(|q| matches!(q.kind, QuantityKind::Sinefit { .. }))
        {
            return Err(RtError::DuplicateRetrievalQuantity {
                maintag: "Sinusoidal baseline fit".to_string(),
                subtag: "Period 0".to_string(),
            });
        }
        let variation = baseline_grids(sensor, no_pol_variation, no_los_variation, no_mblock_variation);
        for (period, &length) in period_lengths.iter().enumerate() {
            let mut grids = vec![vec![length; 2]];
            grids.extend(variation.iter().cloned());
            self.push(RetrievalQuantity {
                kind: QuantityKind::Sinefit { period },
                method: CalcMethod::Perturbation,
                perturbation: 0.,
                grids,
            })?;
        }
        Ok(())
    }

    /// Close the Jacobian for `n_blocks` measurement blocks of `n1y`
    /// measurements each, and assign the column ranges.
    pub fn close(&mut self, n_blocks: usize, n1y: usize) -> Result<(), RtError> {
        self.check_open()?;
        if self.quantities.is_empty() {
            return Err(RtError::InvalidArgument(
                "no retrieval quantities have been added".to_string(),
            ));
        }
        if n_blocks == 0 {
            return Err(RtError::InvalidArgument(
                "the number of measurement blocks must be at least 1".to_string(),
            ));
        }
        if n1y == 0 {
            return Err(RtError::InvalidArgument(
                "the sensor response has no rows".to_string(),
            ));
        }

        let mut start = 0;
        let indices = self
            .quantities
            .iter()
            .map(|q| {
                let cols = q.n_columns();
                let range = [start, start + cols - 1];
                start += cols;
                range
            })
            .collect();
        info!(
            "closed Jacobian with {} quantities and {start} columns",
            self.quantities.len()
        );
        self.layout = Some(Layout {
            indices,
            n_blocks,
            n1y,
        });
        Ok(())
    }

    fn layout(&self) -> Result<&Layout, RtError> {
        self.layout.as_ref().ok_or(RtError::JacobianNotClosed)
    }
}

fn check_perturbation_size(method: CalcMethod, dx: f64) -> Result<(), RtError> {
    if method == CalcMethod::Perturbation && (!dx.is_finite() || dx == 0.) {
        return Err(RtError::InvalidArgument(format!(
            "the perturbation size must be finite and non-zero, got {dx}"
        )));
    }
    Ok(())
}

/// Grid of polynomial orders 0..=poly_order, or one -1 per measurement block
/// for a polynomial order of -1.
fn time_polynomial_grid(sensor: &SensorSetup, poly_order: i64) -> Result<Vec<f64>, RtError> {
    if poly_order < -1 {
        return Err(RtError::InvalidArgument(format!(
            "the polynomial order has to be positive or -1 for a value per block, got {poly_order}"
        )));
    }
    let n_times = sensor.sensor_time().len() as i64;
    if poly_order > n_times - 1 {
        return Err(RtError::InvalidArgument(format!(
            "the polynomial order ({poly_order}) must be smaller than the number of measurement blocks ({n_times})"
        )));
    }
    Ok(if poly_order == -1 {
        vec![-1.; sensor.n_blocks()]
    } else {
        (0..=poly_order).map(|c| c as f64).collect()
    })
}

/// Polarization, viewing direction and measurement block grids of a baseline.
fn baseline_grids(
    sensor: &SensorSetup,
    no_pol_variation: bool,
    no_los_variation: bool,
    no_mblock_variation: bool,
) -> [Vec<f64>; 3] {
    let grid = |disabled: bool, n: usize| -> Vec<f64> {
        if disabled {
            vec![1.]
        } else {
            (0..n).map(|i| i as f64).collect()
        }
    };
    [
        grid(no_pol_variation, sensor.n_pol()),
        grid(no_los_variation, sensor.n_za()),
        grid(no_mblock_variation, sensor.n_blocks()),
    ]
}
