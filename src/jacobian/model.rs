//! The forward model seen by the Jacobian calculations: atmospheric state,
//! sensor and the calculation of monochromatic pencil beam radiances.

use log::debug;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView1, Axis};

use super::grids::AtmosphericGrids;
use crate::error::RtError;
use crate::interp::{gridpos_single, is_increasing};
use crate::physics::{AVOGADRO, BOLTZMANN_CONST, R_EARTH};
use crate::species::{parse_tag_group, SpeciesCatalog, SpeciesTag};

/// Calculates the monochromatic pencil beam radiances (iyb) of a measurement
/// block.
///
/// iyb is ordered with the Stokes component fastest, then frequency, then
/// the azimuth angle and the zenith angle of the block's angular grids:
/// index `((iza * naa + iaa) * nf + iv) * stokes_dim + is`.
pub trait ForwardModel: Sync {
    /// iyb of measurement block `block` for the atmospheric `state`, with
    /// `za_offset` degrees added to the zenith angle of the line of sight.
    fn iyb(&self, block: usize, state: &AtmosphericState, za_offset: f64) -> Result<Array1<f64>, RtError>;
}

/// Sensor description: the monochromatic grids of iyb and the linear
/// response that maps iyb to the measurement vector of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSetup {
    f_grid: Vec<f64>,
    stokes_dim: usize,
    mblock_za_grid: Vec<f64>,
    mblock_aa_grid: Vec<f64>,
    sensor_response: Array2<f64>,
    response_f_grid: Vec<f64>,
    response_pol_grid: Vec<usize>,
    response_za_grid: Vec<f64>,
    sensor_time: Vec<f64>,
}

impl SensorSetup {
    /// Validate and build the sensor.
    ///
    /// `f_grid`, `mblock_za_grid` and `mblock_aa_grid` span iyb. An empty
    /// azimuth grid means a single azimuth angle. `sensor_response` maps iyb
    /// to the measurement of one block and has one row per response
    /// (za, frequency, polarization), polarization fastest. `sensor_time`
    /// holds the time of each measurement block.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        f_grid: &[f64],
        stokes_dim: usize,
        mblock_za_grid: &[f64],
        mblock_aa_grid: &[f64],
        sensor_response: Array2<f64>,
        response_f_grid: &[f64],
        response_pol_grid: &[usize],
        response_za_grid: &[f64],
        sensor_time: &[f64],
    ) -> Result<Self, RtError> {
        if !(1..=4).contains(&stokes_dim) {
            return Err(RtError::InvalidArgument(format!(
                "the Stokes dimension must be 1-4, got {stokes_dim}"
            )));
        }
        if f_grid.is_empty() || !is_increasing(f_grid) || f_grid[0] <= 0. {
            return Err(RtError::InvalidGrid(
                "the frequency grid must be positive and strictly increasing".to_string(),
            ));
        }
        if mblock_za_grid.is_empty() {
            return Err(RtError::InvalidGrid("the block zenith angle grid is empty".to_string()));
        }
        if sensor_time.is_empty() {
            return Err(RtError::InvalidArgument(
                "sensor_time must have one element per measurement block, got none".to_string(),
            ));
        }

        let niyb = f_grid.len() * mblock_za_grid.len() * mblock_aa_grid.len().max(1) * stokes_dim;
        let n1y = response_f_grid.len() * response_pol_grid.len() * response_za_grid.len();
        if sensor_response.dim() != (n1y, niyb) {
            return Err(RtError::shape("sensor_response", (n1y, niyb), sensor_response.dim()));
        }
        debug!("sensor response maps {niyb} pencil beam values to {n1y} measurements");

        Ok(Self {
            f_grid: f_grid.to_vec(),
            stokes_dim,
            mblock_za_grid: mblock_za_grid.to_vec(),
            mblock_aa_grid: mblock_aa_grid.to_vec(),
            sensor_response,
            response_f_grid: response_f_grid.to_vec(),
            response_pol_grid: response_pol_grid.to_vec(),
            response_za_grid: response_za_grid.to_vec(),
            sensor_time: sensor_time.to_vec(),
        })
    }

    /// A sensor that measures iyb as is: identity response, response grids
    /// equal to the monochromatic grids and a single azimuth angle.
    pub fn pencil_beam(
        f_grid: &[f64],
        stokes_dim: usize,
        mblock_za_grid: &[f64],
        sensor_time: &[f64],
    ) -> Result<Self, RtError> {
        let n = f_grid.len() * stokes_dim * mblock_za_grid.len();
        let pol_grid: Vec<usize> = (0..stokes_dim).collect();
        Self::new(
            f_grid,
            stokes_dim,
            mblock_za_grid,
            &[],
            Array2::eye(n),
            f_grid,
            &pol_grid,
            mblock_za_grid,
            sensor_time,
        )
    }

    /// Monochromatic frequencies of iyb
    pub fn f_grid(&self) -> &[f64] {
        &self.f_grid
    }

    /// Number of Stokes components of iyb
    pub fn stokes_dim(&self) -> usize {
        self.stokes_dim
    }

    /// Relative zenith angles of iyb
    pub fn mblock_za_grid(&self) -> &[f64] {
        &self.mblock_za_grid
    }

    /// Number of azimuth angles in iyb
    pub fn naa(&self) -> usize {
        self.mblock_aa_grid.len().max(1)
    }

    /// Length of iyb
    pub fn niyb(&self) -> usize {
        self.sensor_response.ncols()
    }

    /// Length of the measurement vector of one block
    pub fn n1y(&self) -> usize {
        self.sensor_response.nrows()
    }

    /// Number of measurement blocks
    pub fn n_blocks(&self) -> usize {
        self.sensor_time.len()
    }

    /// Frequencies of the sensor response
    pub fn response_f_grid(&self) -> &[f64] {
        &self.response_f_grid
    }

    /// Number of polarizations of the sensor response
    pub fn n_pol(&self) -> usize {
        self.response_pol_grid.len()
    }

    /// Number of viewing directions of the sensor response
    pub fn n_za(&self) -> usize {
        self.response_za_grid.len()
    }

    /// Time of each measurement block
    pub fn sensor_time(&self) -> &[f64] {
        &self.sensor_time
    }

    /// Apply the sensor response: y = H iyb.
    pub fn apply(&self, iyb: ArrayView1<'_, f64>) -> Result<Array1<f64>, RtError> {
        if iyb.len() != self.niyb() {
            return Err(RtError::shape("iyb", self.niyb(), iyb.len()));
        }
        Ok(self.sensor_response.dot(&iyb))
    }
}

/// Settings of the hydrostatic equilibrium applied after temperature
/// perturbations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hydrostatic {
    /// Pressure (Pa) at which the altitudes are kept
    pub p_hse: f64,
    /// Molar mass of dry air (kg/mol)
    pub molarmass_dry_air: f64,
    /// Gravitational acceleration at the surface of the planet (m/s²)
    pub g0: f64,
    /// Radius of the planet (m)
    pub planet_radius: f64,
}

impl Hydrostatic {
    /// Earth values for the reference pressure `p_hse`.
    pub fn earth(p_hse: f64) -> Self {
        Self {
            p_hse,
            molarmass_dry_air: 28.966e-3,
            g0: 9.80665,
            planet_radius: R_EARTH,
        }
    }
}

/// The atmospheric fields that retrieval quantities perturb.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphericState {
    grids: AtmosphericGrids,
    abs_species: Vec<Vec<SpeciesTag>>,
    t_field: Array3<f64>,
    z_field: Array3<f64>,
    vmr_field: Array4<f64>,
    hydrostatic: Option<Hydrostatic>,
}

impl AtmosphericState {
    /// Validate and build the state.
    ///
    /// `abs_species` are the tag groups of the absorption species, e.g.
    /// `["H2O", "O3-666"]`, parsed against `catalog`. Fields are dimensioned
    /// (p, lat, lon), the VMR field (species, p, lat, lon).
    pub fn new(
        catalog: &SpeciesCatalog,
        grids: AtmosphericGrids,
        abs_species: &[&str],
        t_field: Array3<f64>,
        z_field: Array3<f64>,
        vmr_field: Array4<f64>,
    ) -> Result<Self, RtError> {
        let abs_species = abs_species
            .iter()
            .map(|group| parse_tag_group(catalog, group))
            .collect::<Result<Vec<_>, _>>()?;

        let shape = grids.field_shape();
        if t_field.dim() != shape {
            return Err(RtError::shape("t_field", shape, t_field.dim()));
        }
        if z_field.dim() != shape {
            return Err(RtError::shape("z_field", shape, z_field.dim()));
        }
        let vmr_shape = (abs_species.len(), shape.0, shape.1, shape.2);
        if vmr_field.dim() != vmr_shape {
            return Err(RtError::shape("vmr_field", vmr_shape, vmr_field.dim()));
        }
        if let Some(&t) = t_field.iter().find(|&&t| t.is_nan() || t <= 0.) {
            return Err(RtError::NegativeTemperature(t));
        }
        if z_field.lanes(Axis(0)).into_iter().any(|z| !z.windows(2).into_iter().all(|w| w[1] > w[0])) {
            return Err(RtError::InvalidGrid(
                "altitudes must increase with decreasing pressure".to_string(),
            ));
        }

        Ok(Self {
            grids,
            abs_species,
            t_field,
            z_field,
            vmr_field,
            hydrostatic: None,
        })
    }

    /// Enable hydrostatic equilibrium for temperature perturbations.
    pub fn with_hydrostatic(mut self, hydrostatic: Hydrostatic) -> Result<Self, RtError> {
        let p = self.grids.p_grid();
        let (p_max, p_min) = (p[0], p[p.len() - 1]);
        if hydrostatic.p_hse > p_max || hydrostatic.p_hse < p_min {
            return Err(RtError::InvalidArgument(format!(
                "p_hse ({} Pa) must be inside the pressure grid ({p_min}-{p_max} Pa)",
                hydrostatic.p_hse
            )));
        }
        if hydrostatic.molarmass_dry_air <= 0. || hydrostatic.g0 <= 0. || hydrostatic.planet_radius <= 0. {
            return Err(RtError::InvalidArgument(
                "molar mass, gravity and planet radius must be positive".to_string(),
            ));
        }
        self.hydrostatic = Some(hydrostatic);
        Ok(self)
    }

    /// The atmospheric grids
    pub fn grids(&self) -> &AtmosphericGrids {
        &self.grids
    }

    /// Tag groups of the absorption species
    pub fn abs_species(&self) -> &[Vec<SpeciesTag>] {
        &self.abs_species
    }

    /// Temperature (K)
    pub fn t_field(&self) -> &Array3<f64> {
        &self.t_field
    }

    /// Geometric altitude (m)
    pub fn z_field(&self) -> &Array3<f64> {
        &self.z_field
    }

    /// Volume mixing ratios
    pub fn vmr_field(&self) -> &Array4<f64> {
        &self.vmr_field
    }

    pub(crate) fn t_field_mut(&mut self) -> &mut Array3<f64> {
        &mut self.t_field
    }

    pub(crate) fn vmr_field_mut(&mut self) -> &mut Array4<f64> {
        &mut self.vmr_field
    }

    /// Recalculate the altitudes from the temperatures, keeping the altitude
    /// at the reference pressure.
    ///
    /// Layer thicknesses follow the hypsometric equation with the mean layer
    /// temperature and gravity at the layer's previous mid altitude.
    pub(crate) fn apply_hydrostatic(&mut self) -> Result<(), RtError> {
        let Some(hse) = self.hydrostatic else {
            return Err(RtError::InvalidArgument(
                "hydrostatic equilibrium needs reference settings, see AtmosphericState::with_hydrostatic"
                    .to_string(),
            ));
        };
        let gas_constant = BOLTZMANN_CONST * AVOGADRO;
        let log_p: Vec<f64> = self.grids.p_grid().iter().map(|p| p.ln()).collect();
        let gp_ref = gridpos_single(&log_p, hse.p_hse.ln());

        let (_, nlat, nlon) = self.grids.field_shape();
        for lat in 0..nlat {
            for lon in 0..nlon {
                let t = self.t_field.slice(ndarray::s![.., lat, lon]);
                let mut z = self.z_field.slice_mut(ndarray::s![.., lat, lon]);
                let z_ref = gp_ref.interp(&z.to_vec());

                let mut new_z = vec![0.; z.len()];
                for k in 1..z.len() {
                    let z_mid = 0.5 * (z[k - 1] + z[k]);
                    let g = hse.g0 * (hse.planet_radius / (hse.planet_radius + z_mid)).powi(2);
                    let t_mean = 0.5 * (t[k - 1] + t[k]);
                    new_z[k] = new_z[k - 1]
                        + gas_constant * t_mean / (hse.molarmass_dry_air * g) * (log_p[k - 1] - log_p[k]);
                }
                let offset = z_ref - gp_ref.interp(&new_z);
                z.iter_mut().zip(new_z).for_each(|(z, new)| *z = new + offset);
            }
        }
        Ok(())
    }
}
