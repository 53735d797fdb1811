//! Discrete ordinate iterative (DOIT) scattering solver.
//!
//! The radiation field inside the cloudbox is found by a fixed-point
//! iteration. Each iteration computes the scattering integral from the current
//! field, sweeps the radiative transfer equation through the cloudbox with the
//! scattered radiation as an extra source, and compares the new field with the
//! old one.
//!
//! Fields are dimensioned (p, lat, lon, za, aa, stokes) over the cloudbox. A
//! 1D field has a single latitude, longitude and azimuth angle.

pub mod convergence;
pub mod grids;
pub mod optics;
pub mod scattering;
pub mod sweep;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use ndarray::{s, Array3, Array4, Array6, ArrayView3, ArrayView4, ArrayViewMut6, Axis};
use rayon::prelude::*;
use smallvec::SmallVec;

pub use self::convergence::{ConvergenceTest, NonConvergencePolicy};
pub use self::grids::{doit_angular_grids_set, doit_za_interp_set, AngularGrids, CloudboxLimits, ZaInterpolation};
pub use self::optics::{HenyeyGreenstein, IsotropicParticle, ParticleOptics};
use self::scattering::{scat_field_1d, scat_field_3d, scat_field_limb_1d, ParticleField};
use self::sweep::{sweep_1d, sweep_3d, ColumnOptics};
use crate::error::RtError;
use crate::interp::is_decreasing;
use crate::parallel;
use crate::physics::{planck, R_EARTH};
use crate::xsec::absorption::GasAbsorption;

/// How often `solve_all` reports progress and looks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where the scattering integral is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScatteringIntegralMethod {
    /// Directly on the zenith grid of the radiation field
    #[default]
    Standard,
    /// On an equidistant zenith grid of [`AngularGrids::za_grid_size`] points,
    /// for optimized zenith grids. 1D only.
    Limb,
}

/// Settings of the iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct DoitSettings {
    /// Convergence limit per Stokes component, in the units of the
    /// convergence test
    pub epsilon: SmallVec<[f64; 4]>,
    /// How successive fields are compared
    pub convergence: ConvergenceTest,
    /// Number of tested iterations. One more iteration runs untested
    /// before `non_convergence` applies
    pub max_iterations: usize,
    /// What happens when the field did not converge
    pub non_convergence: NonConvergencePolicy,
    /// Zenith angle interpolation of the sweeps and the limb scattering
    /// integral
    pub za_interp: ZaInterpolation,
    /// Evaluation of the scattering integral
    pub scat_integral: ScatteringIntegralMethod,
    /// Radius (m) of the surface the altitudes refer to
    pub planet_radius: f64,
}

impl DoitSettings {
    /// Settings with linear zenith angle interpolation, the standard
    /// scattering integral and the Earth radius.
    ///
    /// `epsilon` has one limit per Stokes component.
    pub fn new(
        epsilon: &[f64],
        convergence: ConvergenceTest,
        max_iterations: usize,
        non_convergence: NonConvergencePolicy,
    ) -> Result<Self, RtError> {
        let settings = Self {
            epsilon: SmallVec::from_slice(epsilon),
            convergence,
            max_iterations,
            non_convergence,
            za_interp: ZaInterpolation::Linear,
            scat_integral: ScatteringIntegralMethod::Standard,
            planet_radius: R_EARTH,
        };
        settings.check(epsilon.len(), 1)?;
        Ok(settings)
    }

    /// Check the settings against the Stokes and atmosphere dimensions.
    pub fn check(&self, stokes_dim: usize, atmosphere_dim: usize) -> Result<(), RtError> {
        if self.epsilon.len() != stokes_dim || !(1..=4).contains(&stokes_dim) {
            return Err(RtError::InconsistentInputs(format!(
                "epsilon needs one limit per Stokes component ({stokes_dim}), got {}",
                self.epsilon.len()
            )));
        }
        if let Some(eps) = self.epsilon.iter().find(|e| e.is_nan() || **e < 0.) {
            return Err(RtError::InvalidArgument(format!(
                "convergence limits must be non-negative, got {eps}"
            )));
        }
        if self.max_iterations == 0 {
            return Err(RtError::InvalidArgument("max_iterations must be at least 1".into()));
        }
        if self.planet_radius.is_nan() || self.planet_radius <= 0. {
            return Err(RtError::InvalidArgument(format!(
                "planet radius must be positive, got {}",
                self.planet_radius
            )));
        }
        if atmosphere_dim != 1 {
            if self.za_interp == ZaInterpolation::Polynomial {
                return Err(RtError::InvalidArgument(
                    "polynomial zenith angle interpolation is only implemented for 1D".into(),
                ));
            }
            if self.scat_integral == ScatteringIntegralMethod::Limb {
                return Err(RtError::InvalidArgument(
                    "the limb scattering integral is only implemented for 1D".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Shape (p, lat, lon, za, aa, stokes) of the fields of a cloudbox.
fn field_shape(
    limits: &CloudboxLimits,
    grids: &AngularGrids,
    stokes_dim: usize,
) -> (usize, usize, usize, usize, usize, usize) {
    let (np, nlat, nlon) = limits.shape();
    let naa = if limits.atmosphere_dim() == 1 {
        1
    } else {
        grids.aa_grid.len()
    };
    (np, nlat, nlon, grids.za_grid.len(), naa, stokes_dim)
}

/// The radiation field and the scattered field of a cloudbox.
#[derive(Debug, Clone, PartialEq)]
pub struct DoitFields {
    /// Radiance (W/(m² Hz sr))
    pub i_field: Array6<f64>,
    /// Scattering integral (W/(m³ Hz sr))
    pub scat_field: Array6<f64>,
}

/// Check the solver setup and allocate zero-filled fields.
pub fn doit_init(
    stokes_dim: usize,
    limits: &CloudboxLimits,
    grids: &AngularGrids,
    n_particle_types: usize,
) -> Result<DoitFields, RtError> {
    if !(1..=4).contains(&stokes_dim) {
        return Err(RtError::InvalidArgument(format!(
            "stokes_dim must be 1 to 4, got {stokes_dim}"
        )));
    }
    grids.check()?;
    if n_particle_types == 0 {
        return Err(RtError::InvalidArgument(
            "the scattering solver needs at least one particle type".into(),
        ));
    }

    let shape = field_shape(limits, grids, stokes_dim);
    debug!("allocating DOIT fields of shape {shape:?}");
    Ok(DoitFields {
        i_field: Array6::zeros(shape),
        scat_field: Array6::zeros(shape),
    })
}

/// Atmospheric fields inside the cloudbox.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudboxAtmosphere {
    p: Vec<f64>,
    z: Array3<f64>,
    t: Array3<f64>,
    vmr: Array4<f64>,
    pnd: Array4<f64>,
}

impl CloudboxAtmosphere {
    /// Cut the cloudbox out of the atmospheric fields.
    ///
    /// `p_grid` is the decreasing pressure grid (Pa) of the atmosphere. The
    /// altitudes (m) and temperatures (K) are dimensioned (p, lat, lon) and
    /// the VMRs (species, p, lat, lon), over the whole atmosphere. The
    /// particle number densities (1/m³), dimensioned (type, p, lat, lon),
    /// only cover the cloudbox.
    pub fn new(
        limits: &CloudboxLimits,
        p_grid: &[f64],
        z_field: ArrayView3<'_, f64>,
        t_field: ArrayView3<'_, f64>,
        vmr_field: ArrayView4<'_, f64>,
        pnd_field: Array4<f64>,
    ) -> Result<Self, RtError> {
        if !is_decreasing(p_grid) {
            return Err(RtError::InvalidGrid("the pressure grid must be strictly decreasing".into()));
        }
        let (_, nlat, nlon) = z_field.dim();
        let atmosphere = (p_grid.len(), nlat, nlon);
        if z_field.dim() != atmosphere {
            return Err(RtError::shape("z_field", atmosphere, z_field.dim()));
        }
        if t_field.dim() != atmosphere {
            return Err(RtError::shape("t_field", atmosphere, t_field.dim()));
        }
        let nspecies = vmr_field.len_of(Axis(0));
        if vmr_field.dim() != (nspecies, p_grid.len(), nlat, nlon) {
            return Err(RtError::shape("vmr_field", (nspecies, p_grid.len(), nlat, nlon), vmr_field.dim()));
        }

        let (p_lo, p_hi) = limits.pressure();
        let (lat_lo, lat_hi) = limits.latitude();
        let (lon_lo, lon_hi) = limits.longitude();
        if p_hi >= p_grid.len() || lat_hi >= nlat || lon_hi >= nlon {
            return Err(RtError::InconsistentInputs(format!(
                "cloudbox limits {:?} exceed the atmospheric grids {atmosphere:?}",
                limits.as_slice()
            )));
        }

        let (np, nlat_box, nlon_box) = limits.shape();
        let ntypes = pnd_field.len_of(Axis(0));
        if pnd_field.dim() != (ntypes, np, nlat_box, nlon_box) {
            return Err(RtError::shape("pnd_field", (ntypes, np, nlat_box, nlon_box), pnd_field.dim()));
        }
        if let Some(x) = pnd_field.iter().find(|x| x.is_nan() || **x < 0.) {
            return Err(RtError::InvalidArgument(format!(
                "particle number densities must be non-negative, got {x}"
            )));
        }

        let inside = s![p_lo..=p_hi, lat_lo..=lat_hi, lon_lo..=lon_hi];
        let t = t_field.slice(inside).to_owned();
        if let Some(&x) = t.iter().find(|x| **x < 0.) {
            return Err(RtError::NegativeTemperature(x));
        }
        Ok(Self {
            p: p_grid[p_lo..=p_hi].to_vec(),
            z: z_field.slice(inside).to_owned(),
            t,
            vmr: vmr_field.slice(s![.., p_lo..=p_hi, lat_lo..=lat_hi, lon_lo..=lon_hi]).to_owned(),
            pnd: pnd_field,
        })
    }

    /// Number of particle types.
    pub fn n_particle_types(&self) -> usize {
        self.pnd.len_of(Axis(0))
    }
}

/// Radiation entering the cloudbox, dimensioned (f, lat, lon, za, aa, stokes)
/// like the fields of the cloudbox.
///
/// Only the downwelling directions (za ≤ 90°) of the top and the upwelling
/// directions of the bottom are used.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingField {
    top: Array6<f64>,
    bottom: Array6<f64>,
}

impl IncomingField {
    /// Radiation at the top and the bottom of the cloudbox.
    pub fn new(top: Array6<f64>, bottom: Array6<f64>) -> Result<Self, RtError> {
        if top.dim() != bottom.dim() {
            return Err(RtError::shape("bottom incoming field", top.dim(), bottom.dim()));
        }
        Ok(Self { top, bottom })
    }

    /// Unpolarized blackbody radiation at the temperatures `t_top` and
    /// `t_bottom` (K).
    pub fn blackbody(
        f_grid: &[f64],
        limits: &CloudboxLimits,
        grids: &AngularGrids,
        stokes_dim: usize,
        t_top: f64,
        t_bottom: f64,
    ) -> Result<Self, RtError> {
        if t_top < 0. || t_bottom < 0. {
            return Err(RtError::NegativeTemperature(t_top.min(t_bottom)));
        }
        let (_, nlat, nlon, nza, naa, _) = field_shape(limits, grids, stokes_dim);
        let shape = (f_grid.len(), nlat, nlon, nza, naa, stokes_dim);
        let fill = |t: f64| {
            Array6::from_shape_fn(shape, |(f, _, _, _, _, s)| if s == 0 { planck(f_grid[f], t) } else { 0. })
        };
        Self::new(fill(t_top), fill(t_bottom))
    }
}

/// Converged radiation field of one frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct DoitFieldResult {
    /// Radiation field
    pub i_field: Array6<f64>,
    /// Scattered field of the last iteration
    pub scat_field: Array6<f64>,
    /// Number of iterations
    pub iterations: usize,
    /// False if the iteration limit was hit and the policy let the solver
    /// continue
    pub converged: bool,
}

/// Scattering solver for a cloudbox.
#[derive(Debug)]
pub struct DoitSolver<'a> {
    settings: DoitSettings,
    grids: AngularGrids,
    limits: CloudboxLimits,
    stokes_dim: usize,
    f_grid: Vec<f64>,
    atmosphere: CloudboxAtmosphere,
    particles: Vec<Box<dyn ParticleOptics>>,
    gas: &'a dyn GasAbsorption,
    incoming: IncomingField,
}

impl<'a> DoitSolver<'a> {
    /// Check all inputs against each other.
    ///
    /// `particles` has one entry per particle type of the number density
    /// field, `gas` provides the absorption coefficients of the VMR field and
    /// `incoming` one boundary field per frequency of `f_grid`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: DoitSettings,
        grids: AngularGrids,
        limits: CloudboxLimits,
        stokes_dim: usize,
        f_grid: &[f64],
        atmosphere: CloudboxAtmosphere,
        particles: Vec<Box<dyn ParticleOptics>>,
        gas: &'a dyn GasAbsorption,
        incoming: IncomingField,
    ) -> Result<Self, RtError> {
        settings.check(stokes_dim, limits.atmosphere_dim())?;
        grids.check()?;
        if let Some(f) = f_grid.iter().find(|f| f.is_nan() || **f <= 0.) {
            return Err(RtError::InvalidArgument(format!("frequencies must be positive, got {f}")));
        }
        if particles.len() != atmosphere.n_particle_types() {
            return Err(RtError::InconsistentInputs(format!(
                "{} particle types, but the number density field has {}",
                particles.len(),
                atmosphere.n_particle_types()
            )));
        }
        if atmosphere.t.dim() != limits.shape() {
            return Err(RtError::shape("cloudbox atmosphere", limits.shape(), atmosphere.t.dim()));
        }
        let (_, nlat, nlon, nza, naa, _) = field_shape(&limits, &grids, stokes_dim);
        let expected = (f_grid.len(), nlat, nlon, nza, naa, stokes_dim);
        if incoming.top.dim() != expected {
            return Err(RtError::shape("incoming field", expected, incoming.top.dim()));
        }

        Ok(Self {
            settings,
            grids,
            limits,
            stokes_dim,
            f_grid: f_grid.to_vec(),
            atmosphere,
            particles,
            gas,
            incoming,
        })
    }

    /// The frequencies (Hz).
    pub fn f_grid(&self) -> &[f64] {
        &self.f_grid
    }

    /// Extinction and absorption of every cloudbox column, latitude major.
    fn column_optics(&self, f: f64) -> Result<Vec<ColumnOptics>, RtError> {
        let atm = &self.atmosphere;
        let (_, nlat, nlon) = atm.t.dim();
        let mut columns = Vec::with_capacity(nlat * nlon);
        for lat in 0..nlat {
            for lon in 0..nlon {
                let t = atm.t.slice(s![.., lat, lon]).to_vec();
                let vmrs = atm.vmr.slice(s![.., .., lat, lon]);
                let gas = self.gas.absorption_coefficients(&[f], &atm.p, &t, vmrs)?;

                let mut ext = gas.row(0).to_vec();
                let mut abs = ext.clone();
                for (particle, pnd) in self.particles.iter().zip(atm.pnd.outer_iter()) {
                    for (k, &t_k) in t.iter().enumerate() {
                        let n = pnd[[k, lat, lon]];
                        ext[k] += n * particle.extinction(f, t_k);
                        abs[k] += n * particle.absorption(f, t_k);
                    }
                }

                let z = atm.z.slice(s![.., lat, lon]).to_vec();
                columns.push(ColumnOptics::new(&z, self.settings.planet_radius, t, ext, abs)?);
            }
        }
        Ok(columns)
    }

    fn set_boundaries(&self, mut i_field: ArrayViewMut6<'_, f64>, f_index: usize) {
        let top = i_field.len_of(Axis(0)) - 1;
        let incoming_top = self.incoming.top.index_axis(Axis(0), f_index);
        let incoming_bottom = self.incoming.bottom.index_axis(Axis(0), f_index);
        for (iza, &za) in self.grids.za_grid.iter().enumerate() {
            if za <= 90. {
                i_field
                    .slice_mut(s![top, .., .., iza, .., ..])
                    .assign(&incoming_top.slice(s![.., .., iza, .., ..]));
            } else {
                i_field
                    .slice_mut(s![0, .., .., iza, .., ..])
                    .assign(&incoming_bottom.slice(s![.., .., iza, .., ..]));
            }
        }
    }

    fn scattering_integral(&self, fields: &mut DoitFields, f: f64) -> Result<(), RtError> {
        let particles = ParticleField {
            particles: &self.particles,
            pnd: self.atmosphere.pnd.view(),
            t: self.atmosphere.t.view(),
        };
        let i_field = fields.i_field.view();
        let scat_field = fields.scat_field.view_mut();
        match (self.limits.atmosphere_dim(), self.settings.scat_integral) {
            (1, ScatteringIntegralMethod::Standard) => {
                scat_field_1d(scat_field, i_field, &particles, &self.grids, f)
            }
            (1, ScatteringIntegralMethod::Limb) => scat_field_limb_1d(
                scat_field,
                i_field,
                &particles,
                &self.grids,
                self.settings.za_interp,
                f,
            ),
            _ => scat_field_3d(scat_field, i_field, &particles, &self.grids, f),
        }
    }

    fn sweep(&self, fields: &mut DoitFields, optics: &[ColumnOptics], f: f64) -> Result<(), RtError> {
        let za_grid = &self.grids.za_grid;
        let za_interp = self.settings.za_interp;
        if self.limits.atmosphere_dim() == 1 {
            sweep_1d(
                fields.i_field.view_mut(),
                fields.scat_field.view(),
                &optics[0],
                za_grid,
                za_interp,
                f,
            )
        } else {
            sweep_3d(
                fields.i_field.view_mut(),
                fields.scat_field.view(),
                optics,
                za_grid,
                za_interp,
                f,
            )
        }
    }

    /// Iterate the radiation field of frequency `f_grid[f_index]` to
    /// convergence.
    ///
    /// The iteration stops early with [`RtError::Cancelled`] once `cancel`
    /// is set.
    pub fn solve_frequency(
        &self,
        f_index: usize,
        cancel: Option<&AtomicBool>,
    ) -> Result<DoitFieldResult, RtError> {
        let f = *self.f_grid.get(f_index).ok_or_else(|| {
            RtError::InvalidArgument(format!(
                "frequency index {f_index} out of range for {} frequencies",
                self.f_grid.len()
            ))
        })?;
        let settings = &self.settings;
        let is_cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));

        let optics = self.column_optics(f)?;
        let mut fields = doit_init(self.stokes_dim, &self.limits, &self.grids, self.particles.len())?;
        self.set_boundaries(fields.i_field.view_mut(), f_index);

        // Clear-sky field as first guess
        for pass in 1..=settings.max_iterations {
            let old = fields.i_field.clone();
            self.sweep(&mut fields, &optics, f)?;
            if settings
                .convergence
                .is_converged(fields.i_field.view(), old.view(), &settings.epsilon, f)?
            {
                debug!("clear-sky field at {f} Hz after {pass} sweeps");
                break;
            }
        }

        let mut iterations = 0;
        loop {
            if is_cancelled() {
                return Err(RtError::Cancelled);
            }
            let old = fields.i_field.clone();
            self.scattering_integral(&mut fields, f)?;
            self.sweep(&mut fields, &optics, f)?;
            iterations += 1;

            // The pass beyond the limit is kept but not tested
            if iterations > settings.max_iterations {
                match settings.non_convergence {
                    NonConvergencePolicy::Abort => return Err(RtError::NonConvergence(iterations)),
                    NonConvergencePolicy::FillNan => {
                        warn!("DOIT at {f} Hz did not converge after {iterations} iterations, the field is set to NaN");
                        fields.i_field.fill(f64::NAN);
                    }
                    NonConvergencePolicy::KeepCurrent => {
                        warn!("DOIT at {f} Hz did not converge after {iterations} iterations, keeping the last field");
                    }
                }
                return Ok(DoitFieldResult {
                    i_field: fields.i_field,
                    scat_field: fields.scat_field,
                    iterations,
                    converged: false,
                });
            }

            if settings
                .convergence
                .is_converged(fields.i_field.view(), old.view(), &settings.epsilon, f)?
            {
                debug!("DOIT at {f} Hz converged after {iterations} iterations");
                return Ok(DoitFieldResult {
                    i_field: fields.i_field,
                    scat_field: fields.scat_field,
                    iterations,
                    converged: true,
                });
            }
        }
    }

    /// Solve all frequencies.
    ///
    /// The frequencies are spread over a thread pool of `num_threads` threads
    /// (`None` chooses automatically). If there are fewer frequencies than
    /// threads, the loops inside each frequency are parallelized instead.
    /// Setting `cancel` stops all frequencies that are still iterating.
    pub fn solve_all(
        &self,
        num_threads: Option<usize>,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<DoitFieldResult>, RtError> {
        let num_freqs = self.f_grid.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.unwrap_or(0))
            .build()
            .map_err(|e| RtError::InvalidArgument(e.to_string()))?;
        let frequency_parallel = num_freqs >= pool.current_num_threads();

        let num_completed = AtomicUsize::new(0);
        let never = AtomicBool::new(false);
        let cancel = cancel.unwrap_or(&never);
        let mut results = Vec::new();

        info!("Solving DOIT for {num_freqs} frequencies");

        pool.in_place_scope(|s| {
            s.spawn(|_| {
                (0..num_freqs)
                    .into_par_iter()
                    .map(|f_index| {
                        if frequency_parallel {
                            parallel::region(|| self.solve_frequency(f_index, Some(cancel)))
                        } else {
                            self.solve_frequency(f_index, Some(cancel))
                        }
                    })
                    .inspect(|_| {
                        num_completed.fetch_add(1, Ordering::Relaxed);
                    })
                    .collect_into_vec(&mut results);
            });

            let mut reported = 0;
            loop {
                let completed = num_completed.load(Ordering::Relaxed);
                if completed != reported {
                    let progress = completed as f32 / num_freqs as f32 * 100.;
                    info!("Completed DOIT for {completed}/{num_freqs} frequencies ({progress:0.2}%)");
                    reported = completed;
                }
                if completed == num_freqs || cancel.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });

        results.into_iter().collect()
    }
}
