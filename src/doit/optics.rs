//! Single scattering properties of particle types.

use std::f64::consts::PI;
use std::fmt::Debug;

use ndarray::ArrayViewMut2;

use crate::error::RtError;

/// Optical properties of one particle type, per particle.
///
/// Particles are assumed to be randomly oriented, so extinction and
/// absorption don't depend on the direction and the phase matrix only on the
/// scattering angle.
pub trait ParticleOptics: Debug + Send + Sync {
    /// Extinction cross section in m² at frequency `f` (Hz) and temperature
    /// `t` (K).
    fn extinction(&self, f: f64, t: f64) -> f64;

    /// Absorption cross section in m².
    fn absorption(&self, f: f64, t: f64) -> f64;

    /// Phase function (m²/sr) for the cosine of the scattering angle. Its
    /// integral over all directions is the scattering cross section.
    fn phase_function(&self, f: f64, t: f64, cos_scat: f64) -> f64;

    /// Fill the phase matrix (`stokes_dim` × `stokes_dim`).
    ///
    /// The default only scatters the first Stokes component, so the particle
    /// fully depolarizes the radiation it scatters.
    fn phase_matrix(&self, f: f64, t: f64, cos_scat: f64, mut z: ArrayViewMut2<'_, f64>) {
        z.fill(0.);
        z[[0, 0]] = self.phase_function(f, t, cos_scat);
    }
}

/// Isotropic scatterer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicParticle {
    extinction: f64,
    absorption: f64,
}

impl IsotropicParticle {
    /// Cross sections in m². The absorption can't exceed the extinction.
    pub fn new(extinction: f64, absorption: f64) -> Result<Self, RtError> {
        check_cross_sections(extinction, absorption)?;
        Ok(Self {
            extinction,
            absorption,
        })
    }
}

impl ParticleOptics for IsotropicParticle {
    fn extinction(&self, _f: f64, _t: f64) -> f64 {
        self.extinction
    }

    fn absorption(&self, _f: f64, _t: f64) -> f64 {
        self.absorption
    }

    fn phase_function(&self, _f: f64, _t: f64, _cos_scat: f64) -> f64 {
        (self.extinction - self.absorption) / (4. * PI)
    }
}

/// Henyey-Greenstein phase function with asymmetry parameter `g`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HenyeyGreenstein {
    extinction: f64,
    absorption: f64,
    asymmetry: f64,
}

impl HenyeyGreenstein {
    /// Cross sections in m² and the asymmetry parameter, in (-1, 1).
    pub fn new(extinction: f64, absorption: f64, asymmetry: f64) -> Result<Self, RtError> {
        check_cross_sections(extinction, absorption)?;
        if asymmetry.is_nan() || asymmetry.abs() >= 1. {
            return Err(RtError::InvalidArgument(format!(
                "asymmetry parameter must be in (-1, 1), got {asymmetry}"
            )));
        }
        Ok(Self {
            extinction,
            absorption,
            asymmetry,
        })
    }
}

impl ParticleOptics for HenyeyGreenstein {
    fn extinction(&self, _f: f64, _t: f64) -> f64 {
        self.extinction
    }

    fn absorption(&self, _f: f64, _t: f64) -> f64 {
        self.absorption
    }

    fn phase_function(&self, _f: f64, _t: f64, cos_scat: f64) -> f64 {
        let g = self.asymmetry;
        let g2 = g * g;
        (self.extinction - self.absorption) / (4. * PI) * (1. - g2)
            / (1. + g2 - 2. * g * cos_scat).powf(1.5)
    }
}

fn check_cross_sections(extinction: f64, absorption: f64) -> Result<(), RtError> {
    if extinction.is_nan() || absorption.is_nan() || absorption < 0. || absorption > extinction {
        return Err(RtError::InvalidArgument(format!(
            "cross sections must satisfy 0 <= absorption <= extinction, got {absorption} and {extinction}"
        )));
    }
    Ok(())
}

/// Cosine of the scattering angle between an incoming and a scattered
/// direction, all angles in degrees.
pub fn cos_scattering_angle(za_inc: f64, aa_inc: f64, za_sca: f64, aa_sca: f64) -> f64 {
    let (za_i, za_s) = (za_inc.to_radians(), za_sca.to_radians());
    let cos = za_s.cos() * za_i.cos() + za_s.sin() * za_i.sin() * (aa_sca - aa_inc).to_radians().cos();
    cos.clamp(-1., 1.)
}
