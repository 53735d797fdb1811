//! Physical constants and small radiometric helpers.
#![allow(clippy::excessive_precision)]

/// Planck constant (J s)
pub const PLANCK_CONST: f64 = 6.62606896e-34;
/// Boltzmann constant (J/K)
pub const BOLTZMANN_CONST: f64 = 1.3806504e-23;
/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 2.99792458e8;
/// Avogadro's number (1/mol)
pub const AVOGADRO: f64 = 6.02214179e23;
/// Cosmic background temperature (K)
pub const COSMIC_BG_TEMP: f64 = 2.735;
/// Mean radius of the Earth in meters
pub const R_EARTH: f64 = 6371e3;

/// Degrees to radians
pub const DEG2RAD: f64 = std::f64::consts::PI / 180.;
/// Radians to degrees
pub const RAD2DEG: f64 = 180. / std::f64::consts::PI;

/// Constant of the Doppler half width, `sqrt(2 k N_A) / c`.
///
/// Multiplied by `F0 * sqrt(T / mass)`, with the mass in g/mol, it gives the
/// Doppler width without the `sqrt(ln 2)` factor.
pub fn doppler_const() -> f64 {
    (2.0 * BOLTZMANN_CONST * AVOGADRO).sqrt() / SPEED_OF_LIGHT
}

/// Planck function, spectral radiance in W/(m² Hz sr), for frequency `f` in Hz
/// and temperature `t` in K.
pub fn planck(f: f64, t: f64) -> f64 {
    if t <= 0. {
        return 0.;
    }
    let a = 2.0 * PLANCK_CONST / SPEED_OF_LIGHT.powi(2);
    let b = PLANCK_CONST / BOLTZMANN_CONST;
    a * f.powi(3) / ((b * f / t).exp_m1())
}

/// Inverse Rayleigh-Jeans: convert a radiance (or radiance difference) to
/// brightness temperature in K.
pub fn invrayjean(i: f64, f: f64) -> f64 {
    i * SPEED_OF_LIGHT.powi(2) / (2. * f.powi(2) * BOLTZMANN_CONST)
}

/// Total number density (1/m³) from the ideal gas law, pressure in Pa and
/// temperature in K.
pub fn number_density(p: f64, t: f64) -> f64 {
    p / (BOLTZMANN_CONST * t)
}
