//! Lineshape and normalization functions.
//!
//! Both are closed sets selected by index or name. All functions are pure: they
//! fill caller-provided buffers over a frequency grid and hold no state.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;

use crate::error::RtError;
use crate::physics::{BOLTZMANN_CONST, PLANCK_CONST};

/// `1 / sqrt(pi)`
const FRAC_1_SQRT_PI: f64 = 0.564_189_583_547_756_3;

/// A lineshape function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    /// Zero everywhere. Used for continua and testing
    NoShape,
    /// Pressure broadening only
    Lorentz,
    /// Doppler broadening only
    Doppler,
    /// Convolution of Lorentz and Doppler, attenuation only
    Voigt,
    /// Complex Faddeeva function, giving both attenuation and phase
    Faddeeva,
}

impl LineShape {
    /// All lineshapes, in index order.
    pub const ALL: [LineShape; 5] = [
        LineShape::NoShape,
        LineShape::Lorentz,
        LineShape::Doppler,
        LineShape::Voigt,
        LineShape::Faddeeva,
    ];

    /// Select by index into [`LineShape::ALL`].
    pub fn from_index(index: usize) -> Result<Self, RtError> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            RtError::InvalidArgument(format!(
                "lineshape index {index} out of range, there are {}",
                Self::ALL.len()
            ))
        })
    }

    /// Name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            LineShape::NoShape => "no_shape",
            LineShape::Lorentz => "Lorentz",
            LineShape::Doppler => "Doppler",
            LineShape::Voigt => "Voigt",
            LineShape::Faddeeva => "Faddeeva",
        }
    }

    /// True if [`LineShape::evaluate`] fills the phase buffer. Otherwise the
    /// phase buffer is left untouched and must not be read.
    pub fn has_phase(&self) -> bool {
        matches!(self, LineShape::Faddeeva)
    }

    /// Evaluate the lineshape on `f_grid` (Hz).
    ///
    /// `gamma` is the pressure broadened half width and `sigma` the Doppler
    /// width, both in Hz. Results are in 1/Hz. `attenuation` and `phase` must
    /// have the length of `f_grid`.
    pub fn evaluate(
        &self,
        attenuation: &mut [f64],
        phase: &mut [f64],
        f0: f64,
        gamma: f64,
        sigma: f64,
        f_grid: &[f64],
    ) {
        debug_assert_eq!(attenuation.len(), f_grid.len());
        match self {
            LineShape::NoShape => attenuation.fill(0.),
            LineShape::Lorentz => {
                let fac = gamma / std::f64::consts::PI;
                let gamma2 = gamma * gamma;
                for (ls, &f) in attenuation.iter_mut().zip(f_grid) {
                    let df = f - f0;
                    *ls = fac / (df * df + gamma2);
                }
            }
            LineShape::Doppler => {
                let fac = FRAC_1_SQRT_PI / sigma;
                for (ls, &f) in attenuation.iter_mut().zip(f_grid) {
                    let x = (f - f0) / sigma;
                    *ls = fac * (-x * x).exp();
                }
            }
            LineShape::Voigt => {
                if sigma <= 0. {
                    return LineShape::Lorentz.evaluate(attenuation, phase, f0, gamma, sigma, f_grid);
                }
                let fac = FRAC_1_SQRT_PI / sigma;
                let y = gamma / sigma;
                for (ls, &f) in attenuation.iter_mut().zip(f_grid) {
                    *ls = fac * humlicek_w4((f - f0) / sigma, y).re;
                }
            }
            LineShape::Faddeeva => {
                debug_assert_eq!(phase.len(), f_grid.len());
                let fac = FRAC_1_SQRT_PI / sigma;
                let y = gamma / sigma;
                for ((ls, ph), &f) in attenuation.iter_mut().zip(phase.iter_mut()).zip(f_grid) {
                    let w = humlicek_w4((f - f0) / sigma, y);
                    *ls = fac * w.re;
                    *ph = fac * w.im;
                }
            }
        }
    }
}

impl FromStr for LineShape {
    type Err = RtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ls| ls.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| RtError::InvalidArgument(format!("unknown lineshape \"{s}\"")))
    }
}

impl fmt::Display for LineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The Faddeeva function `w(x + iy)` for `y >= 0`, using the four region
/// rational approximation of Humlicek (1982).
pub fn humlicek_w4(x: f64, y: f64) -> Complex64 {
    let t = Complex64::new(y, -x);
    let s = x.abs() + y;

    if s >= 15. {
        t * 0.5641896 / (0.5 + t * t)
    } else if s >= 5.5 {
        let u = t * t;
        t * (1.410474 + u * 0.5641896) / (0.75 + u * (3. + u))
    } else if y >= 0.195 * x.abs() - 0.176 {
        (16.4955 + t * (20.20933 + t * (11.96482 + t * (3.778987 + t * 0.5642236))))
            / (16.4955 + t * (38.82363 + t * (39.27121 + t * (21.69274 + t * (6.699398 + t)))))
    } else {
        let u = t * t;
        let num = t
            * (36183.31 - u * (3321.9905 - u * (1540.787 - u * (219.0313 - u * (35.76683 - u * (1.320522 - u * 0.56419))))));
        let den = 32066.6
            - u * (24322.84 - u * (9022.228 - u * (2186.181 - u * (364.2191 - u * (61.57037 - u * (1.841439 - u))))));
        u.exp() - num / den
    }
}

/// A lineshape normalization factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// No normalization, factor 1
    None,
    /// `f / f0`
    Linear,
    /// `(f / f0)²`. Also selects the microwave approximation of the line
    /// intensity in the cross section code.
    Quadratic,
    /// Van Vleck-Huber: `f tanh(hf/2kT) / (f0 tanh(hf0/2kT))`
    Vvh,
}

impl Normalization {
    /// All normalizations, in index order.
    pub const ALL: [Normalization; 4] = [
        Normalization::None,
        Normalization::Linear,
        Normalization::Quadratic,
        Normalization::Vvh,
    ];

    /// Select by index into [`Normalization::ALL`].
    pub fn from_index(index: usize) -> Result<Self, RtError> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            RtError::InvalidArgument(format!(
                "normalization index {index} out of range, there are {}",
                Self::ALL.len()
            ))
        })
    }

    /// Name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Normalization::None => "no_norm",
            Normalization::Linear => "linear",
            Normalization::Quadratic => "quadratic",
            Normalization::Vvh => "VVH",
        }
    }

    /// Fill `factors` with the normalization over `f_grid` for a line at `f0`
    /// and temperature `t`.
    pub fn evaluate(&self, factors: &mut [f64], f0: f64, f_grid: &[f64], t: f64) {
        debug_assert_eq!(factors.len(), f_grid.len());
        match self {
            Normalization::None => factors.fill(1.),
            Normalization::Linear => {
                for (fac, &f) in factors.iter_mut().zip(f_grid) {
                    *fac = f / f0;
                }
            }
            Normalization::Quadratic => {
                let f0_2 = f0 * f0;
                for (fac, &f) in factors.iter_mut().zip(f_grid) {
                    *fac = f * f / f0_2;
                }
            }
            Normalization::Vvh => {
                let mafac = PLANCK_CONST / (2. * BOLTZMANN_CONST * t);
                let denom = f0 * (mafac * f0).tanh();
                for (fac, &f) in factors.iter_mut().zip(f_grid) {
                    *fac = f * (mafac * f).tanh() / denom;
                }
            }
        }
    }
}

impl FromStr for Normalization {
    type Err = RtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| RtError::InvalidArgument(format!("unknown normalization \"{s}\"")))
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
