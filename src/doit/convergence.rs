//! Convergence tests of the iterative solver.

use ndarray::{ArrayView6, Axis};

use crate::error::RtError;
use crate::physics::invrayjean;

/// How two successive radiation fields are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceTest {
    /// Absolute radiance difference of every element, per Stokes component
    Abs,
    /// As [`ConvergenceTest::Abs`], with the differences converted to
    /// Rayleigh-Jeans brightness temperature
    AbsBt,
    /// Root of the summed squared differences divided by the number of
    /// points, per Stokes component, as Rayleigh-Jeans brightness temperature
    Lsq,
}

/// What happens when the iteration limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonConvergencePolicy {
    /// Fail with [`RtError::NonConvergence`]
    Abort,
    /// Set the whole field to NaN and stop
    FillNan,
    /// Keep the field of the last iteration and stop
    KeepCurrent,
}

impl ConvergenceTest {
    /// Compare `field` with `old`, both dimensioned (p, lat, lon, za, aa,
    /// stokes), against one threshold per Stokes component. `f` is the
    /// frequency in Hz, used by the brightness temperature tests.
    ///
    /// The result only depends on the arguments.
    pub fn is_converged(
        &self,
        field: ArrayView6<'_, f64>,
        old: ArrayView6<'_, f64>,
        epsilon: &[f64],
        f: f64,
    ) -> Result<bool, RtError> {
        let stokes_dim = field.len_of(Axis(5));
        if epsilon.len() != stokes_dim {
            return Err(RtError::InconsistentInputs(format!(
                "epsilon needs one limit per Stokes component ({stokes_dim}), got {}",
                epsilon.len()
            )));
        }
        if field.dim() != old.dim() {
            return Err(RtError::shape("old radiation field", field.dim(), old.dim()));
        }
        if (f.is_nan() || f <= 0.) && *self != ConvergenceTest::Abs {
            return Err(RtError::InvalidArgument(format!("frequency must be positive, got {f}")));
        }

        let converged = match self {
            ConvergenceTest::Abs => field
                .lanes(Axis(5))
                .into_iter()
                .zip(old.lanes(Axis(5)))
                .all(|(new, old)| {
                    new.iter()
                        .zip(old.iter())
                        .zip(epsilon)
                        .all(|((a, b), eps)| (a - b).abs() <= *eps)
                }),
            ConvergenceTest::AbsBt => field
                .lanes(Axis(5))
                .into_iter()
                .zip(old.lanes(Axis(5)))
                .all(|(new, old)| {
                    new.iter()
                        .zip(old.iter())
                        .zip(epsilon)
                        .all(|((a, b), eps)| invrayjean(a - b, f).abs() <= *eps)
                }),
            ConvergenceTest::Lsq => {
                let npoints = (field.len() / stokes_dim) as f64;
                (0..stokes_dim).all(|s| {
                    let new = field.index_axis(Axis(5), s);
                    let old = old.index_axis(Axis(5), s);
                    let sum_sq: f64 = new.iter().zip(old.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                    invrayjean(sum_sq.sqrt() / npoints, f) < epsilon[s]
                })
            }
        };
        Ok(converged)
    }
}
