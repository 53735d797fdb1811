//! Support for analytically calculated Jacobians.
//!
//! Analytical Jacobians are calculated along the propagation path by the
//! radiative transfer code. These helpers tell that code what to calculate
//! and map the path derivatives onto the retrieval grids.

use ndarray::{ArrayView3, ArrayViewMut3, Axis, Zip};

use super::{QuantityKind, RetrievalQuantity, WindComponent};
use crate::error::RtError;
use crate::interp::{clamp_extrapolation, gridpos, p2gridpos, GridPos};
use crate::species::SpeciesTag;

/// What an analytical retrieval quantity refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticalPointer {
    /// Index of the quantity in the retrieval quantity list
    pub quantity: usize,
    /// The quantity is the temperature
    pub is_t: bool,
    /// Index of the absorption species tag group, for species quantities
    pub abs_species_i: Option<usize>,
    /// Wind component, for wind quantities
    pub wind_i: Option<WindComponent>,
}

/// Pointers for every analytical quantity, in registration order.
///
/// Fails if a species quantity is not one of `abs_species`.
pub fn analytical_pointers(
    quantities: &[RetrievalQuantity],
    abs_species: &[Vec<SpeciesTag>],
) -> Result<Vec<AnalyticalPointer>, RtError> {
    quantities
        .iter()
        .enumerate()
        .filter(|(_, q)| q.is_analytical())
        .map(|(quantity, q)| {
            let abs_species_i = match q.kind() {
                QuantityKind::AbsSpecies { tags, .. } => Some(
                    abs_species
                        .iter()
                        .position(|group| group == tags)
                        .ok_or_else(|| RtError::UnknownSpecies(format!("{} is not in abs_species", q.subtag())))?,
                ),
                _ => None,
            };
            let wind_i = match q.kind() {
                QuantityKind::Wind(component) => Some(*component),
                _ => None,
            };
            Ok(AnalyticalPointer {
                quantity,
                is_t: matches!(q.kind(), QuantityKind::Temperature { .. }),
                abs_species_i,
                wind_i,
            })
        })
        .collect()
}

/// Grid positions of path points on a retrieval grid. Points outside the grid
/// get the value of the closest end point.
fn retrieval_gridpos(grid: &[f64], points: &[f64], is_pressure: bool) -> Vec<GridPos> {
    if grid.len() < 2 {
        return vec![GridPos::single(); points.len()];
    }
    let mut gp = if is_pressure {
        p2gridpos(grid, points)
    } else {
        gridpos(grid, points)
    };
    clamp_extrapolation(&mut gp);
    gp
}

/// Map derivatives along a propagation path onto the retrieval grids of a
/// quantity, adding to `diy_dx`.
///
/// `diy_dpath` is dimensioned (path point, frequency, Stokes) and `diy_dx`
/// (retrieval grid point, frequency, Stokes), with the retrieval grid points
/// ordered pressure fastest, then latitude, then longitude. `path_lat` and
/// `path_lon` are only used in 2D and 3D.
pub fn diy_from_path_to_rgrids(
    mut diy_dx: ArrayViewMut3<'_, f64>,
    quantity: &RetrievalQuantity,
    diy_dpath: ArrayView3<'_, f64>,
    atmosphere_dim: usize,
    path_p: &[f64],
    path_lat: &[f64],
    path_lon: &[f64],
) -> Result<(), RtError> {
    let np = path_p.len();
    let grids = quantity.grids();
    if grids.len() != atmosphere_dim || !(1..=3).contains(&atmosphere_dim) {
        return Err(RtError::InconsistentInputs(format!(
            "{} has {} retrieval grids, the atmosphere is {atmosphere_dim}D",
            quantity.subtag(),
            grids.len()
        )));
    }
    if diy_dpath.len_of(Axis(0)) != np {
        return Err(RtError::shape("path derivatives", np, diy_dpath.len_of(Axis(0))));
    }
    let expected = (quantity.n_columns(), diy_dpath.dim().1, diy_dpath.dim().2);
    if diy_dx.dim() != expected {
        return Err(RtError::shape("retrieval grid derivatives", expected, diy_dx.dim()));
    }
    if (atmosphere_dim >= 2 && path_lat.len() != np) || (atmosphere_dim == 3 && path_lon.len() != np) {
        return Err(RtError::InconsistentInputs(
            "path latitudes and longitudes must match the path pressures".to_string(),
        ));
    }
    // A single path point has no extent
    if np < 2 {
        return Ok(());
    }

    let nr1 = grids[0].len();
    let nr2 = grids.get(1).map_or(1, Vec::len);
    let gp_p = retrieval_gridpos(&grids[0], path_p, true);
    let gp_lat = match grids.get(1) {
        Some(grid) => retrieval_gridpos(grid, path_lat, false),
        None => vec![GridPos::single(); np],
    };
    let gp_lon = match grids.get(2) {
        Some(grid) => retrieval_gridpos(grid, path_lon, false),
        None => vec![GridPos::single(); np],
    };

    for ip in 0..np {
        let (wp, wlat, wlon) = (gp_p[ip].weights(), gp_lat[ip].weights(), gp_lon[ip].weights());
        let from = diy_dpath.index_axis(Axis(0), ip);
        for (dlon, w_lon) in [(0, wlon.0), (1, wlon.1)] {
            for (dlat, w_lat) in [(0, wlat.0), (1, wlat.1)] {
                for (dp, w_p) in [(0, wp.0), (1, wp.1)] {
                    if w_lon <= 0. || w_lat <= 0. || w_p <= 0. {
                        continue;
                    }
                    let ix = nr2 * nr1 * (gp_lon[ip].idx + dlon) + nr1 * (gp_lat[ip].idx + dlat) + gp_p[ip].idx + dp;
                    let w = w_lon * w_lat * w_p;
                    Zip::from(diy_dx.index_axis_mut(Axis(0), ix))
                        .and(&from)
                        .for_each(|to, &d| *to += w * d);
                }
            }
        }
    }
    Ok(())
}
