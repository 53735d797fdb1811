//! Pressure broadening and pressure shift.

use ndarray::ArrayView1;

use crate::catalogue::{
    Artscat3Fields, Artscat4Fields, LineRecord, BROADENING_SPECIES, N_BROADENING_SPECIES,
};
use crate::error::RtError;
use crate::species::{SpeciesCatalog, SpeciesTag};

/// Allowed deviation of the total broadening VMR from 1 before a warning
const VMR_SUM_TOLERANCE: f64 = 0.1;

/// Where an ARTSCAT-4 foreign broadening species is found in the list of
/// absorption species.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadSpecLocation {
    /// Not among the absorption species, ignored
    Absent,
    /// The species the lines belong to, covered by self broadening
    SameAsSelf,
    /// Index of the first tag group of that species
    At(usize),
}

/// Locate the foreign broadening species in `abs_species`, for lines of the
/// species `abs_species[this_species]`.
pub fn find_broad_spec_locations(
    catalog: &SpeciesCatalog,
    abs_species: &[Vec<SpeciesTag>],
    this_species: usize,
) -> Result<[BroadSpecLocation; N_BROADENING_SPECIES], RtError> {
    let this = abs_species
        .get(this_species)
        .and_then(|group| group.first())
        .ok_or_else(|| {
            RtError::InvalidArgument(format!(
                "this_species = {this_species} does not point to a tag group of abs_species (length {})",
                abs_species.len()
            ))
        })?;

    let mut locations = [BroadSpecLocation::Absent; N_BROADENING_SPECIES];
    for (location, name) in locations.iter_mut().zip(BROADENING_SPECIES) {
        // A catalogue without the species can't have it among the tags either
        let Ok(isi) = catalog.species_index(name) else {
            continue;
        };
        *location = if isi == this.species {
            BroadSpecLocation::SameAsSelf
        } else {
            abs_species
                .iter()
                .position(|group| group.first().is_some_and(|tag| tag.species == isi))
                .map_or(BroadSpecLocation::Absent, BroadSpecLocation::At)
        };
    }
    Ok(locations)
}

/// Pressure broadened width and pressure shift of one line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Broadening {
    /// Half width in Hz
    pub gamma: f64,
    /// Pressure shift in Hz
    pub deltaf: f64,
    /// Total VMR of self and the foreign broadening species present, only
    /// for ARTSCAT-4 lines
    pub total_vmr: Option<f64>,
}

impl Broadening {
    /// True if the total broadening VMR is more than 10% away from 1.
    pub fn vmr_sum_off(&self) -> bool {
        self.total_vmr
            .is_some_and(|total| (total - 1.).abs() > VMR_SUM_TOLERANCE)
    }
}

/// ARTSCAT-3: air broadening for the foreign part of the pressure plus self
/// broadening. The shift exponent is `0.25 + 1.5 NAIR`.
pub fn broadening_artscat3(
    p: f64,
    p_partial: f64,
    t: f64,
    line: &LineRecord,
    v3: &Artscat3Fields,
) -> Broadening {
    let theta = v3.tgam / t;
    let theta_nair = theta.powf(v3.nair);

    let gamma = v3.agam * theta_nair * (p - p_partial) + line.sgam * theta.powf(line.nself) * p_partial;
    let deltaf = v3.psf * p * theta.powf(0.25 + 1.5 * v3.nair);

    Broadening {
        gamma,
        deltaf,
        total_vmr: None,
    }
}

/// ARTSCAT-4: self broadening plus the VMR weighted mean of the foreign
/// broadening species present, scaled by the foreign pressure.
///
/// If no foreign species is present, the self broadening rate stands in for
/// the foreign one and there is no shift. A foreign slot that coincides with
/// the line's own species must carry the self parameters.
pub fn broadening_artscat4(
    p: f64,
    t: f64,
    vmrs: ArrayView1<'_, f64>,
    this_species: usize,
    locations: &[BroadSpecLocation; N_BROADENING_SPECIES],
    line: &LineRecord,
    v4: &Artscat4Fields,
) -> Result<Broadening, RtError> {
    let theta = line.ti0 / t;

    let p_self = vmrs[this_species] * p;
    let p_foreign = p - p_self;

    let mut gamma = line.sgam * theta.powf(line.nself) * p_self;
    let mut gamma_foreign = 0.;
    let mut deltaf = 0.;
    let mut vmr_sum = 0.;

    for (i, location) in locations.iter().enumerate() {
        match *location {
            BroadSpecLocation::Absent => {}
            BroadSpecLocation::SameAsSelf => {
                if v4.gamma_foreign[i] != line.sgam || v4.n_foreign[i] != line.nself {
                    return Err(RtError::BroadeningInconsistency {
                        species: BROADENING_SPECIES[i],
                        frequency: line.f,
                    });
                }
            }
            BroadSpecLocation::At(k) => {
                let vmr = vmrs[k];
                vmr_sum += vmr;
                gamma_foreign += v4.gamma_foreign[i] * theta.powf(v4.n_foreign[i]) * vmr;
                deltaf += v4.delta_foreign[i] * theta.powf(0.25 + 1.5 * v4.n_foreign[i]) * vmr;
            }
        }
    }

    if vmr_sum != 0. {
        gamma_foreign /= vmr_sum;
        deltaf /= vmr_sum;
    } else if p_self > 0. {
        gamma_foreign = gamma / p_self;
    }

    gamma_foreign *= p_foreign;
    deltaf *= p;
    gamma += gamma_foreign;

    Ok(Broadening {
        gamma,
        deltaf,
        total_vmr: Some(vmrs[this_species] + vmr_sum),
    })
}
