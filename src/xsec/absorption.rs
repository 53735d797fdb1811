//! Gas absorption coefficients from cross sections.

use std::fmt::Debug;

use ndarray::{Array2, ArrayView2, Axis};

use super::{abs_lines_per_species, xsec_species, XsecSettings};
use crate::catalogue::LineRecord;
use crate::error::RtError;
use crate::physics::number_density;
use crate::species::{SpeciesAuxData, SpeciesCatalog, SpeciesTag};

/// Source of gas absorption for the scattering solver.
pub trait GasAbsorption: Debug + Send + Sync {
    /// Absorption coefficients in 1/m, dimensioned (`f_grid.len()`, `p.len()`).
    ///
    /// `vmrs` has one row per absorption species and one column per level.
    fn absorption_coefficients(
        &self,
        f_grid: &[f64],
        p: &[f64],
        t: &[f64],
        vmrs: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, RtError>;
}

/// Line-by-line absorption of a set of species tag groups.
#[derive(Debug)]
pub struct LineByLineAbsorption<'a> {
    catalog: &'a SpeciesCatalog,
    abs_species: Vec<Vec<SpeciesTag>>,
    lines_per_species: Vec<Vec<LineRecord>>,
    settings: XsecSettings,
    isotopologue_ratios: SpeciesAuxData,
}

impl<'a> LineByLineAbsorption<'a> {
    /// Distribute `lines` over the tag groups of `abs_species`.
    ///
    /// The isotopologue ratios must be defined for every isotopologue of the
    /// tag groups.
    pub fn new(
        catalog: &'a SpeciesCatalog,
        abs_species: Vec<Vec<SpeciesTag>>,
        lines: &[LineRecord],
        settings: XsecSettings,
        isotopologue_ratios: SpeciesAuxData,
    ) -> Result<Self, RtError> {
        if abs_species.iter().any(Vec::is_empty) {
            return Err(RtError::InvalidArgument(
                "abs_species contains an empty tag group".to_string(),
            ));
        }
        isotopologue_ratios.check_isotopologue_ratios(catalog, &abs_species)?;
        let lines_per_species = abs_lines_per_species(catalog, lines, &abs_species);
        Ok(Self {
            catalog,
            abs_species,
            lines_per_species,
            settings,
            isotopologue_ratios,
        })
    }

    /// The tag groups, in the order of the VMR rows.
    pub fn abs_species(&self) -> &[Vec<SpeciesTag>] {
        &self.abs_species
    }

    /// Lines assigned to each tag group.
    pub fn lines_per_species(&self) -> &[Vec<LineRecord>] {
        &self.lines_per_species
    }
}

impl GasAbsorption for LineByLineAbsorption<'_> {
    fn absorption_coefficients(
        &self,
        f_grid: &[f64],
        p: &[f64],
        t: &[f64],
        vmrs: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, RtError> {
        let nf = f_grid.len();
        let np = p.len();
        if vmrs.dim() != (self.abs_species.len(), np) {
            return Err(RtError::shape("vmrs", (self.abs_species.len(), np), vmrs.dim()));
        }

        let mut abs_coef = Array2::zeros((nf, np));
        let mut attenuation = Array2::zeros((nf, np));
        let mut phase = Array2::zeros((nf, np));
        for (i, lines) in self.lines_per_species.iter().enumerate() {
            if lines.is_empty() {
                continue;
            }
            attenuation.fill(0.);
            xsec_species(
                attenuation.view_mut(),
                phase.view_mut(),
                f_grid,
                p,
                t,
                vmrs,
                &self.abs_species,
                i,
                lines,
                &self.settings,
                self.catalog,
                &self.isotopologue_ratios,
            )?;

            for (j, (mut column, xsec)) in abs_coef
                .axis_iter_mut(Axis(1))
                .zip(attenuation.axis_iter(Axis(1)))
                .enumerate()
            {
                let n = vmrs[[i, j]] * number_density(p[j], t[j]);
                column.scaled_add(n, &xsec);
            }
        }
        Ok(abs_coef)
    }
}

/// The same absorption coefficient at every frequency and level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantAbsorption {
    /// Absorption coefficient in 1/m
    pub coefficient: f64,
}

impl GasAbsorption for ConstantAbsorption {
    fn absorption_coefficients(
        &self,
        f_grid: &[f64],
        p: &[f64],
        t: &[f64],
        _vmrs: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, RtError> {
        if t.len() != p.len() {
            return Err(RtError::shape("t", [p.len()], [t.len()]));
        }
        Ok(Array2::from_elem((f_grid.len(), p.len()), self.coefficient))
    }
}
