//! Line-by-line absorption cross sections.
//!
//! [`xsec_species`] sums the contributions of all lines of one species into
//! per-level cross sections. Either the pressure levels or the lines of a level
//! are spread over the rayon thread pool, whichever loop is large enough.
//! Lines are accumulated into per-task buffers that are summed afterwards.

pub mod absorption;
pub mod broadening;


use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

use self::broadening::{
    broadening_artscat3, broadening_artscat4, find_broad_spec_locations, BroadSpecLocation,
};
use crate::catalogue::{LineFormat, LineRecord, N_BROADENING_SPECIES};
use crate::error::RtError;
use crate::interp::is_sorted;
use crate::lineshape::{LineShape, Normalization};
use crate::parallel;
use crate::physics::{doppler_const, BOLTZMANN_CONST, PLANCK_CONST};
use crate::species::{SpeciesAuxData, SpeciesCatalog, SpeciesTag};

/// Lineshape settings of a cross section calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XsecSettings {
    /// Lineshape function
    pub lineshape: LineShape,
    /// Normalization factor
    pub normalization: Normalization,
    /// Lines are cut off at this distance from the center (Hz), `None` for no
    /// cutoff
    pub cutoff: Option<f64>,
}

impl XsecSettings {
    /// The cutoff, if given, must be positive.
    pub fn new(
        lineshape: LineShape,
        normalization: Normalization,
        cutoff: Option<f64>,
    ) -> Result<Self, RtError> {
        if let Some(cutoff) = cutoff {
            if cutoff.is_nan() || cutoff <= 0. {
                return Err(RtError::InvalidArgument(format!(
                    "cutoff must be positive, got {cutoff} Hz"
                )));
            }
        }
        Ok(Self {
            lineshape,
            normalization,
            cutoff,
        })
    }
}

/// Inputs shared by all levels and lines.
struct XsecContext<'a> {
    f_grid: &'a [f64],
    abs_p: &'a [f64],
    abs_t: &'a [f64],
    abs_vmrs: ArrayView2<'a, f64>,
    this_species: usize,
    lines: &'a [LineRecord],
    settings: &'a XsecSettings,
    catalog: &'a SpeciesCatalog,
    isotopologue_ratios: &'a SpeciesAuxData,
    locations: [BroadSpecLocation; N_BROADENING_SPECIES],
}

/// Scratch buffers for one line, with one element more than the frequency grid
/// for the cutoff frequency.
struct LineBuffers {
    f_local: Vec<f64>,
    ls_attenuation: Vec<f64>,
    ls_phase: Vec<f64>,
    fac: Vec<f64>,
}

impl LineBuffers {
    fn new(nf: usize) -> Self {
        Self {
            f_local: vec![0.; nf + 1],
            ls_attenuation: vec![0.; nf + 1],
            ls_phase: vec![0.; nf + 1],
            fac: vec![0.; nf + 1],
        }
    }
}

/// Sum of line contributions for one level.
struct LevelXsec {
    attenuation: Vec<f64>,
    phase: Vec<f64>,
    /// Total broadening VMR, if it is far from 1 for any line
    vmr_sum_off: Option<f64>,
}

impl LevelXsec {
    fn new(nf: usize) -> Self {
        Self {
            attenuation: vec![0.; nf],
            phase: vec![0.; nf],
            vmr_sum_off: None,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.attenuation
            .iter_mut()
            .zip(&other.attenuation)
            .for_each(|(a, b)| *a += b);
        self.phase
            .iter_mut()
            .zip(&other.phase)
            .for_each(|(a, b)| *a += b);
        self.vmr_sum_off = self.vmr_sum_off.or(other.vmr_sum_off);
        self
    }
}

/// Atmospheric state at one level.
struct Level<'a> {
    p: f64,
    t: f64,
    p_partial: f64,
    vmrs: ArrayView1<'a, f64>,
}

/// Keep the failure with the lower index.
fn first_of(a: Option<(usize, RtError)>, b: Option<(usize, RtError)>) -> Option<(usize, RtError)> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Add the cross sections of one species' lines to `xsec_attenuation` and
/// `xsec_phase`, both dimensioned (`f_grid.len()`, `abs_p.len()`).
///
/// `abs_vmrs` holds the VMR of every tag group of `abs_species` at every
/// level, dimensioned (`abs_species.len()`, `abs_p.len()`). All `lines` must
/// belong to the species of `abs_species[this_species]`. The phase is only
/// written if the lineshape provides one.
///
/// If a line fails, the error of the first failing level (and within it, the
/// first failing line) is returned, the same as a sequential run would give.
#[allow(clippy::too_many_arguments)]
pub fn xsec_species(
    mut xsec_attenuation: ArrayViewMut2<'_, f64>,
    mut xsec_phase: ArrayViewMut2<'_, f64>,
    f_grid: &[f64],
    abs_p: &[f64],
    abs_t: &[f64],
    abs_vmrs: ArrayView2<'_, f64>,
    abs_species: &[Vec<SpeciesTag>],
    this_species: usize,
    lines: &[LineRecord],
    settings: &XsecSettings,
    catalog: &SpeciesCatalog,
    isotopologue_ratios: &SpeciesAuxData,
) -> Result<(), RtError> {
    let nf = f_grid.len();
    let np = abs_p.len();
    let nl = lines.len();

    if settings.cutoff.is_some() && !is_sorted(f_grid) {
        return Err(RtError::UnsortedFrequencyGrid);
    }
    if abs_t.len() != np {
        return Err(RtError::shape("abs_t", [np], [abs_t.len()]));
    }
    if let Some(&t) = abs_t.iter().find(|&&t| t < 0.) {
        return Err(RtError::NegativeTemperature(t));
    }
    if abs_vmrs.dim() != (abs_species.len(), np) {
        return Err(RtError::shape("abs_vmrs", (abs_species.len(), np), abs_vmrs.dim()));
    }
    if xsec_attenuation.dim() != (nf, np) {
        return Err(RtError::shape("xsec_attenuation", (nf, np), xsec_attenuation.dim()));
    }
    if xsec_phase.dim() != (nf, np) {
        return Err(RtError::shape("xsec_phase", (nf, np), xsec_phase.dim()));
    }

    let locations = find_broad_spec_locations(catalog, abs_species, this_species)?;
    let this_tag = abs_species[this_species][0];
    for line in lines {
        if line.species != this_tag.species {
            return Err(RtError::InconsistentInputs(format!(
                "line at {} Hz belongs to species index {}, but the lines are for {}",
                line.f,
                line.species,
                this_tag.name(catalog)
            )));
        }
        if catalog.isotopologue(line.species, line.isotopologue).is_none() {
            return Err(RtError::UnknownSpecies(format!(
                "species {} isotopologue index {}",
                line.species, line.isotopologue
            )));
        }
    }

    let ctx = XsecContext {
        f_grid,
        abs_p,
        abs_t,
        abs_vmrs: abs_vmrs.view(),
        this_species,
        lines,
        settings,
        catalog,
        isotopologue_ratios,
        locations,
    };

    let parallel_levels = parallel::should_parallelize(np);
    debug!(
        "cross sections for {} with {nl} lines, {nf} frequencies, {np} levels (parallel over {})",
        this_tag.name(catalog),
        if parallel_levels { "levels" } else { "lines" }
    );

    let mut results: Vec<Result<Option<LevelXsec>, RtError>> = Vec::with_capacity(np);
    if parallel_levels {
        let first_failure = AtomicUsize::new(usize::MAX);
        (0..np)
            .into_par_iter()
            .map(|i| {
                // Levels after a failed one are skipped
                if i > first_failure.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                parallel::region(|| xsec_level(&ctx, i, false))
                    .map(Some)
                    .map_err(|e| {
                        first_failure.fetch_min(i, Ordering::Relaxed);
                        e
                    })
            })
            .collect_into_vec(&mut results);
    } else {
        let parallel_lines = parallel::should_parallelize(nl);
        for i in 0..np {
            let level = xsec_level(&ctx, i, parallel_lines);
            let failed = level.is_err();
            results.push(level.map(Some));
            if failed {
                break;
            }
        }
    }

    let has_phase = settings.lineshape.has_phase();
    results
        .into_iter()
        .enumerate()
        .try_for_each(|(i, level)| -> Result<(), RtError> {
            let Some(level) = level? else {
                return Ok(());
            };

            if let Some(total) = level.vmr_sum_off {
                warn!(
                    "the total VMR of all broadening species (including self) at level {i} is {total}, more than 10% different from 1"
                );
            }

            let mut column = xsec_attenuation.index_axis_mut(Axis(1), i);
            column += &ArrayView1::from(level.attenuation.as_slice());
            if has_phase {
                let mut column = xsec_phase.index_axis_mut(Axis(1), i);
                column += &ArrayView1::from(level.phase.as_slice());
            }
            Ok(())
        })
}

/// Cross sections of all lines at level `i`.
fn xsec_level(ctx: &XsecContext<'_>, i: usize, parallel_lines: bool) -> Result<LevelXsec, RtError> {
    let nf = ctx.f_grid.len();
    let vmrs = ctx.abs_vmrs.index_axis(Axis(1), i);
    let level = Level {
        p: ctx.abs_p[i],
        t: ctx.abs_t[i],
        p_partial: ctx.abs_p[i] * vmrs[ctx.this_species],
        vmrs,
    };

    if !parallel_lines {
        let mut acc = LevelXsec::new(nf);
        let mut buf = LineBuffers::new(nf);
        for line in ctx.lines {
            add_line(ctx, &level, line, &mut buf, &mut acc)?;
        }
        return Ok(acc);
    }

    let first_failure = AtomicUsize::new(usize::MAX);
    let (acc, failure) = ctx
        .lines
        .par_iter()
        .enumerate()
        .fold(
            || (LevelXsec::new(nf), LineBuffers::new(nf), None),
            |(mut acc, mut buf, failure), (l, line)| {
                if l > first_failure.load(Ordering::Relaxed) {
                    return (acc, buf, failure);
                }
                let result = parallel::region(|| add_line(ctx, &level, line, &mut buf, &mut acc));
                let failure = match result {
                    Ok(()) => failure,
                    Err(e) => {
                        first_failure.fetch_min(l, Ordering::Relaxed);
                        first_of(failure, Some((l, e)))
                    }
                };
                (acc, buf, failure)
            },
        )
        .map(|(acc, _, failure)| (acc, failure))
        .reduce(
            || (LevelXsec::new(nf), None),
            |(a, fa), (b, fb)| (a.merge(b), first_of(fa, fb)),
        );

    match failure {
        Some((_, e)) => Err(e),
        None => Ok(acc),
    }
}

/// Add one line to the level accumulator.
fn add_line(
    ctx: &XsecContext<'_>,
    level: &Level<'_>,
    line: &LineRecord,
    buf: &mut LineBuffers,
    acc: &mut LevelXsec,
) -> Result<(), RtError> {
    let settings = ctx.settings;
    let f_grid = ctx.f_grid;
    let nf = f_grid.len();
    let t = level.t;

    let iso = ctx
        .catalog
        .isotopologue(line.species, line.isotopologue)
        .ok_or_else(|| RtError::UnknownSpecies(format!("isotopologue index {}", line.isotopologue)))?;

    // 1. Line intensity at the local temperature
    let mut f0 = line.f;
    let e_lower = line.elow;
    let e_upper = e_lower + f0 * PLANCK_CONST;
    let part_fct_ratio = iso.partition_fct_ratio(line.ti0, t)?;
    let nom = (-e_lower / (BOLTZMANN_CONST * t)).exp() - (-e_upper / (BOLTZMANN_CONST * t)).exp();
    let denom = (-e_lower / (BOLTZMANN_CONST * line.ti0)).exp()
        - (-e_upper / (BOLTZMANN_CONST * line.ti0)).exp();
    let mut intensity = line.i0 * part_fct_ratio * nom / denom;

    if settings.normalization == Normalization::Quadratic {
        // Microwave approximation of the intensity
        let mafac = (PLANCK_CONST * f0) / (2. * BOLTZMANN_CONST * t);
        intensity *= mafac / mafac.sinh();
    }

    // 2. Pressure broadening and shift
    let broadening = match &line.format {
        LineFormat::Artscat3(v3) => broadening_artscat3(level.p, level.p_partial, t, line, v3),
        LineFormat::Artscat4(v4) => broadening_artscat4(
            level.p,
            t,
            level.vmrs,
            ctx.this_species,
            &ctx.locations,
            line,
            v4,
        )?,
    };
    if broadening.vmr_sum_off() {
        acc.vmr_sum_off = broadening.total_vmr;
    }
    f0 += broadening.deltaf;

    // 3. Doppler width, without the sqrt(ln 2) factor
    let sigma = f0 * doppler_const() * (t / iso.mass).sqrt();

    // 4. Frequency range, with the cutoff frequency appended
    buf.f_local[..nf].copy_from_slice(f_grid);
    let (i_f_min, nfls, nfl) = match settings.cutoff {
        None => (0, nf, nf),
        Some(cutoff) => {
            let mut i_f_min = 0;
            while i_f_min < nf && f0 - cutoff > f_grid[i_f_min] {
                i_f_min += 1;
            }
            let mut i_f_max = nf as isize - 1;
            while i_f_max >= 0 && f0 + cutoff < f_grid[i_f_max as usize] {
                i_f_max -= 1;
            }
            let i_f_max = (i_f_max + 1) as usize;
            buf.f_local[i_f_max] = f0 + cutoff;

            // At least one, the cutoff frequency itself
            let nfls = i_f_max + 1 - i_f_min;
            (i_f_min, nfls, nfls - 1)
        }
    };
    if nfl == 0 {
        return Ok(());
    }

    // 5. Lineshape and normalization
    let f_sub = &buf.f_local[i_f_min..i_f_min + nfls];
    let ls_attenuation = &mut buf.ls_attenuation[..nfls];
    let ls_phase = &mut buf.ls_phase[..nfls];
    let fac = &mut buf.fac[..nfls];
    let has_phase = settings.lineshape.has_phase();

    settings
        .lineshape
        .evaluate(ls_attenuation, ls_phase, f0, broadening.gamma, sigma, f_sub);
    settings.normalization.evaluate(fac, f0, f_sub, t);

    if settings.cutoff.is_some() {
        let base = ls_attenuation[nfls - 1];
        ls_attenuation[..nfl].iter_mut().for_each(|ls| *ls -= base);
        if has_phase {
            let base = ls_phase[nfls - 1];
            ls_phase[..nfl].iter_mut().for_each(|ls| *ls -= base);
        }
    }

    // 6. Scale and accumulate
    let factors = intensity
        * ctx
            .isotopologue_ratios
            .get_param(line.species, line.isotopologue, 0);

    let out = &mut acc.attenuation[i_f_min..i_f_min + nfl];
    for ((x, ls), fac) in out.iter_mut().zip(&ls_attenuation[..nfl]).zip(&fac[..nfl]) {
        *x += ls * fac * factors;
    }
    if has_phase {
        let out = &mut acc.phase[i_f_min..i_f_min + nfl];
        for ((x, ls), fac) in out.iter_mut().zip(&ls_phase[..nfl]).zip(&fac[..nfl]) {
            *x += ls * fac * factors;
        }
    }
    Ok(())
}

/// Split a line list by species tag group.
///
/// Each line goes to the first group with a tag that matches its species and
/// isotopologue. Lines without a matching group are dropped. Continuum groups
/// get no lines.
pub fn abs_lines_per_species(
    catalog: &SpeciesCatalog,
    lines: &[LineRecord],
    abs_species: &[Vec<SpeciesTag>],
) -> Vec<Vec<LineRecord>> {
    let mut per_species = vec![Vec::new(); abs_species.len()];
    let mut unused = 0;

    for line in lines {
        let group = abs_species.iter().position(|group| {
            group.iter().any(|tag| {
                tag.species == line.species
                    && match tag.isotopologue {
                        None => true,
                        Some(iso) => {
                            iso == line.isotopologue
                                && catalog
                                    .isotopologue(tag.species, iso)
                                    .is_some_and(|rec| !rec.is_continuum())
                        }
                    }
            })
        });
        match group {
            Some(g) => per_species[g].push(line.clone()),
            None => unused += 1,
        }
    }

    if unused > 0 {
        debug!("{unused} lines don't belong to any species tag group");
    }
    per_species
}
