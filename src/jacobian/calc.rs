//! Jacobian calculations for measurement blocks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayViewMut2, ArrayViewMut3, Axis};
use rayon::prelude::*;

use super::basis::{calc_nd_field, polynomial_basis_func, sinefit_basis};
use super::grids::{
    get_perturbation_gridpos, get_perturbation_range, perturbation_field_1d, perturbation_field_2d,
    perturbation_field_3d, PerturbationMode,
};
use super::{
    AtmosphericState, ForwardModel, Jacobian, PointingCalc, QuantityKind, RetrievalQuantity, SensorSetup,
    SpeciesUnit,
};
use crate::error::RtError;
use crate::interp::{gridpos, interp_poly, GridPos};
use crate::parallel;

/// How often `calc_all` reports progress and looks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Order of the frequency interpolation of shifted spectra
const FREQUENCY_INTERP_ORDER: usize = 3;

/// Everything a quantity's calculation needs for one measurement block.
struct BlockContext<'a> {
    model: &'a dyn ForwardModel,
    state: &'a AtmosphericState,
    sensor: &'a SensorSetup,
    block: usize,
    iyb: ArrayView1<'a, f64>,
    yb: ArrayView1<'a, f64>,
}

impl BlockContext<'_> {
    /// (y(perturbed iyb) - yb) / dx
    fn difference(&self, iyb: ArrayView1<'_, f64>, dx: f64) -> Result<Array1<f64>, RtError> {
        let y = self.sensor.apply(iyb)?;
        Ok((y - &self.yb) / dx)
    }

    /// Difference for a perturbed atmosphere.
    fn atmospheric_difference(&self, state: &AtmosphericState, dx: f64) -> Result<Array1<f64>, RtError> {
        let iyb = self.model.iyb(self.block, state, 0.)?;
        self.difference(iyb.view(), dx)
    }
}

/// Positions of the atmospheric grids on the perturbation grids of a
/// quantity.
struct PerturbationGrids {
    gp: [Vec<GridPos>; 3],
    n: [usize; 3],
}

impl PerturbationGrids {
    fn new(quantity: &RetrievalQuantity, state: &AtmosphericState) -> Self {
        let atm = state.grids();
        let jg = quantity.grids();
        let atm_grids = [atm.p_grid(), atm.lat_grid(), atm.lon_grid()];
        let mut gp: [Vec<GridPos>; 3] = Default::default();
        let mut n = [1; 3];
        for (dim, grid) in jg.iter().enumerate() {
            gp[dim] = get_perturbation_gridpos(atm_grids[dim], grid, dim == 0);
            n[dim] = grid.len();
        }
        Self { gp, n }
    }

    /// Number of retrieval points, pressure fastest, then latitude, then
    /// longitude.
    fn n_points(&self) -> usize {
        self.n.iter().product()
    }

    /// Perturb `field` at retrieval point `point`.
    fn perturb(
        &self,
        mut field: ArrayViewMut3<'_, f64>,
        atmosphere_dim: usize,
        point: usize,
        size: f64,
        mode: PerturbationMode,
    ) -> Result<(), RtError> {
        let [np, nlat, nlon] = self.n;
        let (ip, ilat, ilon) = (point % np, (point / np) % nlat, point / (np * nlat));
        let p_range = get_perturbation_range(ip, np);
        match atmosphere_dim {
            1 => perturbation_field_1d(field.slice_mut(s![.., 0, 0]), &self.gp[0], np + 2, p_range, size, mode),
            2 => perturbation_field_2d(
                field.slice_mut(s![.., .., 0]),
                &self.gp[0],
                &self.gp[1],
                np + 2,
                nlat + 2,
                p_range,
                get_perturbation_range(ilat, nlat),
                size,
                mode,
            ),
            _ => perturbation_field_3d(
                field,
                &self.gp[0],
                &self.gp[1],
                &self.gp[2],
                [np + 2, nlat + 2, nlon + 2],
                p_range,
                get_perturbation_range(ilat, nlat),
                get_perturbation_range(ilon, nlon),
                size,
                mode,
            ),
        }
    }
}

/// Run `column` for `n` retrieval points, in parallel unless already inside
/// a parallel region. The first failing point, by index, gives the error.
fn perturbed_columns(
    n: usize,
    column: impl Fn(usize) -> Result<Array1<f64>, RtError> + Sync,
) -> Result<Vec<Array1<f64>>, RtError> {
    let results: Vec<Result<Array1<f64>, RtError>> = if parallel::should_parallelize(n) {
        (0..n).into_par_iter().map(|i| parallel::region(|| column(i))).collect()
    } else {
        (0..n).map(&column).collect()
    };
    results.into_iter().collect()
}

impl Jacobian {
    /// Calculate the Jacobian rows of measurement block `block`.
    ///
    /// `iyb` and `yb` are the unperturbed pencil beam radiances and
    /// measurement of the block, and `jacobian` the rows of the block,
    /// dimensioned (measurement, column). Analytical quantities are left
    /// untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn calc_block(
        &self,
        model: &dyn ForwardModel,
        state: &AtmosphericState,
        sensor: &SensorSetup,
        block: usize,
        iyb: ArrayView1<'_, f64>,
        yb: ArrayView1<'_, f64>,
        mut jacobian: ArrayViewMut2<'_, f64>,
    ) -> Result<(), RtError> {
        if !self.enabled {
            return Ok(());
        }
        let layout = self.layout()?;
        if sensor.n_blocks() != layout.n_blocks || sensor.n1y() != layout.n1y {
            return Err(RtError::InconsistentInputs(format!(
                "the Jacobian was closed for {} blocks of {} measurements, the sensor has {} blocks of {}",
                layout.n_blocks,
                layout.n1y,
                sensor.n_blocks(),
                sensor.n1y()
            )));
        }
        if block >= layout.n_blocks {
            return Err(RtError::InvalidArgument(format!(
                "measurement block {block} is out of range ({} blocks)",
                layout.n_blocks
            )));
        }
        if iyb.len() != sensor.niyb() {
            return Err(RtError::shape("iyb", sensor.niyb(), iyb.len()));
        }
        if yb.len() != sensor.n1y() {
            return Err(RtError::shape("yb", sensor.n1y(), yb.len()));
        }
        let expected = (sensor.n1y(), self.n_columns());
        if jacobian.dim() != expected {
            return Err(RtError::shape("block Jacobian", expected, jacobian.dim()));
        }

        let ctx = BlockContext {
            model,
            state,
            sensor,
            block,
            iyb: iyb.view(),
            yb: yb.view(),
        };
        for (q, &[start, _]) in self.quantities.iter().zip(&layout.indices) {
            if q.is_analytical() {
                continue;
            }
            debug!("block {block}: Jacobian of {q}");
            match q.kind() {
                QuantityKind::AbsSpecies { tags, unit, .. } => {
                    let species = state
                        .abs_species()
                        .iter()
                        .position(|group| group == tags)
                        .ok_or_else(|| {
                            RtError::UnknownSpecies(format!("{} is not one of the absorption species", q.subtag()))
                        })?;
                    let columns = abs_species_columns(&ctx, q, species, *unit)?;
                    assign_columns(&mut jacobian, start, columns);
                }
                QuantityKind::Temperature { hse } => {
                    let columns = temperature_columns(&ctx, q, *hse)?;
                    assign_columns(&mut jacobian, start, columns);
                }
                QuantityKind::FrequencyShift | QuantityKind::FrequencyStretch => {
                    let dy = frequency_difference(&ctx, q)?;
                    time_columns(&mut jacobian, &ctx, q, start, dy)?;
                }
                QuantityKind::PointingZa(calc) => {
                    let dy = match calc {
                        PointingCalc::Interp => pointing_interp_difference(&ctx, q.perturbation())?,
                        PointingCalc::Recalc => {
                            let iyb = model.iyb(block, state, q.perturbation())?;
                            ctx.difference(iyb.view(), q.perturbation())?
                        }
                    };
                    time_columns(&mut jacobian, &ctx, q, start, dy)?;
                }
                QuantityKind::Polyfit { coefficient } => {
                    let w = polynomial_basis_func(sensor.response_f_grid(), *coefficient)?;
                    fill_baseline(&mut jacobian, &ctx, q, start, &[w.as_slice()]);
                }
                QuantityKind::Sinefit { .. } => {
                    let (sine, cosine) = sinefit_basis(sensor.response_f_grid(), q.grids()[0][0]);
                    fill_baseline(&mut jacobian, &ctx, q, start, &[sine.as_slice(), cosine.as_slice()]);
                }
                QuantityKind::Wind(_) => {}
            }
        }
        Ok(())
    }

    /// Calculate the measurement vector and the Jacobian of all measurement
    /// blocks.
    ///
    /// The blocks are spread over a thread pool of `num_threads` threads
    /// (`None` chooses automatically). With fewer blocks than threads, the
    /// perturbations within each block are parallelized instead. Setting
    /// `cancel` stops the blocks that have not started yet.
    pub fn calc_all(
        &self,
        model: &dyn ForwardModel,
        state: &AtmosphericState,
        sensor: &SensorSetup,
        num_threads: Option<usize>,
        cancel: Option<&AtomicBool>,
    ) -> Result<(Array1<f64>, Array2<f64>), RtError> {
        let layout = self.layout()?;
        let n_blocks = sensor.n_blocks();
        if self.enabled && n_blocks != layout.n_blocks {
            return Err(RtError::InconsistentInputs(format!(
                "the Jacobian was closed for {} measurement blocks, the sensor has {n_blocks}",
                layout.n_blocks
            )));
        }
        let n1y = sensor.n1y();
        let n_columns = self.n_columns();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.unwrap_or(0))
            .build()
            .map_err(|e| RtError::InvalidArgument(e.to_string()))?;
        let block_parallel = n_blocks >= pool.current_num_threads();

        let num_completed = AtomicUsize::new(0);
        let never = AtomicBool::new(false);
        let cancel = cancel.unwrap_or(&never);
        let mut results = Vec::new();

        info!("Calculating {n_blocks} measurement blocks with {n_columns} Jacobian columns");

        let run_block = |block: usize| -> Result<(Array1<f64>, Array2<f64>), RtError> {
            if cancel.load(Ordering::Relaxed) {
                return Err(RtError::Cancelled);
            }
            let iyb = model.iyb(block, state, 0.)?;
            let yb = sensor.apply(iyb.view())?;
            let mut jb = Array2::zeros((n1y, n_columns));
            self.calc_block(model, state, sensor, block, iyb.view(), yb.view(), jb.view_mut())?;
            Ok((yb, jb))
        };

        pool.in_place_scope(|s| {
            s.spawn(|_| {
                (0..n_blocks)
                    .into_par_iter()
                    .map(|block| {
                        if block_parallel {
                            parallel::region(|| run_block(block))
                        } else {
                            run_block(block)
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
                    let progress = completed as f32 / n_blocks as f32 * 100.;
                    info!("Completed {completed}/{n_blocks} measurement blocks ({progress:0.2}%)");
                    reported = completed;
                }
                if completed == n_blocks || cancel.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });

        debug!("copying block results");
        let mut y = Array1::zeros(n_blocks * n1y);
        let mut jacobian = Array2::zeros((n_blocks * n1y, n_columns));
        results
            .into_iter()
            .enumerate()
            .try_for_each(|(block, result)| -> Result<_, RtError> {
                let (yb, jb) = result?;
                let rows = block * n1y..(block + 1) * n1y;
                y.slice_mut(s![rows.clone()]).assign(&yb);
                jacobian.slice_mut(s![rows, ..]).assign(&jb);
                Ok(())
            })?;

        Ok((y, jacobian))
    }
}

fn assign_columns(jacobian: &mut ArrayViewMut2<'_, f64>, start: usize, columns: Vec<Array1<f64>>) {
    for (i, dy) in columns.into_iter().enumerate() {
        jacobian.column_mut(start + i).assign(&dy);
    }
}

/// Gas species by perturbing the VMR (or number density) field.
fn abs_species_columns(
    ctx: &BlockContext<'_>,
    q: &RetrievalQuantity,
    species: usize,
    unit: SpeciesUnit,
) -> Result<Vec<Array1<f64>>, RtError> {
    let mode = match unit {
        SpeciesUnit::Rel => PerturbationMode::Relative,
        _ => PerturbationMode::Absolute,
    };
    let grids = PerturbationGrids::new(q, ctx.state);
    let atmosphere_dim = ctx.state.grids().atmosphere_dim();
    let nd = match unit {
        SpeciesUnit::Nd => Some(calc_nd_field(ctx.state.grids().p_grid(), ctx.state.t_field().view())?),
        _ => None,
    };

    perturbed_columns(grids.n_points(), |point| {
        let mut state = ctx.state.clone();
        let mut vmr = state.vmr_field_mut().index_axis_mut(Axis(0), species);
        match &nd {
            Some(nd) => {
                vmr *= nd;
                grids.perturb(vmr.view_mut(), atmosphere_dim, point, q.perturbation(), mode)?;
                vmr /= nd;
            }
            None => grids.perturb(vmr.view_mut(), atmosphere_dim, point, q.perturbation(), mode)?,
        }
        ctx.atmospheric_difference(&state, q.perturbation())
    })
}

/// Temperature by absolute perturbations, with the altitudes optionally
/// rebalanced.
fn temperature_columns(ctx: &BlockContext<'_>, q: &RetrievalQuantity, hse: bool) -> Result<Vec<Array1<f64>>, RtError> {
    let grids = PerturbationGrids::new(q, ctx.state);
    let atmosphere_dim = ctx.state.grids().atmosphere_dim();

    perturbed_columns(grids.n_points(), |point| {
        let mut state = ctx.state.clone();
        grids.perturb(
            state.t_field_mut().view_mut(),
            atmosphere_dim,
            point,
            q.perturbation(),
            PerturbationMode::Absolute,
        )?;
        if hse {
            state.apply_hydrostatic()?;
        }
        ctx.atmospheric_difference(&state, q.perturbation())
    })
}

/// Frequency shift or stretch. iyb is reinterpolated to the shifted
/// frequencies, a stretch is weighted by a first order polynomial over the
/// sensor response frequencies.
fn frequency_difference(ctx: &BlockContext<'_>, q: &RetrievalQuantity) -> Result<Array1<f64>, RtError> {
    let sensor = ctx.sensor;
    let f_grid = sensor.f_grid();
    let nf = f_grid.len();
    let stokes_dim = sensor.stokes_dim();
    let df = q.perturbation();
    let shifted: Vec<f64> = f_grid.iter().map(|f| f + df).collect();

    let mut iyb2 = Array1::zeros(ctx.iyb.len());
    for (spectrum, mut target) in ctx
        .iyb
        .exact_chunks(nf * stokes_dim)
        .into_iter()
        .zip(iyb2.exact_chunks_mut(nf * stokes_dim))
    {
        for is in 0..stokes_dim {
            let values: Vec<f64> = spectrum.slice(s![is..;stokes_dim]).to_vec();
            for (iv, &f) in shifted.iter().enumerate() {
                target[iv * stokes_dim + is] = interp_poly(f_grid, &values, f, FREQUENCY_INTERP_ORDER);
            }
        }
    }
    let mut dy = ctx.difference(iyb2.view(), df)?;

    if *q.kind() == QuantityKind::FrequencyStretch {
        let w = polynomial_basis_func(sensor.response_f_grid(), 1)?;
        let npol = sensor.n_pol();
        for (i, dy) in dy.iter_mut().enumerate() {
            *dy *= w[(i / npol) % w.len()];
        }
    }
    Ok(dy)
}

/// Pointing by interpolating iyb to zenith angles `dza` above and below the
/// block's grid, as a centered difference.
fn pointing_interp_difference(ctx: &BlockContext<'_>, dza: f64) -> Result<Array1<f64>, RtError> {
    let sensor = ctx.sensor;
    let za_grid = sensor.mblock_za_grid();
    let nza = za_grid.len();
    let stride = ctx.iyb.len() / nza;

    let shifted = |offset: f64| -> Array1<f64> {
        let za: Vec<f64> = za_grid.iter().map(|za| za + offset).collect();
        let gp = gridpos(za_grid, &za);
        let mut iyb = Array1::zeros(ctx.iyb.len());
        for i in 0..stride {
            let values = ctx.iyb.slice(s![i..;stride]).to_vec();
            for (iza, g) in gp.iter().enumerate() {
                iyb[iza * stride + i] = g.interp(&values);
            }
        }
        iyb
    };

    let y1 = sensor.apply(shifted(-dza).view())?;
    let y2 = sensor.apply(shifted(dza).view())?;
    Ok((y2 - y1) / (2. * dza))
}

/// Columns of a quantity that varies in time: one column per block, or a
/// polynomial in the sensor time.
fn time_columns(
    jacobian: &mut ArrayViewMut2<'_, f64>,
    ctx: &BlockContext<'_>,
    q: &RetrievalQuantity,
    start: usize,
    dy: Array1<f64>,
) -> Result<(), RtError> {
    let grid = &q.grids()[0];
    if grid.first() == Some(&-1.) {
        jacobian.column_mut(start + ctx.block).assign(&dy);
        return Ok(());
    }
    for c in 0..grid.len() {
        let w = polynomial_basis_func(ctx.sensor.sensor_time(), c)?;
        jacobian.column_mut(start + c).assign(&(&dy * w[ctx.block]));
    }
    Ok(())
}

/// Fill baseline basis functions. `basis` holds one function over the
/// sensor response frequencies per column of each baseline.
fn fill_baseline(
    jacobian: &mut ArrayViewMut2<'_, f64>,
    ctx: &BlockContext<'_>,
    q: &RetrievalQuantity,
    start: usize,
    basis: &[&[f64]],
) {
    let sensor = ctx.sensor;
    let (nf, npol, nza) = (sensor.response_f_grid().len(), sensor.n_pol(), sensor.n_za());
    let jg = q.grids();
    let (n1, n2, n3) = (jg[1].len(), jg[2].len(), jg[3].len());
    let nb = basis.len();

    let mut col4 = start;
    if n3 > 1 {
        col4 += ctx.block * n2 * n1 * nb;
    }
    for l in 0..nza {
        let row3 = l * nf * npol;
        let col3 = if n2 > 1 { col4 + l * n1 * nb } else { col4 };
        for f in 0..nf {
            let row2 = row3 + f * npol;
            for p in 0..npol {
                let col1 = if n1 > 1 { col3 + p * nb } else { col3 };
                for (b, values) in basis.iter().enumerate() {
                    jacobian[[row2 + p, col1 + b]] = values[f];
                }
            }
        }
    }
}
