//! Python interface
//!
//! NOTE: this module is the interface between Rust and Python. The real work
//! happens in the other modules, and they do not use `pyo3`, it's only used
//! here.

use std::{
    fs::File,
    io::BufReader,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use log::{debug, info};
use ndarray::{s, Array2, ArrayViewMut2, Axis};
use numpy::prelude::*;
use numpy::{PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::catalogue::{read_catalogue, LineRecord};
use crate::error::RtError;
use crate::lineshape::{LineShape, Normalization};
use crate::parallel;
use crate::species::{parse_tag_group, SpeciesAuxData, SpeciesCatalog};
use crate::xsec::{abs_lines_per_species, xsec_species, XsecSettings};

impl From<RtError> for PyErr {
    fn from(e: RtError) -> Self {
        match e {
            RtError::Io(_) => PyIOError::new_err(e.to_string()),
            _ => PyValueError::new_err(e.to_string()),
        }
    }
}

/// Absorption cross sections.
///
/// Both arrays are dimensioned as (`num_freq`, `num_levels`).
#[pyclass]
struct XsecResult {
    attenuation: Array2<f64>,
    phase: Array2<f64>,
}

/// Implement all the "getters" for the Python properties
#[pymethods]
impl XsecResult {
    #[getter]
    fn attenuation<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.attenuation.to_pyarray(py)
    }

    #[getter]
    fn phase<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.phase.to_pyarray(py)
    }
}

fn load_catalogue(path: &str) -> Result<(u32, Vec<LineRecord>), RtError> {
    let reader = BufReader::new(File::open(path)?);
    read_catalogue(reader, SpeciesCatalog::builtin())
}

/// Compute the line-by-line cross sections of one absorption species.
///
/// `f_grid` is the frequency grid in Hz and has shape (`num_freq`, ). The
/// pressure levels `p` (Pa) and temperatures `t` (K) have shape
/// (`num_levels`, ). `vmrs` holds the volume mixing ratio of each tag group
/// of `species` at each level and has shape (`len(species)`, `num_levels`).
///
/// `species` is a list of tag groups, such as `["H2O-161,H2O-181", "O3"]`,
/// and `this_species` the index of the one to compute. Its lines are taken
/// from the ARTSCAT-3 or ARTSCAT-4 file `catalogue`.
///
/// `lineshape` is one of "no_shape", "Lorentz", "Doppler", "Voigt" and
/// "Faddeeva", `normalization` one of "no_norm", "linear", "quadratic" and
/// "VVH". Lines are cut off `cutoff` Hz from their center, or not at all for
/// `None`.
///
/// The number of worker threads is controlled by `num_threads`. It must be a
/// positive integer, or `None` to automatically choose the number of threads.
#[pyfunction]
#[pyo3(signature = (f_grid, p, t, vmrs, species, this_species, catalogue, lineshape, normalization, cutoff, num_threads))]
#[allow(clippy::too_many_arguments)]
fn compute_xsec(
    py: Python<'_>,
    f_grid: PyReadonlyArray1<'_, f64>,
    p: PyReadonlyArray1<'_, f64>,
    t: PyReadonlyArray1<'_, f64>,
    vmrs: PyReadonlyArray2<'_, f64>,
    species: Vec<String>,
    this_species: usize,
    catalogue: &str,
    lineshape: &str,
    normalization: &str,
    cutoff: Option<f64>,
    num_threads: Option<usize>,
) -> PyResult<XsecResult> {
    let num_freq = f_grid.len();
    let num_levels = p.len();

    if t.len() != num_levels {
        return Err(RtError::shape("t", [num_levels], [t.len()]).into());
    }
    if vmrs.dims() != [species.len(), num_levels] {
        return Err(RtError::shape("vmrs", [species.len(), num_levels], vmrs.dims()).into());
    }
    if this_species >= species.len() {
        return Err(PyValueError::new_err(format!(
            "this_species is {this_species}, but there are only {} species",
            species.len()
        )));
    }
    debug!("input shapes are consistent");

    let catalog = SpeciesCatalog::builtin();
    let abs_species = species
        .iter()
        .map(|group| parse_tag_group(catalog, group))
        .collect::<Result<Vec<_>, _>>()?;
    let settings = XsecSettings::new(
        lineshape.parse::<LineShape>()?,
        normalization.parse::<Normalization>()?,
        cutoff,
    )?;
    let isotopologue_ratios = SpeciesAuxData::from_catalog_abundances(catalog);

    let (version, lines) = load_catalogue(catalogue)?;
    let lines = abs_lines_per_species(catalog, &lines, &abs_species).swap_remove(this_species);
    info!(
        "Read {} ARTSCAT-{version} lines for {}",
        lines.len(),
        species[this_species]
    );

    // Ensure everything is converted and contiguous
    let f_grid = f_grid.as_slice()?;
    let p = p.as_slice()?;
    let t = t.as_slice()?;
    let vmrs = vmrs.as_array();

    let mut results = Vec::new();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    // Enough levels to keep every thread busy, otherwise the lines of each
    // level are spread over the pool instead
    let level_parallel = num_levels >= pool.current_num_threads();

    let num_completed = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);

    info!("Computing cross sections at {num_levels} levels and {num_freq} frequencies");

    pool.in_place_scope(|s| -> Result<(), PyErr> {
        s.spawn(|_| {
            (0..num_levels)
                .into_par_iter()
                .map(|level| -> Result<_, RtError> {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(RtError::Cancelled);
                    }

                    let mut attenuation = Array2::zeros((num_freq, 1));
                    let mut phase = Array2::zeros((num_freq, 1));
                    let run = |attenuation: ArrayViewMut2<'_, f64>, phase: ArrayViewMut2<'_, f64>| {
                        xsec_species(
                            attenuation,
                            phase,
                            f_grid,
                            &p[level..=level],
                            &t[level..=level],
                            vmrs.slice(s![.., level..=level]),
                            &abs_species,
                            this_species,
                            &lines,
                            &settings,
                            catalog,
                            &isotopologue_ratios,
                        )
                    };
                    if level_parallel {
                        parallel::region(|| run(attenuation.view_mut(), phase.view_mut()))?;
                    } else {
                        run(attenuation.view_mut(), phase.view_mut())?;
                    }
                    Ok((attenuation, phase))
                })
                .inspect(|_| {
                    num_completed.fetch_add(1, Ordering::Relaxed);
                })
                .collect_into_vec(&mut results);
        });

        // The work is done in the thread pool, but back here in the main
        // thread, handle progress reporting and checking for early
        // cancellation
        while !cancelled.load(Ordering::Relaxed) {
            if let Err(e) = py.check_signals() {
                cancelled.store(true, Ordering::Relaxed);
                return Err(e);
            }

            let num_completed = num_completed.load(Ordering::Relaxed);
            let progress = num_completed as f32 / num_levels as f32 * 100.;
            info!("Completed cross sections for {num_completed}/{num_levels} levels ({progress:0.2}%)");

            if num_completed == num_levels {
                break;
            }

            py.allow_threads(|| {
                std::thread::sleep(Duration::from_millis(500));
            });
        }

        Ok(())
    })?;

    debug!("copying cross sections");
    let mut output = XsecResult {
        attenuation: Array2::zeros((num_freq, num_levels)),
        phase: Array2::zeros((num_freq, num_levels)),
    };
    results
        .into_iter()
        .enumerate()
        .try_for_each(|(level, result)| -> Result<_, RtError> {
            let (attenuation, phase) = result?;
            output
                .attenuation
                .index_axis_mut(Axis(1), level)
                .assign(&attenuation.index_axis(Axis(1), 0));
            output
                .phase
                .index_axis_mut(Axis(1), level)
                .assign(&phase.index_axis(Axis(1), 0));
            Ok(())
        })?;

    Ok(output)
}

/// Read a line catalogue, returning the number of lines and the ARTSCAT
/// version.
#[pyfunction]
fn read_catalogue_summary(catalogue: &str) -> PyResult<(usize, u32)> {
    let (version, lines) = load_catalogue(catalogue)?;
    Ok((lines.len(), version))
}

/// A Python module implemented in Rust.
#[pymodule]
fn atmos_rt_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(compute_xsec, m)?)?;
    m.add_function(wrap_pyfunction!(read_catalogue_summary, m)?)?;
    m.add_class::<XsecResult>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{test_lines, write_catalogue};

    #[test]
    fn errors_map_onto_python_exceptions() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let missing = read_catalogue_summary("/nonexistent/lines.cat").unwrap_err();
            assert!(missing.is_instance_of::<PyIOError>(py));

            let invalid: PyErr = RtError::InvalidArgument("stokes_dim".into()).into();
            assert!(invalid.is_instance_of::<PyValueError>(py));
            assert!(!invalid.is_instance_of::<PyIOError>(py));
        });
    }

    #[test]
    fn catalogue_summary() {
        let path = std::env::temp_dir().join(format!("atmos_rt_core_summary_{}.cat", std::process::id()));
        let lines = vec![test_lines::h2o_v4(), test_lines::h2o_v4()];
        let file = File::create(&path).unwrap();
        write_catalogue(file, SpeciesCatalog::builtin(), 4, &lines).unwrap();

        let summary = read_catalogue_summary(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();
        assert_eq!(summary.unwrap(), (2, 4));
    }
}
