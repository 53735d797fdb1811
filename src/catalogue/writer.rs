//! Writing line catalogues.
//!
//! Numbers are written with the shortest representation that reads back to
//! the same `f64`, so a write-then-read cycle is exact.

use std::io::Write;

use super::{LineFormat, LineRecord};
use crate::error::RtError;
use crate::species::SpeciesCatalog;

/// Shortest round-trip text for a number, in scientific notation for very
/// small or large magnitudes.
fn num(x: f64) -> String {
    if x == 0. || !x.is_finite() || (1e-4..1e9).contains(&x.abs()) {
        format!("{x}")
    } else {
        format!("{x:e}")
    }
}

/// Write a single entry, starting with `@` and ending with a newline.
pub fn write_line_record<W: Write>(
    mut w: W,
    catalog: &SpeciesCatalog,
    line: &LineRecord,
) -> Result<(), RtError> {
    let sr = catalog
        .get(line.species)
        .ok_or_else(|| RtError::UnknownSpecies(format!("species index {}", line.species)))?;
    let iso = sr.isotopologues.get(line.isotopologue).ok_or_else(|| {
        RtError::UnknownSpecies(format!("{} isotopologue index {}", sr.name, line.isotopologue))
    })?;

    write!(w, "@ {}-{}", sr.name, iso.name)?;

    match &line.format {
        LineFormat::Artscat3(v3) => {
            let fixed = [
                line.f, v3.psf, line.i0, line.ti0, line.elow, v3.agam, line.sgam, v3.nair,
                line.nself, v3.tgam,
            ];
            for x in fixed {
                write!(w, " {}", num(x))?;
            }
            write!(w, " {}", v3.aux.len())?;
            for &x in &v3.aux {
                write!(w, " {}", num(x))?;
            }
            let accuracies = [v3.df, v3.di0, v3.dagam, v3.dsgam, v3.dnair, v3.dnself, v3.dpsf];
            for x in accuracies {
                write!(w, " {}", num(x))?;
            }
        }
        LineFormat::Artscat4(v4) => {
            for x in [line.f, line.i0, line.ti0, line.elow, v4.a, v4.g_upper, v4.g_lower] {
                write!(w, " {}", num(x))?;
            }
            write!(w, " {}", num(line.sgam))?;
            for &x in &v4.gamma_foreign {
                write!(w, " {}", num(x))?;
            }
            write!(w, " {}", num(line.nself))?;
            for &x in v4.n_foreign.iter().chain(&v4.delta_foreign) {
                write!(w, " {}", num(x))?;
            }
            if !v4.quantum_numbers.is_empty() {
                write!(w, " {}", v4.quantum_numbers)?;
            }
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Write a complete catalogue document of the given version.
///
/// All lines must already be in that version; use
/// [`artscat4_from_artscat3`](super::artscat4_from_artscat3) to convert.
pub fn write_catalogue<W: Write>(
    mut w: W,
    catalog: &SpeciesCatalog,
    version: u32,
    lines: &[LineRecord],
) -> Result<(), RtError> {
    if !matches!(version, 3 | 4) {
        return Err(RtError::UnsupportedCatalogueVersion(version));
    }
    if let Some(other) = lines.iter().find(|l| l.version() != version) {
        return Err(RtError::InvalidArgument(format!(
            "can't write an ARTSCAT-{} line at {} Hz into an ARTSCAT-{version} catalogue",
            other.version(),
            other.f
        )));
    }

    writeln!(w, "<?xml version=\"1.0\"?>")?;
    writeln!(w, "<arts format=\"ascii\" version=\"1\">")?;
    writeln!(
        w,
        "<ArrayOfLineRecord version=\"ARTSCAT-{version}\" nelem=\"{}\">",
        lines.len()
    )?;
    for line in lines {
        write_line_record(&mut w, catalog, line)?;
    }
    writeln!(w, "</ArrayOfLineRecord>")?;
    writeln!(w, "</arts>")?;
    Ok(())
}
