//! Reading ARTSCAT-3 and ARTSCAT-4 line catalogues.

use std::io::{BufRead, Lines};

use log::debug;
use smallvec::SmallVec;

use super::{Artscat3Fields, Artscat4Fields, LineFormat, LineRecord, N_BROADENING_SPECIES};
use crate::error::RtError;
use crate::species::SpeciesCatalog;

/// Fields up to and including N_AUX in an ARTSCAT-3 entry, not counting `@`
const V3_FIXED_FIELDS: usize = 12;
/// Optional accuracy fields at the end of an ARTSCAT-3 entry
const V3_ACCURACY_FIELDS: usize = 7;
/// Required fields of an ARTSCAT-4 entry, not counting `@`
const V4_FIELDS: usize = 9 + 1 + 3 * N_BROADENING_SPECIES;

/// Reads line records one at a time from a catalogue stream.
#[derive(Debug)]
pub struct CatalogueReader<'a, R> {
    lines: Lines<R>,
    catalog: &'a SpeciesCatalog,
    version: u32,
    /// Number of entries announced by the document header
    nelem: Option<usize>,
    /// Physical line number of the last line read
    line_no: usize,
    /// An entry start that was read while completing the previous entry
    pending: Option<(usize, String)>,
    /// The closing tag was seen
    finished: bool,
}

impl<'a, R: BufRead> CatalogueReader<'a, R> {
    /// Read entries of the given version from a stream without a document
    /// header.
    pub fn new(reader: R, catalog: &'a SpeciesCatalog, version: u32) -> Result<Self, RtError> {
        if !matches!(version, 3 | 4) {
            return Err(RtError::UnsupportedCatalogueVersion(version));
        }
        Ok(Self {
            lines: reader.lines(),
            catalog,
            version,
            nelem: None,
            line_no: 0,
            pending: None,
            finished: false,
        })
    }

    /// Read a full catalogue document, taking the version from the
    /// `ArrayOfLineRecord` header.
    pub fn from_document(reader: R, catalog: &'a SpeciesCatalog) -> Result<Self, RtError> {
        // Version is checked below once the header is found
        let mut this = Self::new(reader, catalog, 3)?;

        let header = loop {
            match this.next_line()? {
                Some(line) if line.trim_start().starts_with("<ArrayOfLineRecord") => break line,
                Some(_) => {}
                None => {
                    return Err(RtError::malformed(
                        this.line_no,
                        "missing <ArrayOfLineRecord> header",
                    ))
                }
            }
        };

        let version = attribute(&header, "version")
            .and_then(|v| v.strip_prefix("ARTSCAT-"))
            .ok_or_else(|| RtError::malformed(this.line_no, "header has no ARTSCAT version"))?;
        this.version = version
            .parse()
            .map_err(|_| RtError::malformed(this.line_no, format!("bad version ARTSCAT-{version}")))?;
        if !matches!(this.version, 3 | 4) {
            return Err(RtError::UnsupportedCatalogueVersion(this.version));
        }

        this.nelem = attribute(&header, "nelem")
            .map(|n| {
                n.parse()
                    .map_err(|_| RtError::malformed(this.line_no, format!("bad nelem \"{n}\"")))
            })
            .transpose()?;

        debug!(
            "catalogue header: ARTSCAT-{}, {:?} entries",
            this.version, this.nelem
        );
        Ok(this)
    }

    /// Catalogue format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of entries announced by the header, if any.
    pub fn nelem(&self) -> Option<usize> {
        self.nelem
    }

    fn next_line(&mut self) -> Result<Option<String>, RtError> {
        match self.lines.next() {
            Some(line) => {
                self.line_no += 1;
                Ok(Some(line?))
            }
            None => Ok(None),
        }
    }

    /// Read the next entry, or `None` at the end of the stream.
    ///
    /// Lines before an entry that don't start with `@` are skipped as
    /// comments. An entry continues over the following physical lines until
    /// all its required fields are read.
    pub fn read_next_entry(&mut self) -> Result<Option<LineRecord>, RtError> {
        if self.finished {
            return Ok(None);
        }

        let (start, text) = match self.pending.take() {
            Some(pending) => pending,
            None => loop {
                let Some(line) = self.next_line()? else {
                    return Ok(None);
                };
                let trimmed = line.trim_start();
                if trimmed.starts_with('@') {
                    break (self.line_no, line);
                }
                if trimmed.starts_with("</") {
                    self.finished = true;
                    return Ok(None);
                }
            },
        };

        let body = text.trim_start().trim_start_matches('@');
        let mut tokens: Vec<String> = body.split_whitespace().map(str::to_string).collect();

        let line = match self.version {
            3 => self.parse_artscat3(start, &mut tokens)?,
            _ => self.parse_artscat4(start, &mut tokens)?,
        };
        Ok(Some(line))
    }

    /// Pull further physical lines until `tokens` holds `needed` fields.
    fn fill(&mut self, start: usize, tokens: &mut Vec<String>, needed: usize) -> Result<(), RtError> {
        while tokens.len() < needed {
            let line = self.next_line()?;
            let ends_entry = match &line {
                None => true,
                Some(l) => {
                    let t = l.trim_start();
                    t.starts_with('@') || t.starts_with('<')
                }
            };
            if ends_entry {
                if let Some(l) = line {
                    if l.trim_start().starts_with('@') {
                        self.pending = Some((self.line_no, l));
                    } else {
                        self.finished = true;
                    }
                }
                return Err(RtError::malformed(
                    start,
                    format!("entry has {} fields, at least {needed} are required", tokens.len()),
                ));
            }
            if let Some(l) = line {
                tokens.extend(l.split_whitespace().map(str::to_string));
            }
        }
        Ok(())
    }

    fn species(&self, start: usize, tokens: &[String]) -> Result<(usize, usize), RtError> {
        let name = tokens
            .first()
            .ok_or_else(|| RtError::malformed(start, "missing species tag"))?;
        self.catalog.lookup(name)
    }

    fn parse_artscat3(&mut self, start: usize, tokens: &mut Vec<String>) -> Result<LineRecord, RtError> {
        self.fill(start, tokens, V3_FIXED_FIELDS)?;
        let (species, isotopologue) = self.species(start, tokens)?;

        let naux_field = &tokens[V3_FIXED_FIELDS - 1];
        let naux: usize = naux_field
            .parse()
            .map_err(|_| RtError::malformed(start, format!("N_AUX \"{naux_field}\" is not a count")))?;
        self.fill(start, tokens, V3_FIXED_FIELDS + naux)?;

        let tokens: &[String] = tokens;
        let get = |i: usize, label: &str| number(tokens, i, start, label);
        let aux = (0..naux)
            .map(|k| get(V3_FIXED_FIELDS + k, "AUX"))
            .collect::<Result<SmallVec<[f64; 4]>, _>>()?;

        // Accuracies are optional, taken only from the lines already read
        let first_acc = V3_FIXED_FIELDS + naux;
        let n_acc = tokens.len() - first_acc;
        if n_acc > V3_ACCURACY_FIELDS {
            return Err(RtError::malformed(
                start,
                format!("{} fields after the auxiliary parameters, at most {V3_ACCURACY_FIELDS} allowed", n_acc),
            ));
        }
        let mut acc = [-1.; V3_ACCURACY_FIELDS];
        for (k, a) in acc.iter_mut().enumerate().take(n_acc) {
            *a = get(first_acc + k, "accuracy")?;
        }

        Ok(LineRecord {
            species,
            isotopologue,
            f: get(1, "F")?,
            i0: get(3, "I0")?,
            ti0: get(4, "T_I0")?,
            elow: get(5, "ELOW")?,
            sgam: get(7, "SGAM")?,
            nself: get(9, "NSELF")?,
            format: LineFormat::Artscat3(Artscat3Fields {
                psf: get(2, "PSF")?,
                agam: get(6, "AGAM")?,
                nair: get(8, "NAIR")?,
                tgam: get(10, "T_GAM")?,
                aux,
                df: acc[0],
                di0: acc[1],
                dagam: acc[2],
                dsgam: acc[3],
                dnair: acc[4],
                dnself: acc[5],
                dpsf: acc[6],
            }),
        })
    }

    fn parse_artscat4(&mut self, start: usize, tokens: &mut Vec<String>) -> Result<LineRecord, RtError> {
        self.fill(start, tokens, V4_FIELDS)?;
        let (species, isotopologue) = self.species(start, tokens)?;

        let tokens: &[String] = tokens;
        let get = |i: usize, label: &str| number(tokens, i, start, label);
        let six = |first: usize, label: &str| -> Result<[f64; N_BROADENING_SPECIES], RtError> {
            let mut out = [0.; N_BROADENING_SPECIES];
            for (k, o) in out.iter_mut().enumerate() {
                *o = get(first + k, label)?;
            }
            Ok(out)
        };

        Ok(LineRecord {
            species,
            isotopologue,
            f: get(1, "F")?,
            i0: get(2, "I0")?,
            ti0: get(3, "T_I0")?,
            elow: get(4, "ELOW")?,
            sgam: get(8, "GAMMA_self")?,
            nself: get(15, "N_self")?,
            format: LineFormat::Artscat4(Artscat4Fields {
                a: get(5, "A")?,
                g_upper: get(6, "G_upper")?,
                g_lower: get(7, "G_lower")?,
                gamma_foreign: six(9, "GAMMA")?,
                n_foreign: six(16, "N")?,
                delta_foreign: six(22, "DELTA")?,
                quantum_numbers: tokens[V4_FIELDS..].join(" "),
            }),
        })
    }
}

/// Parse field `i` as a number.
fn number(tokens: &[String], i: usize, line: usize, label: &str) -> Result<f64, RtError> {
    let field = tokens
        .get(i)
        .ok_or_else(|| RtError::malformed(line, format!("missing field {label}")))?;
    field
        .parse()
        .map_err(|_| RtError::malformed(line, format!("field {label} \"{field}\" is not a number")))
}

/// Value of `name="..."` in a tag.
fn attribute<'s>(tag: &'s str, name: &str) -> Option<&'s str> {
    let key = format!(" {name}=\"");
    let start = tag.find(&key)? + key.len();
    let len = tag[start..].find('"')?;
    Some(&tag[start..start + len])
}

/// Read a complete catalogue document, returning its version and lines.
///
/// The number of entries must match the header's `nelem`, if present.
pub fn read_catalogue<R: BufRead>(
    reader: R,
    catalog: &SpeciesCatalog,
) -> Result<(u32, Vec<LineRecord>), RtError> {
    let mut reader = CatalogueReader::from_document(reader, catalog)?;
    let mut lines = Vec::new();
    while let Some(line) = reader.read_next_entry()? {
        lines.push(line);
    }

    if let Some(nelem) = reader.nelem() {
        if nelem != lines.len() {
            return Err(RtError::malformed(
                reader.line_no,
                format!("header announces {nelem} lines, {} were read", lines.len()),
            ));
        }
    }
    debug!("read {} ARTSCAT-{} lines", lines.len(), reader.version());
    Ok((reader.version(), lines))
}
