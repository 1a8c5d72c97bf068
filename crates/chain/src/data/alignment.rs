//! Sequence alignments and the taxon set they define.
//!
//! Two input layouts are read: FASTA (records introduced by `>`, read with
//! needletail) and sequential PHYLIP (a `n_taxa n_site` header line followed by one
//! `name sequence` record per taxon, sequences possibly wrapped).

use crate::base::{Alphabet, UNKNOWN};
use crate::errors::DataError;
use needletail::errors::ParseError;
use needletail::parse_fastx_reader;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Ordered, immutable list of taxon names.
///
/// Leaf `i` of every tree refers to taxon `i` of this set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonSet {
    /// Build a taxon set, rejecting duplicate or empty names.
    pub fn new(names: Vec<String>) -> Result<Self, DataError> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(DataError::Alignment(format!(
                    "invalid taxon name '{name}'"
                )));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(DataError::Alignment(format!("duplicate taxon '{name}'")));
            }
        }
        Ok(Self { names, index })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, taxon: usize) -> &str {
        &self.names[taxon]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of a taxon by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Taxa × sites matrix of state indices.
#[derive(Debug, Clone)]
pub struct SequenceAlignment {
    taxa: Arc<TaxonSet>,
    alphabet: Alphabet,
    /// Row-major: `rows[taxon][site]`.
    rows: Vec<Vec<u8>>,
}

impl SequenceAlignment {
    /// Read an alignment file, detecting FASTA or PHYLIP from its first
    /// non-blank character.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse alignment text with the alphabet detected from its content.
    pub fn parse(text: &str) -> Result<Self, DataError> {
        let records = parse_records(text)?;
        let alphabet = Alphabet::detect(records.iter().map(|(_, seq)| seq.as_slice()));
        Self::from_records(records, alphabet)
    }

    /// Parse alignment text with a known alphabet.
    pub fn parse_with_alphabet(text: &str, alphabet: Alphabet) -> Result<Self, DataError> {
        Self::from_records(parse_records(text)?, alphabet)
    }

    fn from_records(records: Vec<(String, Vec<u8>)>, alphabet: Alphabet) -> Result<Self, DataError> {
        let n_site = records[0].1.len();
        let mut names = Vec::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        for (name, raw) in records {
            if raw.len() != n_site {
                return Err(DataError::Alignment(format!(
                    "sequence '{name}' has {} sites, expected {n_site}",
                    raw.len()
                )));
            }
            let row = raw
                .iter()
                .map(|&b| {
                    alphabet.encode(b).ok_or_else(|| {
                        DataError::Alignment(format!(
                            "invalid {alphabet} character '{}' in '{name}'",
                            b as char
                        ))
                    })
                })
                .collect::<Result<Vec<u8>, _>>()?;
            names.push(name);
            rows.push(row);
        }
        Ok(Self {
            taxa: Arc::new(TaxonSet::new(names)?),
            alphabet,
            rows,
        })
    }

    /// Reorder the rows to follow `taxa`, which must name exactly the same
    /// taxa. Used for test alignments scored against a training chain.
    pub fn aligned_to(self, taxa: &Arc<TaxonSet>) -> Result<Self, DataError> {
        if taxa.len() != self.taxa.len() {
            return Err(DataError::TaxonMismatch(format!(
                "{} taxa, expected {}",
                self.taxa.len(),
                taxa.len()
            )));
        }
        let mut rows = Vec::with_capacity(taxa.len());
        for name in taxa.names() {
            let i = self
                .taxa
                .index_of(name)
                .ok_or_else(|| DataError::TaxonMismatch(format!("taxon '{name}' is missing")))?;
            rows.push(self.rows[i].clone());
        }
        Ok(Self {
            taxa: Arc::clone(taxa),
            alphabet: self.alphabet,
            rows,
        })
    }

    /// Drop every column whose known states are all identical, including
    /// columns with no known state at all. Returns the number of columns
    /// removed.
    pub fn remove_constant_sites(&mut self) -> usize {
        let n_site = self.n_site();
        let keep: Vec<bool> = (0..n_site).map(|site| !self.is_constant(site)).collect();
        let removed = keep.iter().filter(|&&k| !k).count();
        if removed > 0 {
            for row in &mut self.rows {
                let mut site = 0;
                row.retain(|_| {
                    let k = keep[site];
                    site += 1;
                    k
                });
            }
        }
        removed
    }

    /// Whether the column at `site` carries at most one distinct known state.
    pub fn is_constant(&self, site: usize) -> bool {
        let mut seen = UNKNOWN;
        for row in &self.rows {
            let s = row[site];
            if s == UNKNOWN {
                continue;
            }
            if seen == UNKNOWN {
                seen = s;
            } else if seen != s {
                return false;
            }
        }
        true
    }

    /// Observed state frequencies over all known characters, with one
    /// pseudo-count per state.
    pub fn empirical_frequencies(&self) -> Vec<f64> {
        let mut counts = vec![1.0; self.n_states()];
        for &s in self.rows.iter().flatten() {
            if s != UNKNOWN {
                counts[s as usize] += 1.0;
            }
        }
        let total: f64 = counts.iter().sum();
        counts.iter().map(|c| c / total).collect()
    }

    #[inline]
    pub fn state(&self, taxon: usize, site: usize) -> u8 {
        self.rows[taxon][site]
    }

    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn n_site(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn n_states(&self) -> usize {
        self.alphabet.n_states()
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn taxa(&self) -> &Arc<TaxonSet> {
        &self.taxa
    }
}

fn parse_records(text: &str) -> Result<Vec<(String, Vec<u8>)>, DataError> {
    let first = text.trim_start().chars().next();
    let records = match first {
        Some('>') => parse_fasta(text)?,
        Some(_) => parse_phylip(text)?,
        None => return Err(DataError::Alignment("empty alignment".to_string())),
    };
    if records.is_empty() {
        return Err(DataError::Alignment("no sequences found".to_string()));
    }
    if records[0].1.is_empty() {
        return Err(DataError::Alignment("alignment has no sites".to_string()));
    }
    Ok(records)
}

fn parse_fasta(text: &str) -> Result<Vec<(String, Vec<u8>)>, DataError> {
    let fasta_error = |e: ParseError| DataError::Alignment(e.to_string());
    let bytes = text.trim_start().as_bytes().to_vec();
    let mut reader = parse_fastx_reader(Cursor::new(bytes)).map_err(fasta_error)?;
    let mut records = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(fasta_error)?;
        let header = String::from_utf8_lossy(record.id()).into_owned();
        let name = header
            .split_whitespace()
            .next()
            .ok_or_else(|| DataError::Alignment("empty FASTA header".to_string()))?
            .to_string();
        let seq = record
            .seq()
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        records.push((name, seq));
    }
    Ok(records)
}

fn parse_phylip(text: &str) -> Result<Vec<(String, Vec<u8>)>, DataError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| DataError::Alignment("missing PHYLIP header".to_string()))?;
    let mut fields = header.split_whitespace();
    let mut dimension = |what: &str| -> Result<usize, DataError> {
        fields
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| DataError::Alignment(format!("PHYLIP header lacks {what}")))
    };
    let n_taxa = dimension("the taxon count")?;
    let n_site = dimension("the site count")?;

    let mut records: Vec<(String, Vec<u8>)> = Vec::with_capacity(n_taxa);
    for line in lines {
        let filling = records.last().is_some_and(|(_, seq)| seq.len() < n_site);
        if filling {
            if let Some((_, seq)) = records.last_mut() {
                seq.extend(line.bytes().filter(|b| !b.is_ascii_whitespace()));
            }
            continue;
        }
        if records.len() == n_taxa {
            return Err(DataError::Alignment(format!(
                "more than {n_taxa} PHYLIP records"
            )));
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_string();
        let seq = parts
            .next()
            .unwrap_or_default()
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        records.push((name, seq));
    }
    if records.len() != n_taxa {
        return Err(DataError::Alignment(format!(
            "PHYLIP header announces {n_taxa} taxa, found {}",
            records.len()
        )));
    }
    Ok(records)
}
