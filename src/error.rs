//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Every failure the index builder, loader and classifier can report.
#[derive(Debug, Error)]
pub enum TaxError {
    /// A required construction option was not supplied.
    #[error("missing required option `{0}`")]
    Configuration(&'static str),

    /// Wrong segment count, level-tag mismatch or a gap in a lineage string.
    #[error("malformed lineage `{lineage}`: {reason}")]
    MalformedLineage { lineage: String, reason: String },

    /// An option outside its accepted range (k-mer size, step, thresholds).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A sequence symbol outside the nucleotide alphabet.
    #[error("invalid residue '{residue}' at position {pos}")]
    InvalidResidue { residue: char, pos: usize },

    /// An index file line that could not be parsed.
    #[error("corrupt index {}:{line}: {detail}", .path.display())]
    CorruptIndex {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TaxError {
    pub(crate) fn malformed(lineage: &str, reason: impl Into<String>) -> Self {
        TaxError::MalformedLineage {
            lineage: lineage.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaxError>;
