// src/lib.rs
pub mod classify;
pub mod error;
pub mod fastx;
pub mod index;
pub mod kmer;
pub mod taxdb;
pub mod taxtree;
pub mod types;

use std::fmt::Write as FmtWrite;
use std::path::PathBuf;
use std::sync::Arc;

pub use crate::classify::{classify_reads_parallel, Search, SearchOptions, TraceEvent};
pub use crate::error::{Result, TaxError};
pub use crate::index::{Index, IndexOptions};
pub use crate::kmer::{KmerIter, KmerSource};
pub use crate::taxdb::TaxonomyDb;
pub use crate::types::{Classification, Hit, LabeledSequence, Level, NodeRecord, Sequence, TaxPath};

use crate::fastx::read_fastx_records;

/// Outcome of building an index from sequence files.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Sequences added to the index.
    pub added: usize,
    /// Records rejected for a malformed lineage or invalid residue
    /// (only populated when skipping was requested).
    pub skipped: Vec<(String, String)>,
    /// Nodes in the saved tree, root included.
    pub nodes: usize,
}

/// Read labeled FASTA/FASTQ files, add every record to a new index and save it.
///
/// With `skip_invalid`, records failing lineage or residue validation are
/// logged and reported in the summary instead of aborting the build.
pub fn build_index(
    options: IndexOptions,
    input_paths: &[PathBuf],
    skip_invalid: bool,
) -> Result<BuildSummary> {
    let mut index = Index::new(options)?;
    let mut summary = BuildSummary::default();

    for path in input_paths {
        let records = read_fastx_records(path)?;
        log::info!("Indexing {} records from {}", records.len(), path.display());
        for record in &records {
            match index.add(record) {
                Ok(_) => summary.added += 1,
                Err(e @ (TaxError::MalformedLineage { .. } | TaxError::InvalidResidue { .. }))
                    if skip_invalid =>
                {
                    log::warn!("Skipping `{}`: {}", record.name, e);
                    summary.skipped.push((record.name.clone(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    index.save()?;
    summary.nodes = index.node_count();
    Ok(summary)
}

/// Classified queries, with text generated on demand.
pub struct ClassificationResults {
    pub queries: Vec<Sequence>,
    /// One entry per query, same order.
    pub classifications: Vec<Classification>,
}

impl ClassificationResults {
    pub fn classified_count(&self) -> usize {
        self.classifications.iter().filter(|c| c.is_classified()).count()
    }

    /// Tab-separated `id, hits, taxonomy` with a header row.
    pub fn get_output(&self) -> String {
        let mut output = String::new();
        output.push_str("#SEQ_NAME\tTAXONOMY_HITS\tTAXONOMY\n");
        for (query, result) in self.queries.iter().zip(&self.classifications) {
            let _ = writeln!(output, "{}\t{}\t{}", query.id(), result.hits, result.taxonomy);
        }
        output
    }
}

/// Load the index named by `options` and classify every record of the
/// given FASTA/FASTQ files in parallel.
pub fn classify_files(
    options: &SearchOptions,
    query_paths: &[PathBuf],
) -> Result<ClassificationResults> {
    // Validates every option and loads the index once.
    let search = Search::new(options)?;
    let db = Arc::clone(search.db());

    let mut queries = Vec::new();
    for path in query_paths {
        queries.extend(read_fastx_records(path)?);
    }

    let classifications = classify_reads_parallel(db, options, &queries)?;
    Ok(ClassificationResults {
        queries,
        classifications,
    })
}
