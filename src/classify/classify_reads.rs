use rayon::prelude::*;
use std::sync::Arc;

use super::classify_sequence::{Search, SearchOptions};
use crate::error::Result;
use crate::kmer::KmerSource;
use crate::taxdb::TaxonomyDb;
use crate::types::Classification;

/// Parallel classification of many queries against one shared index.
///
/// Each rayon worker gets its own `Search` (cloned from a validated
/// prototype), so the counting buffers are never shared; the `TaxonomyDb`
/// itself is only read. Results come back in input order. The first failing
/// query aborts the batch with its error.
pub fn classify_reads_parallel<Q>(
    db: Arc<TaxonomyDb>,
    options: &SearchOptions,
    queries: &[Q],
) -> Result<Vec<Classification>>
where
    Q: KmerSource + Sync,
{
    let prototype = Search::with_db(db, options)?;
    queries
        .par_iter()
        .map_init(|| prototype.clone(), |search, query| search.execute(query))
        .collect()
}
