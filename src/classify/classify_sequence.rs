// src/classify/classify_sequence.rs

use std::path::PathBuf;
use std::sync::Arc;

use super::consensus::compile_consensus;
use crate::error::{Result, TaxError};
use crate::kmer::{validate_kmer_params, KmerSource};
use crate::taxdb::TaxonomyDb;
use crate::types::{Classification, Hit, Kmer, Level, TaxPath};
use ahash::AHashSet;

/// Construction options for [`Search`]. Everything except `best_only` is
/// required; `dir` and `prefix` only when the index is loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub kmer_size: Option<usize>,
    pub step_size: Option<usize>,
    pub dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub consensus: Option<f64>,
    pub coverage: Option<f64>,
    pub hits_max: Option<usize>,
    pub best_only: bool,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kmer_size(mut self, kmer_size: usize) -> Self {
        self.kmer_size = Some(kmer_size);
        self
    }

    pub fn step_size(mut self, step_size: usize) -> Self {
        self.step_size = Some(step_size);
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn consensus(mut self, consensus: f64) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn coverage(mut self, coverage: f64) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn hits_max(mut self, hits_max: usize) -> Self {
        self.hits_max = Some(hits_max);
        self
    }

    pub fn best_only(mut self, best_only: bool) -> Self {
        self.best_only = best_only;
        self
    }
}

/// Validated search parameters.
#[derive(Debug, Clone, Copy)]
struct SearchParams {
    kmer_size: usize,
    step_size: usize,
    consensus: f64,
    coverage: f64,
    hits_max: usize,
    best_only: bool,
}

/// Smallest count satisfying `count >= coverage * kmers`, never below one.
/// The product is nudged down before rounding up so that `0.07 * 100`
/// (`7.000000000000001` in binary) still asks for 7.
fn min_kmer_count(coverage: f64, kmers: usize) -> u32 {
    let exact = coverage * kmers as f64;
    (exact - 1e-9).ceil().max(1.0) as u32
}

fn check_fraction(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(TaxError::InvalidParameter(format!(
            "{name} must be in 0.0..=1.0, got {value}"
        )))
    }
}

impl SearchParams {
    /// `needs_location` adds `dir`/`prefix` to the required set, checked in
    /// declaration order so the first missing field is the one reported.
    fn from_options(options: &SearchOptions, needs_location: bool) -> Result<Self> {
        let kmer_size = options.kmer_size.ok_or(TaxError::Configuration("kmer_size"))?;
        let step_size = options.step_size.ok_or(TaxError::Configuration("step_size"))?;
        if needs_location {
            options.dir.as_ref().ok_or(TaxError::Configuration("dir"))?;
            options.prefix.as_ref().ok_or(TaxError::Configuration("prefix"))?;
        }
        let consensus = options.consensus.ok_or(TaxError::Configuration("consensus"))?;
        let coverage = options.coverage.ok_or(TaxError::Configuration("coverage"))?;
        let hits_max = options.hits_max.ok_or(TaxError::Configuration("hits_max"))?;

        validate_kmer_params(kmer_size, step_size)?;
        let consensus = check_fraction("consensus", consensus)?;
        let coverage = check_fraction("coverage", coverage)?;
        if hits_max == 0 {
            return Err(TaxError::InvalidParameter(
                "hits_max must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            kmer_size,
            step_size,
            consensus,
            coverage,
            hits_max,
            best_only: options.best_only,
        })
    }
}

/// Diagnostics emitted by [`Search::execute_traced`].
#[derive(Debug)]
pub enum TraceEvent<'a> {
    /// Hits retained at `level` (after sorting, `best_only` and `hits_max`).
    LevelScanned { level: Level, hits: &'a [Hit] },
    /// Root-first paths the consensus is computed from.
    Paths(&'a [TaxPath<'a>]),
}

/// Per-thread classifier over a shared, immutable [`TaxonomyDb`].
///
/// The counting and hit buffers are private and reset on every call, so a
/// `Search` is cheap to clone for another worker.
#[derive(Debug, Clone)]
pub struct Search {
    db: Arc<TaxonomyDb>,
    params: SearchParams,
    counts: Vec<u32>,
    hits: Vec<Hit>,
}

impl Search {
    /// Load `<dir>/<prefix>_*.dat` and build a classifier over it.
    pub fn new(options: &SearchOptions) -> Result<Self> {
        let params = SearchParams::from_options(options, true)?;
        let dir = options.dir.as_ref().ok_or(TaxError::Configuration("dir"))?;
        let prefix = options.prefix.as_deref().ok_or(TaxError::Configuration("prefix"))?;
        let db = Arc::new(TaxonomyDb::load(dir, prefix)?);
        Ok(Self::from_parts(db, params))
    }

    /// Classifier over an already loaded index; `dir`/`prefix` are ignored.
    pub fn with_db(db: Arc<TaxonomyDb>, options: &SearchOptions) -> Result<Self> {
        let params = SearchParams::from_options(options, false)?;
        Ok(Self::from_parts(db, params))
    }

    fn from_parts(db: Arc<TaxonomyDb>, params: SearchParams) -> Self {
        let slots = db.max_node_id() as usize + 1;
        Self {
            db,
            params,
            counts: vec![0; slots],
            hits: Vec::with_capacity(params.hits_max.min(slots)),
        }
    }

    pub fn db(&self) -> &Arc<TaxonomyDb> {
        &self.db
    }

    /// Classify one query sequence.
    pub fn execute<Q: KmerSource + ?Sized>(&mut self, query: &Q) -> Result<Classification> {
        self.run(query, None)
    }

    /// Like [`Search::execute`], reporting intermediate state to `trace`.
    pub fn execute_traced<Q: KmerSource + ?Sized>(
        &mut self,
        query: &Q,
        trace: &mut dyn FnMut(TraceEvent<'_>),
    ) -> Result<Classification> {
        self.run(query, Some(trace))
    }

    fn run<Q: KmerSource + ?Sized>(
        &mut self,
        query: &Q,
        mut trace: Option<&mut dyn FnMut(TraceEvent<'_>)>,
    ) -> Result<Classification> {
        let kmers = query.to_kmers(self.params.kmer_size, self.params.step_size)?;
        self.hits.clear();
        if kmers.is_empty() {
            return Ok(Classification::unclassified(0));
        }
        let min_count = min_kmer_count(self.params.coverage, kmers.len());

        // Most specific level first; stop at the first level with any hit.
        for &level in Level::ALL.iter().rev() {
            self.count_level(level, &kmers);
            self.collect_hits(min_count);
            log::debug!("level {}: {} hits", level, self.hits.len());
            if let Some(trace) = trace.as_deref_mut() {
                trace(TraceEvent::LevelScanned {
                    level,
                    hits: &self.hits,
                });
            }
            if !self.hits.is_empty() {
                break;
            }
        }

        if self.hits.is_empty() {
            return Ok(Classification::unclassified(0));
        }

        let paths: Vec<TaxPath<'_>> = self
            .hits
            .iter()
            .map(|hit| self.db.backtrack(hit.node_id))
            .collect();
        if let Some(trace) = trace.as_deref_mut() {
            trace(TraceEvent::Paths(&paths));
        }

        let taxonomy = compile_consensus(&paths, self.params.consensus);
        if taxonomy.is_empty() {
            return Ok(Classification::unclassified(paths.len()));
        }
        Ok(Classification {
            hits: paths.len(),
            taxonomy,
        })
    }

    /// Histogram of query k-mers over the nodes of one level.
    fn count_level(&mut self, level: Level, kmers: &AHashSet<Kmer>) {
        self.counts.fill(0);
        for &kmer in kmers {
            if let Some(ids) = self.db.nodes_with_kmer(level, kmer) {
                for &id in ids {
                    if let Some(slot) = self.counts.get_mut(id as usize) {
                        *slot += 1;
                    }
                }
            }
        }
    }

    /// Nodes with a count of at least `min_count` (always >= 1), highest first.
    fn collect_hits(&mut self, min_count: u32) {
        self.hits.clear();
        for (id, &count) in self.counts.iter().enumerate() {
            if count >= min_count {
                self.hits.push(Hit {
                    node_id: id as u32,
                    count,
                });
            }
        }

        if self.hits.len() > 1 {
            // Stable: equal counts stay in ascending node id order.
            self.hits.sort_by(|a, b| b.count.cmp(&a.count));
            if self.params.best_only {
                let top = self.hits[0].count;
                let run = self.hits.iter().take_while(|h| h.count == top).count();
                self.hits.truncate(run);
            }
        }
        self.hits.truncate(self.params.hits_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, IndexOptions};
    use crate::types::Sequence;
    use std::path::Path;

    fn build(dir: &Path, entries: &[(&str, &str)]) {
        let mut index = Index::new(
            IndexOptions::new()
                .kmer_size(3)
                .step_size(1)
                .output_dir(dir)
                .prefix("t"),
        )
        .unwrap();
        for &(name, seq) in entries {
            index.add(&Sequence::new(name, seq)).unwrap();
        }
        index.save().unwrap();
    }

    fn options(dir: &Path) -> SearchOptions {
        SearchOptions::new()
            .kmer_size(3)
            .step_size(1)
            .dir(dir)
            .prefix("t")
            .consensus(0.0)
            .coverage(1.0)
            .hits_max(5)
    }

    #[test]
    fn test_missing_options() {
        let full = options(Path::new("/nonexistent"));
        let cases: [(&str, fn(&mut SearchOptions)); 7] = [
            ("kmer_size", |o| o.kmer_size = None),
            ("step_size", |o| o.step_size = None),
            ("dir", |o| o.dir = None),
            ("prefix", |o| o.prefix = None),
            ("consensus", |o| o.consensus = None),
            ("coverage", |o| o.coverage = None),
            ("hits_max", |o| o.hits_max = None),
        ];
        for (field, clear) in cases {
            let mut o = full.clone();
            clear(&mut o);
            match Search::new(&o) {
                Err(TaxError::Configuration(f)) => assert_eq!(f, field),
                other => panic!("expected Configuration({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_out_of_range_options() {
        let full = options(Path::new("/nonexistent"));
        for o in [
            full.clone().consensus(1.5),
            full.clone().coverage(-0.1),
            full.clone().hits_max(0),
            full.clone().kmer_size(0),
        ] {
            assert!(matches!(Search::new(&o), Err(TaxError::InvalidParameter(_))));
        }
    }

    #[test]
    fn test_consensus_scenario() {
        let dir = tempfile::tempdir().unwrap();
        build(
            dir.path(),
            &[
                ("K#a;P#b;C#;O#;F#;G#;S#", "aaga"),
                ("K#a;P#c;C#d;O#;F#;G#;S#", "aaga"),
                ("K#a;P#c;C#d_1;O#;F#;G#;S#", "aaga"),
                ("K#a;P#c;C#d_1_2;O#;F#;G#;S#", "aaga"),
            ],
        );
        let mut search = Search::new(&options(dir.path())).unwrap();
        let result = search.execute("aaga").unwrap();
        assert_eq!(result.hits, 3);
        assert_eq!(result.taxonomy, "K#a(100);P#c(100);C#d 1 2(100/66/33)");

        // Idempotent for identical input.
        assert_eq!(search.execute("aaga").unwrap(), result);
    }

    #[test]
    fn test_unclassified() {
        let dir = tempfile::tempdir().unwrap();
        build(dir.path(), &[("K#a;P#b;C#;O#;F#;G#;S#", "aaga")]);
        let mut search = Search::new(&options(dir.path())).unwrap();

        let result = search.execute("cccc").unwrap();
        assert_eq!(result, Classification::unclassified(0));
        assert_eq!(result.taxonomy, "Unclassified");
        assert!(!result.is_classified());

        assert_eq!(search.execute("aa").unwrap(), Classification::unclassified(0));
        assert!(matches!(
            search.execute("aaxa"),
            Err(TaxError::InvalidResidue { .. })
        ));
    }

    #[test]
    fn test_falls_back_to_shallower_level() {
        let dir = tempfile::tempdir().unwrap();
        build(
            dir.path(),
            &[
                ("K#a;P#b;C#x;O#;F#;G#;S#", "aaga"),
                ("K#a;P#b;C#y;O#;F#;G#;S#", "gaga"),
            ],
        );
        let mut search = Search::new(&options(dir.path())).unwrap();
        // aag only in x, gag only in y: no class node holds both.
        let result = search.execute("aagag").unwrap();
        assert_eq!(result.hits, 1);
        assert_eq!(result.taxonomy, "K#a(100);P#b(100)");
    }

    fn three_hit_db(dir: &Path) {
        // Query "aagaga" has k-mers {aag, aga, gag}.
        build(
            dir,
            &[
                ("K#a;P#p1;C#;O#;F#;G#;S#", "aagaga"),
                ("K#a;P#p2;C#;O#;F#;G#;S#", "aagaga"),
                ("K#a;P#p3;C#;O#;F#;G#;S#", "aaga"),
            ],
        );
    }

    #[test]
    fn test_best_only() {
        let dir = tempfile::tempdir().unwrap();
        three_hit_db(dir.path());
        let opts = options(dir.path()).coverage(0.5);

        let mut events = Vec::new();
        let mut search = Search::new(&opts).unwrap();
        let result = search
            .execute_traced("aagaga", &mut |event| {
                if let TraceEvent::LevelScanned { level, hits } = event {
                    if !hits.is_empty() {
                        events.push((level, hits.to_vec()));
                    }
                }
            })
            .unwrap();
        assert_eq!(result.hits, 3);
        assert_eq!(events.len(), 1);
        let (level, hits) = &events[0];
        assert_eq!(*level, Level::Phylum);
        let counts: Vec<u32> = hits.iter().map(|h| h.count).collect();
        assert_eq!(counts, vec![3, 3, 2]);

        let mut best = Search::new(&opts.best_only(true)).unwrap();
        let result = best.execute("aagaga").unwrap();
        assert_eq!(result.hits, 2);
        assert_eq!(result.taxonomy, "K#a(100);P#p1(50)");
    }

    #[test]
    fn test_hits_max_caps_hits() {
        let dir = tempfile::tempdir().unwrap();
        three_hit_db(dir.path());
        let mut search = Search::new(&options(dir.path()).coverage(0.5).hits_max(1)).unwrap();
        let result = search.execute("aagaga").unwrap();
        assert_eq!(result.hits, 1);
        assert_eq!(result.taxonomy, "K#a(100);P#p1(100)");
    }

    #[test]
    fn test_min_kmer_count() {
        assert_eq!(min_kmer_count(0.07, 100), 7);
        assert_eq!(min_kmer_count(0.9, 10), 9);
        assert_eq!(min_kmer_count(0.91, 10), 10);
        assert_eq!(min_kmer_count(1.0, 3), 3);
        assert_eq!(min_kmer_count(0.0, 3), 1);
    }

    /// Decode a packed 4-mer back into bases (A=0, T=1, C=2, G=3).
    fn unpack4(kmer: u32) -> String {
        (0..4)
            .rev()
            .map(|i| b"ATCG"[((kmer >> (2 * i)) & 3) as usize] as char)
            .collect()
    }

    #[test]
    fn test_coverage_boundary_is_inclusive() {
        // The leaf holds 7 of the query's 100 distinct, non-overlapping 4-mers.
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::new(
            IndexOptions::new()
                .kmer_size(4)
                .step_size(4)
                .output_dir(dir.path())
                .prefix("t"),
        )
        .unwrap();
        let reference: String = (0..7).map(unpack4).collect();
        index
            .add(&Sequence::new("K#a;P#b;C#;O#;F#;G#;S#", reference))
            .unwrap();
        index.save().unwrap();

        let query: String = (0..100).map(unpack4).collect();
        let opts = options(dir.path()).kmer_size(4).step_size(4);

        let mut search = Search::new(&opts.clone().coverage(0.07)).unwrap();
        let result = search.execute(query.as_str()).unwrap();
        assert_eq!(result.hits, 1);
        assert_eq!(result.taxonomy, "K#a(100);P#b(100)");

        let mut search = Search::new(&opts.coverage(0.08)).unwrap();
        assert_eq!(
            search.execute(query.as_str()).unwrap(),
            Classification::unclassified(0)
        );
    }

    #[test]
    fn test_trace_paths() {
        let dir = tempfile::tempdir().unwrap();
        three_hit_db(dir.path());
        let mut search = Search::new(&options(dir.path())).unwrap();
        let mut leaves = Vec::new();
        search
            .execute_traced("aagaga", &mut |event| {
                if let TraceEvent::Paths(paths) = event {
                    for path in paths {
                        leaves.push(path.last().map(|n| n.name.clone()));
                    }
                }
            })
            .unwrap();
        assert_eq!(leaves, vec![Some("p1".to_string()), Some("p2".to_string())]);
    }
}
