//src/index.rs

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaxError};
use crate::kmer::{validate_kmer_params, KmerSource};
use crate::taxtree::{parse_lineage, TaxTree, ROOT_ID};
use crate::types::{Kmer, LabeledSequence, Level, NodeId};

pub const NODE_TABLE_HEADER: &str = "#SEQ_ID\tNODE_ID\tLEVEL\tNAME\tPARENT_ID";
pub const KMER_TABLE_HEADER: &str = "#LEVEL\tKMER\tNODES";

/// `<dir>/<prefix>_tax_index.dat`
pub fn tax_index_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_tax_index.dat"))
}

/// `<dir>/<prefix>_kmer_index.dat`
pub fn kmer_index_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_kmer_index.dat"))
}

/// Construction options for [`Index`]. All four fields are required.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub kmer_size: Option<usize>,
    pub step_size: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub prefix: Option<String>,
}

impl IndexOptions {
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

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Incrementally built taxonomy index. Single-threaded: `add` mutates the tree.
#[derive(Debug)]
pub struct Index {
    kmer_size: usize,
    step_size: usize,
    output_dir: PathBuf,
    prefix: String,
    tree: TaxTree,
    seq_count: u32,
}

impl Index {
    pub fn new(options: IndexOptions) -> Result<Self> {
        let kmer_size = options.kmer_size.ok_or(TaxError::Configuration("kmer_size"))?;
        let step_size = options.step_size.ok_or(TaxError::Configuration("step_size"))?;
        let output_dir = options.output_dir.ok_or(TaxError::Configuration("output_dir"))?;
        let prefix = options.prefix.ok_or(TaxError::Configuration("prefix"))?;
        validate_kmer_params(kmer_size, step_size)?;

        Ok(Self {
            kmer_size,
            step_size,
            output_dir,
            prefix,
            tree: TaxTree::new(),
            seq_count: 0,
        })
    }

    pub fn tree(&self) -> &TaxTree {
        &self.tree
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    pub fn sequence_count(&self) -> u32 {
        self.seq_count
    }

    pub fn tax_index_path(&self) -> PathBuf {
        tax_index_path(&self.output_dir, &self.prefix)
    }

    pub fn kmer_index_path(&self) -> PathBuf {
        kmer_index_path(&self.output_dir, &self.prefix)
    }

    /// Add one labeled sequence. Nothing is modified unless both the lineage
    /// and the sequence are valid. Returns the id of the lineage's deepest node.
    pub fn add<S>(&mut self, sequence: &S) -> Result<NodeId>
    where
        S: LabeledSequence + KmerSource + ?Sized,
    {
        let path = parse_lineage(sequence.lineage())?;
        let kmers = sequence.to_kmers(self.kmer_size, self.step_size)?;
        let leaf = self.tree.insert_path(&path, self.seq_count, kmers);
        self.seq_count += 1;
        Ok(leaf)
    }

    /// Propagate k-mer sets so each ancestor covers its whole subtree.
    pub fn tree_union(&mut self) {
        self.tree.tree_union();
    }

    /// Union the tree, then write the node and k-mer tables.
    pub fn save(&mut self) -> Result<()> {
        self.tree_union();
        fs::create_dir_all(&self.output_dir)?;

        let tax_path = self.tax_index_path();
        let mut writer = BufWriter::new(File::create(&tax_path)?);
        self.write_node_table(&mut writer)?;
        writer.flush()?;

        let kmer_path = self.kmer_index_path();
        let mut writer = BufWriter::new(File::create(&kmer_path)?);
        let rows = self.write_kmer_table(&mut writer)?;
        writer.flush()?;

        log::info!(
            "Saved index with {} nodes from {} sequences ({} k-mer rows) to {}",
            self.tree.node_count(),
            self.seq_count,
            rows,
            self.output_dir.display()
        );
        Ok(())
    }

    fn write_node_table<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{NODE_TABLE_HEADER}")?;
        for id in self.tree.preorder() {
            if let Some(node) = self.tree.node(id) {
                write_node_row(w, node.seq_id, node.node_id, node.level, &node.name, node.parent)?;
            }
        }
        Ok(())
    }

    /// Breadth-first, one level at a time: only the current level's
    /// k-mer -> nodes map is ever held.
    fn write_kmer_table<W: Write>(&self, w: &mut W) -> Result<usize> {
        writeln!(w, "{KMER_TABLE_HEADER}")?;
        let mut rows = 0;
        let mut frontier = vec![ROOT_ID];
        let mut depth = 0;

        while !frontier.is_empty() {
            let Some(level) = Level::from_depth(depth) else {
                break;
            };

            let mut level_index: BTreeMap<Kmer, Vec<NodeId>> = BTreeMap::new();
            for &id in &frontier {
                if let Some(node) = self.tree.node(id) {
                    for &kmer in &node.kmers {
                        level_index.entry(kmer).or_default().push(id);
                    }
                }
            }
            for ids in level_index.values_mut() {
                ids.sort_unstable();
            }
            for (&kmer, ids) in &level_index {
                write_kmer_row(w, level, kmer, ids)?;
            }
            rows += level_index.len();
            log::debug!(
                "level {}: {} nodes, {} k-mers",
                level,
                frontier.len(),
                level_index.len()
            );

            frontier = frontier
                .iter()
                .filter_map(|&id| self.tree.node(id))
                .flat_map(|node| node.children().iter().copied())
                .collect();
            depth += 1;
        }
        Ok(rows)
    }
}

/// `seq_id, node_id, level, name, parent_id`; absent ids are written empty.
pub(crate) fn write_node_row<W: Write>(
    w: &mut W,
    seq_id: Option<u32>,
    node_id: NodeId,
    level: Level,
    name: &str,
    parent_id: Option<NodeId>,
) -> std::io::Result<()> {
    let seq_id = seq_id.map(|s| s.to_string()).unwrap_or_default();
    let parent_id = parent_id.map(|p| p.to_string()).unwrap_or_default();
    writeln!(w, "{seq_id}\t{node_id}\t{level}\t{name}\t{parent_id}")
}

/// `level, kmer, node ids` with the ids `;`-joined in the order given.
pub(crate) fn write_kmer_row<W: Write>(
    w: &mut W,
    level: Level,
    kmer: Kmer,
    node_ids: &[NodeId],
) -> std::io::Result<()> {
    write!(w, "{level}\t{kmer}\t")?;
    for (i, id) in node_ids.iter().enumerate() {
        if i > 0 {
            w.write_all(b";")?;
        }
        write!(w, "{id}")?;
    }
    writeln!(w)
}
