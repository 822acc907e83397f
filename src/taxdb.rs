//src/taxdb.rs

use ahash::AHashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, TaxError};
use crate::index::{
    kmer_index_path, tax_index_path, write_kmer_row, write_node_row, KMER_TABLE_HEADER,
    NODE_TABLE_HEADER,
};
use crate::types::{Kmer, Level, NodeId, NodeRecord, TaxPath};

/// node_id -> node record
pub type NodeMap = AHashMap<NodeId, NodeRecord>;

/// kmer -> ascending node ids, for a single level
pub type LevelKmers = AHashMap<Kmer, Box<[NodeId]>>;

/// Read-only, query-time view of a saved index. Safe to share across
/// threads behind an `Arc`; every `Search` keeps its own scratch buffers.
#[derive(Debug, Default)]
pub struct TaxonomyDb {
    nodes: NodeMap,
    kmers: [LevelKmers; Level::COUNT],
    max_node_id: NodeId,
}

/// Where a line came from, for `CorruptIndex` reports.
struct LineCtx<'a> {
    path: &'a Path,
    line: usize,
}

impl LineCtx<'_> {
    fn corrupt(&self, detail: impl Into<String>) -> TaxError {
        TaxError::CorruptIndex {
            path: self.path.to_path_buf(),
            line: self.line,
            detail: detail.into(),
        }
    }

    fn parse<T: FromStr>(&self, field: &str, what: &str) -> Result<T> {
        field
            .parse()
            .map_err(|_| self.corrupt(format!("invalid {what} `{field}`")))
    }

    fn parse_opt<T: FromStr>(&self, field: &str, what: &str) -> Result<Option<T>> {
        if field.is_empty() {
            Ok(None)
        } else {
            self.parse(field, what).map(Some)
        }
    }

    fn level(&self, field: &str) -> Result<Level> {
        Level::parse(field).ok_or_else(|| self.corrupt(format!("unknown level `{field}`")))
    }
}

/// Iterate `(line number, line)` over data lines, skipping `#` headers and blanks.
fn for_each_data_line<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(&LineCtx<'_>, &str) -> Result<()>,
{
    let reader = BufReader::new(File::open(path)?);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        f(&LineCtx { path, line: i + 1 }, line)?;
    }
    Ok(())
}

impl TaxonomyDb {
    /// Load `<dir>/<prefix>_tax_index.dat` and `<dir>/<prefix>_kmer_index.dat`.
    pub fn load<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut db = TaxonomyDb::default();
        db.read_node_table(&tax_index_path(dir, prefix))?;
        db.read_kmer_table(&kmer_index_path(dir, prefix))?;

        log::info!(
            "Loaded taxonomy index `{}` with {} nodes and {} k-mer entries",
            prefix,
            db.node_count(),
            db.kmers.iter().map(|m| m.len()).sum::<usize>()
        );
        Ok(db)
    }

    /// Parses lines of the form:
    /// ```text
    /// <seq_id>\t<node_id>\t<level>\t<name>\t<parent_id>
    /// ```
    ///
    /// Node ids must be unique and dense (`0..node_count`).
    fn read_node_table(&mut self, path: &Path) -> Result<()> {
        let mut max_line = 0;
        for_each_data_line(path, |ctx, line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 5 {
                return Err(ctx.corrupt(format!("expected 5 fields, found {}", fields.len())));
            }
            let record = NodeRecord {
                seq_id: ctx.parse_opt(fields[0], "seq id")?,
                node_id: ctx.parse(fields[1], "node id")?,
                level: ctx.level(fields[2])?,
                name: fields[3].to_string(),
                parent_id: ctx.parse_opt(fields[4], "parent id")?,
            };
            if self.nodes.contains_key(&record.node_id) {
                return Err(ctx.corrupt(format!("duplicate node id {}", record.node_id)));
            }
            if record.node_id >= self.max_node_id {
                self.max_node_id = record.node_id;
                max_line = ctx.line;
            }
            self.nodes.insert(record.node_id, record);
            Ok(())
        })?;

        if self.max_node_id as usize >= self.nodes.len().max(1) {
            return Err(TaxError::CorruptIndex {
                path: path.to_path_buf(),
                line: max_line,
                detail: format!(
                    "node id {} out of range for {} nodes",
                    self.max_node_id,
                    self.nodes.len()
                ),
            });
        }
        Ok(())
    }

    /// Parses lines of the form:
    /// ```text
    /// <level>\t<kmer>\t<node_id>;<node_id>;...
    /// ```
    fn read_kmer_table(&mut self, path: &Path) -> Result<()> {
        for_each_data_line(path, |ctx, line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 3 {
                return Err(ctx.corrupt(format!("expected 3 fields, found {}", fields.len())));
            }
            let level = ctx.level(fields[0])?;
            let kmer: Kmer = ctx.parse(fields[1], "k-mer")?;
            let ids = fields[2]
                .split(';')
                .map(|id| ctx.parse::<NodeId>(id, "node id"))
                .collect::<Result<Vec<_>>>()?;
            if let Some(id) = ids.iter().find(|&&id| !self.nodes.contains_key(&id)) {
                return Err(ctx.corrupt(format!("unknown node id {id}")));
            }
            self.kmers[level.depth()].insert(kmer, ids.into_boxed_slice());
            Ok(())
        })
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&node_id)
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Highest node id in the node table; sizes the counting buffers.
    pub fn max_node_id(&self) -> NodeId {
        self.max_node_id
    }

    /// Node ids at `level` whose subtree contains `kmer`.
    #[inline]
    pub fn nodes_with_kmer(&self, level: Level, kmer: Kmer) -> Option<&[NodeId]> {
        self.kmers[level.depth()].get(&kmer).map(|ids| &ids[..])
    }

    pub fn kmer_count(&self, level: Level) -> usize {
        self.kmers[level.depth()].len()
    }

    /// Follow `parent_id` from `node_id` up to the root and return the chain
    /// root first. Stops early at a dangling parent; never walks more than
    /// `Level::COUNT` steps.
    pub fn backtrack(&self, node_id: NodeId) -> TaxPath<'_> {
        let mut path = Vec::with_capacity(Level::COUNT);
        let mut cursor = self.nodes.get(&node_id);
        while let Some(node) = cursor {
            path.push(node);
            if path.len() >= Level::COUNT {
                break;
            }
            cursor = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        path.reverse();
        path
    }

    /// Write the tables back out in the same layout `Index::save` produces.
    pub fn save<P: AsRef<Path>>(&self, dir: P, prefix: &str) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut w = BufWriter::new(File::create(tax_index_path(dir, prefix))?);
        writeln!(w, "{NODE_TABLE_HEADER}")?;
        for id in self.preorder() {
            if let Some(n) = self.nodes.get(&id) {
                write_node_row(&mut w, n.seq_id, n.node_id, n.level, &n.name, n.parent_id)?;
            }
        }
        w.flush()?;

        let mut w = BufWriter::new(File::create(kmer_index_path(dir, prefix))?);
        writeln!(w, "{KMER_TABLE_HEADER}")?;
        for level in Level::ALL {
            let level_kmers = &self.kmers[level.depth()];
            let mut keys: Vec<Kmer> = level_kmers.keys().copied().collect();
            keys.sort_unstable();
            for kmer in keys {
                write_kmer_row(&mut w, level, kmer, &level_kmers[&kmer])?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Depth-first pre-order from every parentless node, siblings by
    /// ascending id (which is their creation order).
    fn preorder(&self) -> Vec<NodeId> {
        let mut children: AHashMap<NodeId, Vec<NodeId>> = AHashMap::new();
        let mut roots = Vec::new();
        for node in self.nodes.values() {
            match node.parent_id {
                Some(p) if p != node.node_id => children.entry(p).or_default().push(node.node_id),
                _ => roots.push(node.node_id),
            }
        }
        for ids in children.values_mut() {
            ids.sort_unstable_by(|a, b| b.cmp(a));
        }
        roots.sort_unstable_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = roots;
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(kids) = children.get(&id) {
                stack.extend(kids.iter().copied());
            }
        }
        order
    }
}
