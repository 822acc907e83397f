//src/types.rs

use std::fmt;

/// Packed k-mer value (2 bits per base, at most 12 bases).
pub type Kmer = u32;

/// Dense node identifier; the root is always `0`.
pub type NodeId = u32;

/// The eight fixed taxonomic ranks, from the synthetic root down to species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Root = 0,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Level {
    pub const COUNT: usize = 8;

    pub const ALL: [Level; Level::COUNT] = [
        Level::Root,
        Level::Kingdom,
        Level::Phylum,
        Level::Class,
        Level::Order,
        Level::Family,
        Level::Genus,
        Level::Species,
    ];

    /// Depth in the tree (root = 0).
    #[inline]
    pub fn depth(self) -> usize {
        self as usize
    }

    pub fn from_depth(depth: usize) -> Option<Level> {
        Level::ALL.get(depth).copied()
    }

    /// Lowercase code used in the index files (`r`, `k`, `p`, ...).
    pub fn code(self) -> char {
        match self {
            Level::Root => 'r',
            Level::Kingdom => 'k',
            Level::Phylum => 'p',
            Level::Class => 'c',
            Level::Order => 'o',
            Level::Family => 'f',
            Level::Genus => 'g',
            Level::Species => 's',
        }
    }

    /// Uppercase tag used in lineage strings and consensus output.
    pub fn tag(self) -> char {
        self.code().to_ascii_uppercase()
    }

    /// Parse a single-letter level tag, ignoring case.
    pub fn parse(tag: &str) -> Option<Level> {
        let mut chars = tag.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.code() == c.to_ascii_lowercase())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A minimal sequence record. When indexing, `name` carries the lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub name: String,
    pub seq: String,
}

impl Sequence {
    pub fn new(name: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seq: seq.into(),
        }
    }

    /// First whitespace-delimited token of the name.
    pub fn id(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

/// Anything that carries a `LEVEL#NAME;...` lineage string.
pub trait LabeledSequence {
    fn lineage(&self) -> &str;
}

impl LabeledSequence for Sequence {
    fn lineage(&self) -> &str {
        &self.name
    }
}

/// One row of the node table, as loaded at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// `None` only for the root.
    pub seq_id: Option<u32>,
    pub node_id: NodeId,
    pub level: Level,
    pub name: String,
    /// `None` only for the root.
    pub parent_id: Option<NodeId>,
}

/// A node sharing `count` query k-mers at the level being searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub node_id: NodeId,
    pub count: u32,
}

/// Root-to-hit chain of node records.
pub type TaxPath<'a> = Vec<&'a NodeRecord>;

/// Outcome of classifying one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Number of hits the consensus was computed from.
    pub hits: usize,
    /// Consensus lineage, or [`Classification::UNCLASSIFIED`].
    pub taxonomy: String,
}

impl Classification {
    pub const UNCLASSIFIED: &'static str = "Unclassified";

    pub fn unclassified(hits: usize) -> Self {
        Self {
            hits,
            taxonomy: Self::UNCLASSIFIED.to_string(),
        }
    }

    pub fn is_classified(&self) -> bool {
        self.taxonomy != Self::UNCLASSIFIED
    }
}
