//src/taxtree.rs

use ahash::{AHashMap, AHashSet};

use crate::error::{Result, TaxError};
use crate::types::{Kmer, Level, NodeId};

pub const ROOT_ID: NodeId = 0;
pub const ROOT_NAME: &str = "root";

/// One build-time node. Children are kept in creation order, which is also
/// ascending `node_id` order.
#[derive(Debug, Clone)]
pub struct TaxNode {
    pub node_id: NodeId,
    /// Sequence counter at creation time; `None` for the root.
    pub seq_id: Option<u32>,
    pub level: Level,
    pub name: String,
    pub parent: Option<NodeId>,
    pub kmers: AHashSet<Kmer>,
    children: Vec<NodeId>,
    child_index: AHashMap<String, NodeId>,
}

impl TaxNode {
    fn new(node_id: NodeId, seq_id: Option<u32>, level: Level, name: &str, parent: Option<NodeId>) -> Self {
        Self {
            node_id,
            seq_id,
            level,
            name: name.to_string(),
            parent,
            kmers: AHashSet::new(),
            children: Vec::new(),
            child_index: AHashMap::new(),
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.child_index.get(name).copied()
    }
}

/// Split a `LEVEL#NAME;...` lineage into its named segments, root excluded.
///
/// Exactly `Level::COUNT - 1` segments are required, each tagged with the
/// level expected at its depth. Unnamed trailing levels are dropped; a named
/// level after an unnamed one is a gap and is rejected.
pub fn parse_lineage(lineage: &str) -> Result<Vec<(Level, &str)>> {
    let segments: Vec<&str> = lineage.split(';').collect();
    if segments.len() != Level::COUNT - 1 {
        return Err(TaxError::malformed(
            lineage,
            format!(
                "expected {} segments, found {}",
                Level::COUNT - 1,
                segments.len()
            ),
        ));
    }

    let mut named = Vec::with_capacity(segments.len());
    let mut gap_at: Option<Level> = None;
    for (i, segment) in segments.iter().enumerate() {
        let expected = Level::ALL[i + 1];
        let (tag, name) = segment.split_once('#').ok_or_else(|| {
            TaxError::malformed(lineage, format!("segment `{segment}` has no '#'"))
        })?;
        match Level::parse(tag.trim()) {
            Some(level) if level == expected => {}
            _ => {
                return Err(TaxError::malformed(
                    lineage,
                    format!("expected level `{}` at depth {}, found `{tag}`", expected.tag(), i + 1),
                ))
            }
        }
        if name.is_empty() {
            gap_at.get_or_insert(expected);
            continue;
        }
        if let Some(missing) = gap_at {
            return Err(TaxError::malformed(
                lineage,
                format!("`{}` is named but `{}` is empty", expected.tag(), missing.tag()),
            ));
        }
        if name.contains(['\t', '\n', '\r']) {
            return Err(TaxError::malformed(
                lineage,
                format!("name at `{}` contains a control character", expected.tag()),
            ));
        }
        named.push((expected, name));
    }

    if named.is_empty() {
        return Err(TaxError::malformed(lineage, "no named levels"));
    }
    Ok(named)
}

/// Arena-backed taxonomy trie; `nodes[id].node_id == id`.
#[derive(Debug, Clone)]
pub struct TaxTree {
    nodes: Vec<TaxNode>,
}

impl Default for TaxTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TaxTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TaxNode::new(ROOT_ID, None, Level::Root, ROOT_NAME, None)],
        }
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True until the first lineage is inserted; the root always exists.
    pub fn has_no_lineages(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn root(&self) -> &TaxNode {
        &self.nodes[ROOT_ID as usize]
    }

    pub fn node(&self, id: NodeId) -> Option<&TaxNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaxNode> {
        self.nodes.iter()
    }

    /// Fetch the child of `parent` called `name`, creating it with the next id.
    fn get_or_insert_child(&mut self, parent: NodeId, level: Level, name: &str, seq_id: u32) -> NodeId {
        if let Some(id) = self.nodes[parent as usize].child(name) {
            return id;
        }
        let id = self.nodes.len() as NodeId;
        self.nodes
            .push(TaxNode::new(id, Some(seq_id), level, name, Some(parent)));
        let parent_node = &mut self.nodes[parent as usize];
        parent_node.children.push(id);
        parent_node.child_index.insert(name.to_string(), id);
        id
    }

    /// Walk (creating as needed) the path for an already parsed lineage and
    /// merge `kmers` into its deepest node. Returns that node's id.
    pub fn insert_path(&mut self, path: &[(Level, &str)], seq_id: u32, kmers: AHashSet<Kmer>) -> NodeId {
        let mut cursor = ROOT_ID;
        for &(level, name) in path {
            cursor = self.get_or_insert_child(cursor, level, name, seq_id);
        }
        let leaf = &mut self.nodes[cursor as usize];
        if leaf.kmers.is_empty() {
            leaf.kmers = kmers;
        } else {
            leaf.kmers.extend(kmers);
        }
        cursor
    }

    /// Make every node's k-mer set a superset of all of its descendants'.
    ///
    /// Children always have larger ids than their parent, so a sweep from the
    /// highest id down visits every node after all of its descendants.
    pub fn tree_union(&mut self) {
        for id in (1..self.nodes.len()).rev() {
            let (head, tail) = self.nodes.split_at_mut(id);
            let child = &tail[0];
            if let Some(parent) = child.parent {
                head[parent as usize]
                    .kmers
                    .extend(child.kmers.iter().copied());
            }
        }
    }

    /// Depth-first pre-order, siblings in creation order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id as usize].children.iter().rev());
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: &[Kmer]) -> AHashSet<Kmer> {
        v.iter().copied().collect()
    }

    #[test]
    fn test_parse_lineage() {
        let path = parse_lineage("K#b;P#e;C#;O#;F#;G#;S#").unwrap();
        assert_eq!(path, vec![(Level::Kingdom, "b"), (Level::Phylum, "e")]);

        let path = parse_lineage("k#Bacteria;p#Firmicutes;c#Bacilli;o#x;f#y;g#z;s#z_1").unwrap();
        assert_eq!(path.len(), 7);
        assert_eq!(path[6], (Level::Species, "z_1"));
    }

    #[test]
    fn test_parse_lineage_errors() {
        let bad = [
            "K#b;P#e",
            "K#b;P#e;C#;O#;F#;G#;S#;X#",
            "K#b;C#e;P#;O#;F#;G#;S#",
            "K#b;P#;C#g;O#;F#;G#;S#",
            "Kb;P#;C#;O#;F#;G#;S#",
            "K#;P#;C#;O#;F#;G#;S#",
        ];
        for lineage in bad {
            assert!(
                matches!(parse_lineage(lineage), Err(TaxError::MalformedLineage { .. })),
                "{lineage} should be rejected"
            );
        }
    }

    #[test]
    fn test_fresh_tree_holds_only_root() {
        let mut tree = TaxTree::new();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.has_no_lineages());
        let p = parse_lineage("K#a;P#;C#;O#;F#;G#;S#").unwrap();
        tree.insert_path(&p, 0, set(&[1]));
        assert_eq!(tree.node_count(), 2);
        assert!(!tree.has_no_lineages());
    }

    #[test]
    fn test_node_ids_follow_discovery_order() {
        let mut tree = TaxTree::new();
        let p1 = parse_lineage("K#a;P#z;C#;O#;F#;G#;S#").unwrap();
        let p2 = parse_lineage("K#a;P#b;C#c;O#;F#;G#;S#").unwrap();
        let p3 = parse_lineage("K#x;P#b;C#;O#;F#;G#;S#").unwrap();
        assert_eq!(tree.insert_path(&p1, 0, set(&[1])), 2);
        assert_eq!(tree.insert_path(&p2, 1, set(&[2])), 4);
        assert_eq!(tree.insert_path(&p3, 2, set(&[3])), 6);
        assert_eq!(tree.node_count(), 7);

        let names: Vec<_> = tree.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "z", "b", "c", "x", "b"]);
        let b = tree.node(3).unwrap();
        assert_eq!(b.parent, Some(1));
        assert_eq!(b.seq_id, Some(1));
        assert_eq!(tree.root().seq_id, None);
        assert_eq!(tree.preorder(), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_repeated_lineage_merges_kmers() {
        let mut tree = TaxTree::new();
        let p = parse_lineage("K#a;P#b;C#;O#;F#;G#;S#").unwrap();
        tree.insert_path(&p, 0, set(&[1, 2]));
        tree.insert_path(&p, 1, set(&[2, 3]));
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.node(2).unwrap().kmers, set(&[1, 2, 3]));
        assert!(tree.node(1).unwrap().kmers.is_empty());
    }

    #[test]
    fn test_tree_union() {
        let mut tree = TaxTree::new();
        let e = parse_lineage("K#b;P#e;C#;O#;F#;G#;S#").unwrap();
        let f = parse_lineage("K#b;P#f;C#;O#;F#;G#;S#").unwrap();
        let g = parse_lineage("K#b;P#e;C#g;O#;F#;G#;S#").unwrap();
        let h = parse_lineage("K#q;P#;C#;O#;F#;G#;S#").unwrap();
        tree.insert_path(&e, 0, set(&[3, 12]));
        tree.insert_path(&f, 1, set(&[3, 13]));
        tree.insert_path(&g, 2, set(&[3, 12, 51]));
        tree.insert_path(&h, 3, AHashSet::new());
        tree.tree_union();

        for node in tree.nodes() {
            if node.children().is_empty() {
                continue;
            }
            let mut expected = AHashSet::new();
            for &c in node.children() {
                expected.extend(tree.node(c).unwrap().kmers.iter().copied());
            }
            assert_eq!(node.kmers, expected, "node {}", node.name);
        }
        let b = tree.node(1).unwrap();
        assert_eq!(b.kmers, set(&[3, 12, 13, 51]));
        assert!(tree.node(5).unwrap().kmers.is_empty());
        assert_eq!(tree.node_count(), 6);
    }
}
