//! Unrooted binary trees stored as a node/edge arena.
//!
//! Leaves carry the ids `0..n_taxa` and stand for the taxon with the same
//! index. Internal nodes take `n_taxa..2 * n_taxa - 2`. Edges have stable
//! ids in `0..2 * n_taxa - 3`; topology moves rewire edges but never
//! renumber them. Traversals start from the anchor, internal node
//! `n_taxa`.

use crate::data::TaxonSet;
use crate::errors::DataError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Length given to edges whose Newick entry carries none.
pub const DEFAULT_BRANCH_LENGTH: f64 = 0.1;
/// Smallest branch length the tree accepts.
pub const MIN_BRANCH_LENGTH: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub length: f64,
}

impl Edge {
    /// End of the edge opposite `node`.
    #[inline]
    pub fn other(&self, node: usize) -> usize {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }

    #[inline]
    pub fn touches(&self, node: usize) -> bool {
        self.a == node || self.b == node
    }
}

/// One step of a traversal away from the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub parent: usize,
    pub child: usize,
    pub edge: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    n_taxa: usize,
    /// Per node: `(neighbour, edge id)` pairs.
    adjacency: Vec<Vec<(usize, usize)>>,
    edges: Vec<Edge>,
}

impl Tree {
    /// Random topology by sequential edge splitting, every length set to
    /// `length`.
    pub fn random<R: Rng + ?Sized>(n_taxa: usize, length: f64, rng: &mut R) -> Result<Self, DataError> {
        check_taxon_count(n_taxa)?;
        let anchor = n_taxa;
        let mut tree = Self {
            n_taxa,
            adjacency: vec![Vec::with_capacity(3); 2 * n_taxa - 2],
            edges: Vec::with_capacity(2 * n_taxa - 3),
        };
        for leaf in 0..3 {
            tree.push_edge(anchor, leaf, length);
        }
        for leaf in 3..n_taxa {
            let split = rng.random_range(0..tree.edges.len());
            let node = n_taxa + leaf - 2;
            let Edge { a, b, .. } = tree.edges[split];
            // `split` now joins a to the new node; a fresh edge continues to b.
            tree.edges[split].b = node;
            tree.replace_link(a, b, node, split);
            let continued = tree.edges.len();
            tree.edges.push(Edge { a: node, b, length });
            tree.replace_link(b, a, node, continued);
            tree.adjacency[node].push((a, split));
            tree.adjacency[node].push((b, continued));
            tree.push_edge(node, leaf, length);
        }
        Ok(tree)
    }

    /// Parse a Newick tree whose leaf labels are taxa of `taxa`.
    ///
    /// A bifurcating root is suppressed by merging its two edges. Node and
    /// edge ids of the result follow the preorder of the text.
    pub fn from_newick(text: &str, taxa: &TaxonSet) -> Result<Self, DataError> {
        let parsed = NewickParser::new(text).parse()?;
        parsed.into_tree(taxa)
    }

    /// Write the tree in Newick format, starting from the anchor.
    pub fn to_newick(&self, taxa: &TaxonSet) -> String {
        let mut out = String::new();
        self.write_subtree(&mut out, self.anchor(), None, taxa);
        out.push(';');
        out
    }

    fn write_subtree(&self, out: &mut String, node: usize, from: Option<usize>, taxa: &TaxonSet) {
        if self.is_leaf(node) {
            out.push_str(taxa.name(node));
            return;
        }
        out.push('(');
        let mut first = true;
        for &(next, edge) in &self.adjacency[node] {
            if Some(next) == from {
                continue;
            }
            if !first {
                out.push(',');
            }
            first = false;
            self.write_subtree(out, next, Some(node), taxa);
            out.push_str(&format!(":{}", self.edges[edge].length));
        }
        out.push(')');
    }

    /// Edges in preorder from the anchor, each oriented parent to child.
    pub fn preorder(&self) -> Vec<Step> {
        let mut steps = Vec::with_capacity(self.edges.len());
        let mut stack = Vec::with_capacity(self.adjacency.len());
        stack.push((self.anchor(), usize::MAX, usize::MAX));
        while let Some((node, from, edge)) = stack.pop() {
            for &(next, link) in self.adjacency[node].iter().rev() {
                if next != from {
                    stack.push((next, node, link));
                }
            }
            if from != usize::MAX {
                steps.push(Step {
                    parent: from,
                    child: node,
                    edge,
                });
            }
        }
        steps
    }

    /// Branch lengths in preorder.
    pub fn preorder_lengths(&self) -> Vec<f64> {
        self.preorder()
            .iter()
            .map(|s| self.edges[s.edge].length)
            .collect()
    }

    /// Overwrite the branch lengths, given in preorder.
    pub fn set_preorder_lengths(&mut self, lengths: &[f64]) -> Result<(), DataError> {
        let steps = self.preorder();
        if lengths.len() != steps.len() {
            return Err(DataError::Newick {
                position: 0,
                message: format!("{} lengths for {} edges", lengths.len(), steps.len()),
            });
        }
        for (step, &length) in steps.iter().zip(lengths) {
            self.edges[step.edge].length = length;
        }
        Ok(())
    }

    /// Check degrees, connectivity, edge count and branch lengths.
    pub fn validate(&self) -> Result<(), DataError> {
        let invalid = |message: String| DataError::Newick {
            position: 0,
            message,
        };
        if self.edges.len() != 2 * self.n_taxa - 3 {
            return Err(invalid(format!("{} edges for {} taxa", self.edges.len(), self.n_taxa)));
        }
        for (node, links) in self.adjacency.iter().enumerate() {
            let expected = if node < self.n_taxa { 1 } else { 3 };
            if links.len() != expected {
                return Err(invalid(format!("node {node} has degree {}", links.len())));
            }
            for &(next, edge) in links {
                if !self.edges[edge].touches(node) || self.edges[edge].other(node) != next {
                    return Err(invalid(format!("edge {edge} does not join {node} and {next}")));
                }
            }
        }
        if let Some(e) = self.edges.iter().position(|e| !(e.length > 0.0)) {
            return Err(invalid(format!("edge {e} has non-positive length")));
        }
        if self.preorder().len() != self.edges.len() {
            return Err(invalid("tree is not connected".to_string()));
        }
        Ok(())
    }

    /// Leaf sets of all non-trivial splits, each given by the side that does
    /// not contain taxon 0. Two trees share a topology iff their splits are
    /// equal.
    pub fn splits(&self) -> BTreeSet<Vec<usize>> {
        let mut splits = BTreeSet::new();
        for step in self.preorder() {
            if self.is_leaf(step.child) {
                continue;
            }
            let mut side: Vec<usize> = self
                .subtree_nodes(step.child, step.parent)
                .into_iter()
                .filter(|&n| self.is_leaf(n))
                .collect();
            if side.contains(&0) {
                let all: BTreeSet<usize> = side.iter().copied().collect();
                side = (0..self.n_taxa).filter(|t| !all.contains(t)).collect();
            }
            side.sort_unstable();
            if side.len() > 1 {
                splits.insert(side);
            }
        }
        splits
    }

    /// Nodes on the side of `node` away from `excluded`, `node` included.
    pub fn subtree_nodes(&self, node: usize, excluded: usize) -> Vec<usize> {
        let mut nodes = Vec::new();
        let mut stack = vec![(node, excluded)];
        while let Some((n, from)) = stack.pop() {
            nodes.push(n);
            for &(next, _) in &self.adjacency[n] {
                if next != from {
                    stack.push((next, n));
                }
            }
        }
        nodes
    }

    /// Edges on the side of `node` away from `excluded`.
    pub fn subtree_edges(&self, node: usize, excluded: usize) -> Vec<usize> {
        let mut edges = Vec::new();
        let mut stack = vec![(node, excluded)];
        while let Some((n, from)) = stack.pop() {
            for &(next, edge) in &self.adjacency[n] {
                if next != from {
                    edges.push(edge);
                    stack.push((next, n));
                }
            }
        }
        edges
    }

    pub fn edge_between(&self, a: usize, b: usize) -> Option<usize> {
        self.adjacency[a]
            .iter()
            .find(|&&(n, _)| n == b)
            .map(|&(_, e)| e)
    }

    pub(crate) fn push_edge(&mut self, a: usize, b: usize, length: f64) -> usize {
        let id = self.edges.len();
        self.edges.push(Edge { a, b, length });
        self.adjacency[a].push((b, id));
        self.adjacency[b].push((a, id));
        id
    }

    /// In `node`'s adjacency, replace the link to `old` by `(new, edge)`,
    /// keeping its position.
    pub(crate) fn replace_link(&mut self, node: usize, old: usize, new: usize, edge: usize) {
        if let Some(link) = self.adjacency[node].iter_mut().find(|(n, _)| *n == old) {
            *link = (new, edge);
        }
    }

    pub(crate) fn set_links(&mut self, node: usize, links: [(usize, usize); 3]) {
        self.adjacency[node] = links.to_vec();
    }

    pub(crate) fn edge_mut(&mut self, edge: usize) -> &mut Edge {
        &mut self.edges[edge]
    }

    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.n_taxa
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.adjacency.len()
    }

    #[inline]
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn anchor(&self) -> usize {
        self.n_taxa
    }

    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.n_taxa
    }

    #[inline]
    pub fn edge(&self, edge: usize) -> &Edge {
        &self.edges[edge]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn length(&self, edge: usize) -> f64 {
        self.edges[edge].length
    }

    #[inline]
    pub fn set_length(&mut self, edge: usize, length: f64) {
        self.edges[edge].length = length;
    }

    pub fn neighbors(&self, node: usize) -> &[(usize, usize)] {
        &self.adjacency[node]
    }

    pub fn total_length(&self) -> f64 {
        self.edges.iter().map(|e| e.length).sum()
    }
}

fn check_taxon_count(n_taxa: usize) -> Result<(), DataError> {
    if n_taxa < 3 {
        return Err(DataError::TaxonMismatch(format!(
            "an unrooted tree needs at least 3 taxa, got {n_taxa}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ParsedNode {
    name: Option<String>,
    length: Option<f64>,
    children: Vec<usize>,
}

#[derive(Debug)]
struct ParsedTree {
    nodes: Vec<ParsedNode>,
}

struct NewickParser<'a> {
    text: &'a [u8],
    pos: usize,
    nodes: Vec<ParsedNode>,
}

impl<'a> NewickParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text: text.as_bytes(),
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> DataError {
        DataError::Newick {
            position: self.pos,
            message: message.into(),
        }
    }

    fn parse(mut self) -> Result<ParsedTree, DataError> {
        self.skip_whitespace();
        let root = self.subtree()?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(self.error("expected ';'"));
        }
        debug_assert_eq!(root, 0);
        Ok(ParsedTree { nodes: self.nodes })
    }

    fn subtree(&mut self) -> Result<usize, DataError> {
        let id = self.nodes.len();
        self.nodes.push(ParsedNode::default());
        self.skip_whitespace();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.subtree()?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
        let label = self.label()?;
        if !label.is_empty() {
            self.nodes[id].name = Some(label);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let text = self.text;
            let start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit() || b"+-.eE".contains(&b)) {
                self.pos += 1;
            }
            let token = std::str::from_utf8(&text[start..self.pos]).unwrap_or_default();
            let length: f64 = token
                .parse()
                .map_err(|_| self.error(format!("bad branch length '{token}'")))?;
            self.nodes[id].length = Some(length);
        }
        Ok(id)
    }

    fn label(&mut self) -> Result<String, DataError> {
        self.skip_whitespace();
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            let start = self.pos;
            while self.peek().is_some_and(|b| b != b'\'') {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Err(self.error("unterminated quoted label"));
            }
            let label = String::from_utf8_lossy(&self.text[start..self.pos]).into_owned();
            self.pos += 1;
            return Ok(label);
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !b"(),:;".contains(&b) && !b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.text[start..self.pos]).into_owned())
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}

impl ParsedTree {
    fn into_tree(self, taxa: &TaxonSet) -> Result<Tree, DataError> {
        let n_taxa = taxa.len();
        check_taxon_count(n_taxa)?;
        let invalid = |message: String| DataError::Newick {
            position: 0,
            message,
        };
        let length_of = |node: &ParsedNode| {
            node.length
                .unwrap_or(DEFAULT_BRANCH_LENGTH)
                .max(MIN_BRANCH_LENGTH)
        };

        // Undirected graph over parsed ids, neighbours in text order.
        let n = self.nodes.len();
        let mut links: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (id, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                let length = length_of(&self.nodes[child]);
                links[id].push((child, length));
                links[child].push((id, length));
            }
        }

        let root = 0;
        let mut anchor = root;
        match self.nodes[root].children.as_slice() {
            [left, right] => {
                let (left, right) = (*left, *right);
                let merged = length_of(&self.nodes[left]) + length_of(&self.nodes[right]);
                for (side, other) in [(left, right), (right, left)] {
                    if let Some(link) = links[side].iter_mut().find(|(n, _)| *n == root) {
                        *link = (other, merged);
                    }
                }
                links[root].clear();
                anchor = if self.nodes[left].children.is_empty() {
                    right
                } else {
                    left
                };
            }
            [_, _, _] => {}
            children => {
                return Err(invalid(format!(
                    "root has {} children, expected 2 or 3",
                    children.len()
                )))
            }
        }

        // Relabel: leaves by taxon index, internal nodes and edges in
        // preorder from the anchor.
        let mut new_id = vec![usize::MAX; n];
        let mut seen_taxa = vec![false; n_taxa];
        let mut next_internal = n_taxa;
        let mut tree = Tree {
            n_taxa,
            adjacency: vec![Vec::with_capacity(3); 2 * n_taxa - 2],
            edges: Vec::with_capacity(2 * n_taxa - 3),
        };
        let mut stack = vec![(anchor, usize::MAX, 0.0)];
        while let Some((node, from, length)) = stack.pop() {
            let degree = links[node].len();
            let id = if degree == 1 {
                let name = self.nodes[node]
                    .name
                    .as_deref()
                    .ok_or_else(|| invalid("unnamed leaf".to_string()))?;
                let taxon = taxa
                    .index_of(name)
                    .ok_or_else(|| DataError::TaxonMismatch(format!("unknown taxon '{name}'")))?;
                if std::mem::replace(&mut seen_taxa[taxon], true) {
                    return Err(DataError::TaxonMismatch(format!("taxon '{name}' appears twice")));
                }
                taxon
            } else if degree == 3 {
                if next_internal >= tree.adjacency.len() {
                    return Err(DataError::TaxonMismatch(
                        "tree has more internal nodes than the taxa allow".to_string(),
                    ));
                }
                next_internal += 1;
                next_internal - 1
            } else {
                return Err(invalid(format!("node of degree {degree}; the tree must be binary")));
            };
            new_id[node] = id;
            if from != usize::MAX {
                tree.push_edge(new_id[from], id, length);
            }
            for &(next, l) in links[node].iter().rev() {
                if next != from {
                    stack.push((next, node, l));
                }
            }
        }
        if let Some(missing) = seen_taxa.iter().position(|&s| !s) {
            return Err(DataError::TaxonMismatch(format!(
                "taxon '{}' is missing from the tree",
                taxa.name(missing)
            )));
        }
        Ok(tree)
    }
}
