//! Topology rearrangements on [`Tree`]: subtree prune and regraft, and
//! nearest-neighbour interchange.

use super::Tree;
use crate::errors::DataError;

/// A subtree prune-and-regraft move.
///
/// The subtree on the `pruned` side of edge `(pruned, attach)` is cut
/// together with `attach`, whose two other edges are merged. `attach` is
/// then inserted on edge `regraft` of the remaining tree, splitting it at
/// `fraction` of its length measured from the endpoint stored first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spr {
    pub pruned: usize,
    pub attach: usize,
    pub regraft: usize,
    pub fraction: f64,
}

fn rejected(message: String) -> DataError {
    DataError::Newick {
        position: 0,
        message,
    }
}

impl Tree {
    /// Directed edges `(pruned, attach)` eligible for SPR: `attach` must be
    /// internal.
    pub fn prune_candidates(&self) -> Vec<(usize, usize)> {
        self.edges()
            .iter()
            .flat_map(|e| [(e.a, e.b), (e.b, e.a)])
            .filter(|&(_, attach)| !self.is_leaf(attach))
            .collect()
    }

    /// Edges on which the subtree cut at `(pruned, attach)` may be
    /// regrafted. The merged edge keeps the id of `attach`'s first
    /// remaining edge.
    pub fn regraft_candidates(&self, pruned: usize, attach: usize) -> Vec<usize> {
        let (_, (_, dropped)) = match self.attach_sides(pruned, attach) {
            Some(sides) => sides,
            None => return Vec::new(),
        };
        self.subtree_edges(attach, pruned)
            .into_iter()
            .filter(|&e| e != dropped)
            .collect()
    }

    fn attach_sides(&self, pruned: usize, attach: usize) -> Option<((usize, usize), (usize, usize))> {
        let mut others = self.neighbors(attach).iter().filter(|&&(n, _)| n != pruned);
        let first = *others.next()?;
        let second = *others.next()?;
        Some((first, second))
    }

    /// Apply an SPR move. Returns the log Jacobian of the branch-length
    /// transformation, `ln(l_regraft / (l_first + l_second))`.
    pub fn spr(&mut self, mv: Spr) -> Result<f64, DataError> {
        let Spr {
            pruned,
            attach,
            regraft,
            fraction,
        } = mv;
        let cut = self
            .edge_between(pruned, attach)
            .ok_or_else(|| rejected(format!("no edge between {pruned} and {attach}")))?;
        if self.is_leaf(attach) {
            return Err(rejected(format!("cannot prune at leaf {attach}")));
        }
        let ((a, kept), (b, dropped)) = self
            .attach_sides(pruned, attach)
            .ok_or_else(|| rejected(format!("node {attach} is not binary")))?;
        if !self.regraft_candidates(pruned, attach).contains(&regraft) {
            return Err(rejected(format!("edge {regraft} is not in the remaining tree")));
        }

        // Merge a - attach - b into a - b.
        let merged = self.length(kept) + self.length(dropped);
        *self.edge_mut(kept) = super::Edge {
            a,
            b,
            length: merged,
        };
        self.replace_link(a, attach, b, kept);
        self.replace_link(b, attach, a, kept);

        // Split the regraft edge x - y into x - attach - y.
        let super::Edge { a: x, b: y, length } = *self.edge(regraft);
        *self.edge_mut(regraft) = super::Edge {
            a: x,
            b: attach,
            length: fraction * length,
        };
        *self.edge_mut(dropped) = super::Edge {
            a: attach,
            b: y,
            length: (1.0 - fraction) * length,
        };
        self.replace_link(x, y, attach, regraft);
        self.replace_link(y, x, attach, dropped);
        self.set_links(attach, [(pruned, cut), (x, regraft), (y, dropped)]);

        Ok(length.ln() - merged.ln())
    }

    /// Internal edges, whose both ends are internal nodes.
    pub fn internal_edges(&self) -> Vec<usize> {
        self.edges()
            .iter()
            .enumerate()
            .filter(|(_, e)| !self.is_leaf(e.a) && !self.is_leaf(e.b))
            .map(|(id, _)| id)
            .collect()
    }

    /// Nearest-neighbour interchange around internal edge `edge`: the first
    /// subtree hanging off one end swaps places with subtree `which` (0 or
    /// 1) hanging off the other. Branch lengths travel with their subtrees.
    pub fn nni(&mut self, edge: usize, which: usize) -> Result<(), DataError> {
        let super::Edge { a: p, b: q, .. } = *self.edge(edge);
        if self.is_leaf(p) || self.is_leaf(q) {
            return Err(rejected(format!("edge {edge} is not internal")));
        }
        let (left, _) = self
            .attach_sides(q, p)
            .ok_or_else(|| rejected(format!("node {p} is not binary")))?;
        let (first, second) = self
            .attach_sides(p, q)
            .ok_or_else(|| rejected(format!("node {q} is not binary")))?;
        let right = if which == 0 { first } else { second };
        let ((l, el), (r, er)) = (left, right);

        self.retarget(el, p, q);
        self.retarget(er, q, p);
        self.replace_link(p, l, r, er);
        self.replace_link(q, r, l, el);
        self.replace_link(l, p, q, el);
        self.replace_link(r, q, p, er);
        Ok(())
    }

    fn retarget(&mut self, edge: usize, old: usize, new: usize) {
        let e = self.edge_mut(edge);
        if e.a == old {
            e.a = new;
        } else if e.b == old {
            e.b = new;
        }
    }
}
