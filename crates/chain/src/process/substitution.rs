//! Poisson (F81) substitution process over one slice of sites.
//!
//! Each site evolves under a uniformized process with unit event rate
//! scaled by the site rate: at every event the state is redrawn from the
//! site's profile. The transition probability over a branch of length `t`
//! at rate `r` is therefore
//!
//! ```text
//! P(a -> b) = exp(-r t) [a == b] + (1 - exp(-r t)) pi[b]
//! ```
//!
//! In the unfolded representation the process keeps, for every owned site
//! and rate category, the conditional likelihood vector of every node. A
//! collapse draws one rate category and one substitution mapping per site
//! from those arrays and keeps only their summary statistics.

use crate::base::special::log_sum_exp;
use crate::base::{random, UNKNOWN};
use crate::data::{SequenceAlignment, SiteRange};
use crate::errors::{ChainError, Result};
use crate::tree::{Step, Tree};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which per-site state a process currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    /// Only the summary statistics of one sampled mapping.
    Collapsed,
    /// Explicit conditional likelihood arrays.
    Unfolded,
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collapsed => write!(f, "collapsed"),
            Self::Unfolded => write!(f, "unfolded"),
        }
    }
}

/// Borrowed view of the global parameters the likelihood depends on.
#[derive(Debug, Clone, Copy)]
pub struct ModelView<'a> {
    pub tree: &'a Tree,
    /// Rate of each discrete Gamma category.
    pub rates: &'a [f64],
    pub profiles: &'a [Vec<f64>],
    pub weights: &'a [f64],
    /// Mixture component of each alignment site.
    pub allocation: &'a [usize],
}

/// Mapping summary of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatistics {
    /// Global alignment index.
    pub site: usize,
    /// Rate category drawn at the collapse.
    pub category: usize,
    /// Number of substitution events over the whole tree.
    pub n_sub: u32,
    /// Per state: root state plus event targets.
    pub counts: Vec<u32>,
}

/// Mapping summary of a slice, or of the whole alignment once merged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingStatistics {
    /// Ordered by site.
    pub sites: Vec<SiteStatistics>,
    /// Events per edge id.
    pub branch_events: Vec<u64>,
}

impl MappingStatistics {
    /// Concatenate slices given in rank order and add up branch counts.
    pub fn merge(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::default();
        for part in parts {
            if merged.branch_events.len() < part.branch_events.len() {
                merged.branch_events.resize(part.branch_events.len(), 0);
            }
            for (total, n) in merged.branch_events.iter_mut().zip(&part.branch_events) {
                *total += n;
            }
            merged.sites.extend(part.sites);
        }
        merged
    }

    pub fn total_events(&self) -> u64 {
        self.branch_events.iter().sum()
    }
}

/// Conditional likelihood arrays of a slice for one tree.
#[derive(Debug, Clone)]
struct Conditionals {
    n_cat: usize,
    n_nodes: usize,
    n_states: usize,
    /// `[site][category][node][state]`, each node vector rescaled.
    values: Vec<f64>,
    /// `[site][category]` log-likelihood.
    site_lnl: Vec<f64>,
}

impl Conditionals {
    fn block(&self, local: usize, cat: usize) -> &[f64] {
        let len = self.n_nodes * self.n_states;
        let start = (local * self.n_cat + cat) * len;
        &self.values[start..start + len]
    }

    fn site_lnl(&self, local: usize) -> &[f64] {
        &self.site_lnl[local * self.n_cat..(local + 1) * self.n_cat]
    }

    /// Sum over sites of the category-averaged likelihood.
    fn log_likelihood(&self) -> f64 {
        let ln_cat = (self.n_cat as f64).ln();
        self.site_lnl
            .chunks(self.n_cat)
            .map(|lnl| log_sum_exp(lnl) - ln_cat)
            .sum()
    }
}

/// Substitution process of the sites owned by one rank.
#[derive(Debug)]
pub struct SubstitutionProcess {
    alignment: Arc<SequenceAlignment>,
    range: SiteRange,
    unfolded: Option<(Conditionals, f64)>,
    pending: Option<(Conditionals, f64)>,
}

impl SubstitutionProcess {
    /// Process over `range`, initially collapsed.
    pub fn new(alignment: Arc<SequenceAlignment>, range: SiteRange) -> Self {
        Self {
            alignment,
            range,
            unfolded: None,
            pending: None,
        }
    }

    pub fn representation(&self) -> Representation {
        if self.unfolded.is_some() {
            Representation::Unfolded
        } else {
            Representation::Collapsed
        }
    }

    pub fn range(&self) -> SiteRange {
        self.range
    }

    pub fn alignment(&self) -> &Arc<SequenceAlignment> {
        &self.alignment
    }

    /// Cached log-likelihood of the slice, available while unfolded.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.unfolded.as_ref().map(|(_, lnl)| *lnl)
    }

    /// Rebuild the conditional likelihood arrays from `model`.
    pub fn unfold(&mut self, model: &ModelView<'_>) -> Result<f64> {
        if self.unfolded.is_some() {
            return Err(ChainError::Protocol("unfold while already unfolded".to_string()));
        }
        let conditionals = self.prune(model);
        let lnl = conditionals.log_likelihood();
        self.unfolded = Some((conditionals, lnl));
        Ok(lnl)
    }

    /// Compute the arrays for a proposed tree without committing them.
    pub fn propose(&mut self, model: &ModelView<'_>) -> Result<f64> {
        if self.unfolded.is_none() {
            return Err(ChainError::Protocol(
                "tree proposal while collapsed".to_string(),
            ));
        }
        let conditionals = self.prune(model);
        let lnl = conditionals.log_likelihood();
        self.pending = Some((conditionals, lnl));
        Ok(lnl)
    }

    /// Keep or discard the pending proposal.
    pub fn resolve(&mut self, accept: bool) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| ChainError::Protocol("resolve without a pending proposal".to_string()))?;
        if accept {
            self.unfolded = Some(pending);
        }
        Ok(())
    }

    /// Draw a rate category and a substitution mapping for every owned site,
    /// then drop the arrays.
    pub fn collapse<R: Rng + ?Sized>(
        &mut self,
        model: &ModelView<'_>,
        rng: &mut R,
    ) -> Result<MappingStatistics> {
        let (conditionals, _) = self
            .unfolded
            .take()
            .ok_or_else(|| ChainError::Protocol("collapse while already collapsed".to_string()))?;
        self.pending = None;

        let tree = model.tree;
        let steps = tree.preorder();
        let n_states = self.alignment.n_states();
        let mut stats = MappingStatistics {
            sites: Vec::with_capacity(self.range.len()),
            branch_events: vec![0; tree.n_edges()],
        };
        let mut states = vec![0usize; tree.n_nodes()];
        let mut child_weights = vec![0.0; n_states];

        for (local, site) in self.range.sites().enumerate() {
            let profile = &model.profiles[model.allocation[site]];
            let category = random::categorical_log(rng, conditionals.site_lnl(local));
            let rate = model.rates[category];
            let block = conditionals.block(local, category);

            let mut counts = vec![0u32; n_states];
            let mut n_sub = 0u32;

            let anchor = tree.anchor();
            let root_weights: Vec<f64> = profile
                .iter()
                .zip(node_vector(block, anchor, n_states))
                .map(|(p, l)| p * l)
                .collect();
            states[anchor] = random::categorical(rng, &root_weights);
            counts[states[anchor]] += 1;

            for &Step { parent, child, edge } in &steps {
                let from = states[parent];
                let mu = rate * tree.length(edge);
                let stay = (-mu).exp();
                for (b, w) in child_weights.iter_mut().enumerate() {
                    let p = (1.0 - stay) * profile[b] + if b == from { stay } else { 0.0 };
                    *w = p * node_vector(block, child, n_states)[b];
                }
                let to = random::categorical(rng, &child_weights);
                states[child] = to;

                let events = sample_event_count(rng, from, to, mu, profile[from]);
                if events > 0 {
                    for _ in 1..events {
                        counts[random::categorical(rng, profile)] += 1;
                    }
                    counts[to] += 1;
                    n_sub += events;
                    stats.branch_events[edge] += u64::from(events);
                }
            }
            stats.sites.push(SiteStatistics {
                site,
                category,
                n_sub,
                counts,
            });
        }
        Ok(stats)
    }

    /// Per-site log-likelihoods conditional on the allocation, averaged over
    /// rate categories, in site order.
    pub fn site_log_likelihoods(&self, model: &ModelView<'_>) -> Vec<f64> {
        let ln_cat = (model.rates.len() as f64).ln();
        let steps = model.tree.preorder();
        let mut block = self.scratch(model.tree);
        self.range
            .sites()
            .map(|site| {
                let profile = &model.profiles[model.allocation[site]];
                let lnl: Vec<f64> = model
                    .rates
                    .iter()
                    .map(|&r| prune_site(&self.alignment, site, model.tree, &steps, profile, r, &mut block))
                    .collect();
                log_sum_exp(&lnl) - ln_cat
            })
            .collect()
    }

    /// Log-likelihood of the slice integrated over mixture components and
    /// rate categories.
    pub fn full_log_likelihood(&self, model: &ModelView<'_>) -> f64 {
        marginal_log_likelihood(&self.alignment, self.range, model)
    }

    fn scratch(&self, tree: &Tree) -> Vec<f64> {
        vec![0.0; tree.n_nodes() * self.alignment.n_states()]
    }

    fn prune(&self, model: &ModelView<'_>) -> Conditionals {
        let tree = model.tree;
        let steps = tree.preorder();
        let n_cat = model.rates.len();
        let n_nodes = tree.n_nodes();
        let n_states = self.alignment.n_states();
        let len = n_nodes * n_states;
        let mut values = vec![0.0; self.range.len() * n_cat * len];
        let mut site_lnl = Vec::with_capacity(self.range.len() * n_cat);
        for (local, site) in self.range.sites().enumerate() {
            let profile = &model.profiles[model.allocation[site]];
            for (cat, &rate) in model.rates.iter().enumerate() {
                let start = (local * n_cat + cat) * len;
                let block = &mut values[start..start + len];
                site_lnl.push(prune_site(&self.alignment, site, tree, &steps, profile, rate, block));
            }
        }
        Conditionals {
            n_cat,
            n_nodes,
            n_states,
            values,
            site_lnl,
        }
    }
}

#[inline]
fn node_vector(block: &[f64], node: usize, n_states: usize) -> &[f64] {
    &block[node * n_states..(node + 1) * n_states]
}

/// Log-likelihood of `range` integrated over mixture components and rate
/// categories. Also used to score held-out alignments.
pub fn marginal_log_likelihood(
    alignment: &SequenceAlignment,
    range: SiteRange,
    model: &ModelView<'_>,
) -> f64 {
    let steps = model.tree.preorder();
    let ln_cat = (model.rates.len() as f64).ln();
    let mut block = vec![0.0; model.tree.n_nodes() * alignment.n_states()];
    let mut terms = Vec::with_capacity(model.profiles.len() * model.rates.len());
    range
        .sites()
        .map(|site| {
            terms.clear();
            for (profile, &weight) in model.profiles.iter().zip(model.weights) {
                if weight <= 0.0 {
                    continue;
                }
                for &rate in model.rates {
                    let lnl = prune_site(alignment, site, model.tree, &steps, profile, rate, &mut block);
                    terms.push(weight.ln() + lnl - ln_cat);
                }
            }
            log_sum_exp(&terms)
        })
        .sum()
}

/// Felsenstein pruning of one site at one rate. Fills `block` with the
/// rescaled conditional vector of every node and returns the site
/// log-likelihood.
fn prune_site(
    alignment: &SequenceAlignment,
    site: usize,
    tree: &Tree,
    steps: &[Step],
    profile: &[f64],
    rate: f64,
    block: &mut [f64],
) -> f64 {
    let n_states = profile.len();
    for node in 0..tree.n_nodes() {
        let vector = &mut block[node * n_states..(node + 1) * n_states];
        if tree.is_leaf(node) {
            let state = alignment.state(node, site);
            for (a, v) in vector.iter_mut().enumerate() {
                *v = if state == UNKNOWN || state as usize == a { 1.0 } else { 0.0 };
            }
        } else {
            vector.fill(1.0);
        }
    }

    let mut ln_scale = 0.0;
    for step in steps.iter().rev() {
        let child = step.child * n_states;
        if !tree.is_leaf(step.child) {
            let max = block[child..child + n_states].iter().copied().fold(0.0, f64::max);
            if max > 0.0 {
                block[child..child + n_states].iter_mut().for_each(|v| *v /= max);
                ln_scale += max.ln();
            }
        }
        let stay = (-rate * tree.length(step.edge)).exp();
        let mean: f64 = profile
            .iter()
            .zip(&block[child..child + n_states])
            .map(|(p, l)| p * l)
            .sum();
        let parent = step.parent * n_states;
        for a in 0..n_states {
            let message = stay * block[child + a] + (1.0 - stay) * mean;
            block[parent + a] *= message;
        }
    }

    let anchor = tree.anchor() * n_states;
    let max = block[anchor..anchor + n_states].iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        block[anchor..anchor + n_states].iter_mut().for_each(|v| *v /= max);
        ln_scale += max.ln();
    }
    let root: f64 = profile
        .iter()
        .zip(&block[anchor..anchor + n_states])
        .map(|(p, l)| p * l)
        .sum();
    root.ln() + ln_scale
}

/// Number of events on a branch given its end states, with `mu` the
/// expected number of events and `stay_target` the profile entry of the
/// start state.
fn sample_event_count<R: Rng + ?Sized>(
    rng: &mut R,
    from: usize,
    to: usize,
    mu: f64,
    stay_target: f64,
) -> u32 {
    if mu <= 0.0 {
        return 0;
    }
    if from != to {
        return random::truncated_poisson(rng, mu);
    }
    let none = (-mu).exp();
    let some = -(-mu).exp_m1() * stay_target;
    if rng.random::<f64>() * (none + some) < none {
        0
    } else {
        random::truncated_poisson(rng, mu)
    }
}
