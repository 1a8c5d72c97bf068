//! Discrete Gamma rates across sites.

use super::substitution::MappingStatistics;
use super::traits::StochasticProcess;
use crate::base::special::{discrete_gamma_rates, log_sum_exp};
use crate::base::{random, TokenReader};
use crate::errors::CheckpointError;
use crate::tree::Tree;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

/// Bounds on the Gamma shape; proposals outside are rejected.
pub const MIN_ALPHA: f64 = 0.01;
pub const MAX_ALPHA: f64 = 100.0;

/// Rate heterogeneity as `n_cat` equiprobable discrete Gamma categories of
/// mean one, with an exponential(1) prior on the shape `alpha`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateProcess {
    alpha: f64,
    rates: Vec<f64>,
    categories: Vec<usize>,
}

impl RateProcess {
    pub fn new(n_cat: usize, n_site: usize) -> Self {
        let alpha = 1.0;
        Self {
            alpha,
            rates: discrete_gamma_rates(alpha, n_cat),
            categories: vec![0; n_site],
        }
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Category rates, ascending.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn categories(&self) -> &[usize] {
        &self.categories
    }

    #[inline]
    pub fn n_cat(&self) -> usize {
        self.rates.len()
    }

    /// Rate of `site` under its current category.
    #[inline]
    pub fn site_rate(&self, site: usize) -> f64 {
        self.rates[self.categories[site]]
    }

    /// Sum of the site rates.
    pub fn total_rate(&self) -> f64 {
        self.categories.iter().map(|&c| self.rates[c]).sum()
    }

    /// Adopt the categories drawn with a substitution mapping.
    pub fn set_categories(&mut self, stats: &MappingStatistics) {
        for s in &stats.sites {
            self.categories[s.site] = s.category;
        }
    }

    fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
        self.rates = discrete_gamma_rates(alpha, self.rates.len());
    }

    /// Mapping-conditioned move: `n_rep` scale moves on `alpha` against the
    /// category-marginal likelihood of the event counts, then a Gibbs draw
    /// of every site's category. `tree_length` is the total branch length.
    /// Returns the acceptance rate of the shape moves.
    pub fn move_collapsed<R: Rng + ?Sized>(
        &mut self,
        tuning: f64,
        n_rep: usize,
        stats: &MappingStatistics,
        tree_length: f64,
        rng: &mut R,
    ) -> f64 {
        let histogram = event_histogram(stats);
        let mut current = self.log_marginal(&self.rates, &histogram, tree_length) - self.alpha;
        let mut accepted = 0;
        for _ in 0..n_rep {
            let m = random::scale_factor(rng, tuning);
            let proposed = self.alpha * m;
            if !(MIN_ALPHA..=MAX_ALPHA).contains(&proposed) {
                continue;
            }
            let rates = discrete_gamma_rates(proposed, self.rates.len());
            let candidate = self.log_marginal(&rates, &histogram, tree_length) - proposed;
            if random::accept(rng, candidate - current + m.ln()) {
                self.alpha = proposed;
                self.rates = rates;
                current = candidate;
                accepted += 1;
            }
        }
        self.resample_categories(stats, tree_length, rng);
        accepted as f64 / n_rep.max(1) as f64
    }

    /// Gibbs draw of the category of every site given its event count.
    pub fn resample_categories<R: Rng + ?Sized>(
        &mut self,
        stats: &MappingStatistics,
        tree_length: f64,
        rng: &mut R,
    ) {
        let mut log_weights = vec![0.0; self.rates.len()];
        for s in &stats.sites {
            for (w, &r) in log_weights.iter_mut().zip(&self.rates) {
                *w = category_log_weight(r, s.n_sub, tree_length);
            }
            self.categories[s.site] = random::categorical_log(rng, &log_weights);
        }
    }

    fn log_marginal(&self, rates: &[f64], histogram: &BTreeMap<u32, usize>, tree_length: f64) -> f64 {
        let ln_cat = (rates.len() as f64).ln();
        let mut terms = vec![0.0; rates.len()];
        histogram
            .iter()
            .map(|(&n_sub, &n_sites)| {
                for (t, &r) in terms.iter_mut().zip(rates) {
                    *t = category_log_weight(r, n_sub, tree_length);
                }
                n_sites as f64 * (log_sum_exp(&terms) - ln_cat)
            })
            .sum()
    }
}

/// `ln(r^n exp(-r L))`, with `0^0 = 1`.
fn category_log_weight(rate: f64, n_sub: u32, tree_length: f64) -> f64 {
    let power = if n_sub == 0 { 0.0 } else { f64::from(n_sub) * rate.ln() };
    power - rate * tree_length
}

fn event_histogram(stats: &MappingStatistics) -> BTreeMap<u32, usize> {
    let mut histogram = BTreeMap::new();
    for s in &stats.sites {
        *histogram.entry(s.n_sub).or_insert(0) += 1;
    }
    histogram
}

impl StochasticProcess for RateProcess {
    fn sample<R: Rng + ?Sized>(&mut self, _tree: &mut Tree, rng: &mut R) {
        let alpha = random::gamma(rng, 1.0, 1.0).clamp(MIN_ALPHA, MAX_ALPHA);
        self.set_alpha(alpha);
        let n_cat = self.rates.len();
        for c in &mut self.categories {
            *c = rng.random_range(0..n_cat);
        }
    }

    fn to_stream<W: Write>(&self, _tree: &Tree, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.alpha)?;
        writeln!(out, "{}", self.categories.len())?;
        let categories: Vec<String> = self.categories.iter().map(usize::to_string).collect();
        writeln!(out, "{}", categories.join("\t"))
    }

    fn from_stream<R: BufRead>(
        &mut self,
        _tree: &mut Tree,
        tokens: &mut TokenReader<R>,
    ) -> Result<(), CheckpointError> {
        let alpha: f64 = tokens.parse("rate shape")?;
        if !(alpha > 0.0) {
            return Err(CheckpointError::Malformed {
                field: "rate shape",
                value: alpha.to_string(),
            });
        }
        let n_site: usize = tokens.parse("rate site count")?;
        if n_site != self.categories.len() {
            return Err(CheckpointError::Malformed {
                field: "rate site count",
                value: n_site.to_string(),
            });
        }
        let categories: Vec<usize> = tokens.parse_vec(n_site, "rate category")?;
        if let Some(&bad) = categories.iter().find(|&&c| c >= self.rates.len()) {
            return Err(CheckpointError::Malformed {
                field: "rate category",
                value: bad.to_string(),
            });
        }
        self.set_alpha(alpha);
        self.categories = categories;
        Ok(())
    }
}
