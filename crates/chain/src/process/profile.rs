//! Finite mixture of equilibrium-frequency profiles allocated per site.
//!
//! Profiles are drawn from a Dirichlet base distribution whose per-state
//! concentrations (the Dirichlet weights) carry an exponential prior.
//! Component weights have a flat Dirichlet prior. When the component count
//! is free, empty components are created and destroyed by a birth/death
//! move with the weights integrated out; the count has a uniform prior on
//! `1..=n_site`.

use super::substitution::MappingStatistics;
use super::traits::StochasticProcess;
use crate::base::special::{entropy, ln_dirichlet_density, ln_gamma};
use crate::base::{random, TokenReader};
use crate::errors::{CheckpointError, DataError};
use crate::tree::Tree;
use rand::Rng;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Concentration of the symmetric Dirichlet prior on component weights.
const WEIGHT_CONCENTRATION: f64 = 1.0;

/// Fixed profiles and weights read from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalMixture {
    pub weights: Vec<f64>,
    pub profiles: Vec<Vec<f64>>,
}

impl EmpiricalMixture {
    pub fn from_path(path: impl AsRef<Path>, n_states: usize) -> Result<Self, DataError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        Self::parse(&text, n_states)
    }

    /// Parse `K` followed by `K` records of `weight f_1 ... f_n_states`.
    pub fn parse(text: &str, n_states: usize) -> Result<Self, DataError> {
        let mut tokens = text.split_whitespace();
        let mut number = |what: &str| -> Result<f64, DataError> {
            let token = tokens
                .next()
                .ok_or_else(|| DataError::Profiles(format!("missing {what}")))?;
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| DataError::Profiles(format!("bad {what} '{token}'")))
        };
        let k = number("component count")?;
        if k < 1.0 || k.fract() != 0.0 {
            return Err(DataError::Profiles(format!("bad component count {k}")));
        }
        let k = k as usize;
        let mut weights = Vec::with_capacity(k);
        let mut profiles = Vec::with_capacity(k);
        for _ in 0..k {
            weights.push(number("weight")?);
            let mut profile = (0..n_states)
                .map(|_| number("frequency"))
                .collect::<Result<Vec<f64>, _>>()?;
            random::normalize_frequencies(&mut profile);
            profiles.push(profile);
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(DataError::Profiles("weights sum to zero".to_string()));
        }
        weights.iter_mut().for_each(|w| *w /= total);
        Ok(Self { weights, profiles })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixtureProcess {
    n_states: usize,
    /// Component count drawn by `sample`.
    n_initial: usize,
    fixed_count: bool,
    empirical: Option<EmpiricalMixture>,
    dir_weight_prior: f64,
    dir_weights: Vec<f64>,
    profiles: Vec<Vec<f64>>,
    weights: Vec<f64>,
    allocation: Vec<usize>,
}

impl MixtureProcess {
    /// Mixture of `n_components` components over `n_site` sites. With a
    /// free count `n_components` is only the starting point. An empirical
    /// mixture overrides the component count and freezes the profiles and
    /// the count.
    pub fn new(
        n_site: usize,
        n_states: usize,
        n_components: usize,
        fixed_count: bool,
        empirical: Option<EmpiricalMixture>,
        dir_weight_prior: f64,
    ) -> Self {
        let n_components = empirical.as_ref().map_or(n_components, EmpiricalMixture::len);
        let flat = vec![1.0 / n_states as f64; n_states];
        Self {
            n_states,
            n_initial: n_components.max(1),
            fixed_count: fixed_count || empirical.is_some(),
            empirical,
            dir_weight_prior,
            dir_weights: vec![1.0; n_states],
            profiles: vec![flat; n_components.max(1)],
            weights: vec![1.0 / n_components.max(1) as f64; n_components.max(1)],
            allocation: vec![0; n_site],
        }
    }

    pub fn profiles(&self) -> &[Vec<f64>] {
        &self.profiles
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn allocation(&self) -> &[usize] {
        &self.allocation
    }

    pub fn dir_weights(&self) -> &[f64] {
        &self.dir_weights
    }

    #[inline]
    pub fn n_components(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empirical(&self) -> bool {
        self.empirical.is_some()
    }

    /// Sites allocated to each component.
    pub fn occupancy(&self) -> Vec<usize> {
        let mut occupancy = vec![0; self.profiles.len()];
        for &z in &self.allocation {
            occupancy[z] += 1;
        }
        occupancy
    }

    pub fn n_occupied(&self) -> usize {
        self.occupancy().iter().filter(|&&n| n > 0).count()
    }

    /// Mean over sites of the entropy of the allocated profile.
    pub fn stat_entropy(&self) -> f64 {
        if self.allocation.is_empty() {
            return 0.0;
        }
        let per_component: Vec<f64> = self.profiles.iter().map(|p| entropy(p)).collect();
        self.allocation.iter().map(|&z| per_component[z]).sum::<f64>() / self.allocation.len() as f64
    }

    /// Mean Dirichlet weight over states.
    pub fn mean_dir_weight(&self) -> f64 {
        self.dir_weights.iter().sum::<f64>() / self.n_states as f64
    }

    /// Probability that two draws from the profile of `site` differ.
    pub fn site_heterogeneity(&self, site: usize) -> f64 {
        1.0 - self.profiles[self.allocation[site]]
            .iter()
            .map(|f| f * f)
            .sum::<f64>()
    }

    fn dir_weight_rate(&self) -> f64 {
        if self.dir_weight_prior > 0.0 {
            self.dir_weight_prior
        } else {
            1.0
        }
    }

    /// Mapping-conditioned move, repeated `n_rep` times: Gibbs allocation,
    /// birth/death of empty components when the count is free, Gibbs
    /// profiles, `n_profile` rounds of scale moves on the Dirichlet weights,
    /// Gibbs weights. `tuning` scales the Dirichlet-weight moves. Returns
    /// their acceptance rate.
    pub fn move_collapsed<R: Rng + ?Sized>(
        &mut self,
        tuning: f64,
        n_profile: usize,
        n_rep: usize,
        stats: &MappingStatistics,
        rng: &mut R,
    ) -> f64 {
        let none: &[u32] = &[];
        let mut counts = vec![none; self.allocation.len()];
        for s in &stats.sites {
            counts[s.site] = &s.counts;
        }
        let mut accepted = 0;
        let mut tried = 0;
        for _ in 0..n_rep {
            self.resample_allocation(&counts, rng);
            if !self.fixed_count {
                self.birth_death(rng);
            }
            if self.empirical.is_none() {
                self.resample_profiles(&counts, rng);
                for _ in 0..n_profile {
                    accepted += self.move_dir_weights(tuning, rng);
                    tried += self.n_states;
                }
            }
            self.resample_weights(rng);
        }
        accepted as f64 / tried.max(1) as f64
    }

    fn resample_allocation<R: Rng + ?Sized>(&mut self, counts: &[&[u32]], rng: &mut R) {
        let log_profiles: Vec<Vec<f64>> = self
            .profiles
            .iter()
            .map(|p| p.iter().map(|f| f.ln()).collect())
            .collect();
        let log_weights: Vec<f64> = self.weights.iter().map(|w| w.ln()).collect();
        let mut scores = vec![0.0; self.profiles.len()];
        for (site, site_counts) in counts.iter().enumerate() {
            for (k, score) in scores.iter_mut().enumerate() {
                *score = log_weights[k]
                    + site_counts
                        .iter()
                        .zip(&log_profiles[k])
                        .map(|(&c, lf)| f64::from(c) * lf)
                        .sum::<f64>();
            }
            self.allocation[site] = random::categorical_log(rng, &scores);
        }
    }

    /// `ln p(z | K)` with the weights integrated out.
    fn log_allocation_prior(occupancy: &[usize]) -> f64 {
        let k = occupancy.len() as f64;
        let n: usize = occupancy.iter().sum();
        let w0 = WEIGHT_CONCENTRATION;
        ln_gamma(k * w0) - ln_gamma(n as f64 + k * w0)
            + occupancy
                .iter()
                .map(|&nk| ln_gamma(nk as f64 + w0) - ln_gamma(w0))
                .sum::<f64>()
    }

    fn birth_death<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let occupancy = self.occupancy();
        let k = occupancy.len();
        let empty: Vec<usize> = (0..k).filter(|&c| occupancy[c] == 0).collect();
        let current = Self::log_allocation_prior(&occupancy);

        if rng.random::<bool>() {
            if k >= self.allocation.len().max(1) {
                return;
            }
            let position = rng.random_range(0..=k);
            let mut grown = occupancy.clone();
            grown.insert(position, 0);
            let log_ratio = Self::log_allocation_prior(&grown) - current
                + ((k + 1) as f64).ln()
                - ((empty.len() + 1) as f64).ln();
            if random::accept(rng, log_ratio) {
                let profile = random::dirichlet(rng, &self.dir_weights);
                self.profiles.insert(position, profile);
                self.weights.insert(position, 0.0);
                for z in &mut self.allocation {
                    if *z >= position {
                        *z += 1;
                    }
                }
            }
        } else {
            if k <= 1 || empty.is_empty() {
                return;
            }
            let victim = empty[rng.random_range(0..empty.len())];
            let mut shrunk = occupancy.clone();
            shrunk.remove(victim);
            let log_ratio = Self::log_allocation_prior(&shrunk) - current
                + (empty.len() as f64).ln()
                - (k as f64).ln();
            if random::accept(rng, log_ratio) {
                self.profiles.remove(victim);
                self.weights.remove(victim);
                for z in &mut self.allocation {
                    if *z > victim {
                        *z -= 1;
                    }
                }
            }
        }
    }

    fn resample_profiles<R: Rng + ?Sized>(&mut self, counts: &[&[u32]], rng: &mut R) {
        let mut posterior = vec![self.dir_weights.clone(); self.profiles.len()];
        for (site, site_counts) in counts.iter().enumerate() {
            let concentration = &mut posterior[self.allocation[site]];
            for (a, &c) in concentration.iter_mut().zip(site_counts.iter()) {
                *a += f64::from(c);
            }
        }
        for (profile, concentration) in self.profiles.iter_mut().zip(&posterior) {
            *profile = random::dirichlet(rng, concentration);
        }
    }

    fn log_profiles_prior(&self, dir_weights: &[f64]) -> f64 {
        self.profiles
            .iter()
            .map(|p| ln_dirichlet_density(p, dir_weights))
            .sum::<f64>()
            - self.dir_weight_rate() * dir_weights.iter().sum::<f64>()
    }

    /// One scale move per state on the Dirichlet weights. Returns the number
    /// accepted.
    fn move_dir_weights<R: Rng + ?Sized>(&mut self, tuning: f64, rng: &mut R) -> usize {
        let mut accepted = 0;
        let mut current = self.log_profiles_prior(&self.dir_weights);
        for a in 0..self.n_states {
            let m = random::scale_factor(rng, tuning);
            let mut proposed = self.dir_weights.clone();
            proposed[a] *= m;
            let candidate = self.log_profiles_prior(&proposed);
            if random::accept(rng, candidate - current + m.ln()) {
                self.dir_weights = proposed;
                current = candidate;
                accepted += 1;
            }
        }
        accepted
    }

    fn resample_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let concentration: Vec<f64> = self
            .occupancy()
            .iter()
            .map(|&n| WEIGHT_CONCENTRATION + n as f64)
            .collect();
        self.weights = random::dirichlet(rng, &concentration);
    }
}

impl StochasticProcess for MixtureProcess {
    fn sample<R: Rng + ?Sized>(&mut self, _tree: &mut Tree, rng: &mut R) {
        self.dir_weights = vec![1.0; self.n_states];
        match &self.empirical {
            Some(empirical) => {
                self.profiles = empirical.profiles.clone();
                self.weights = empirical.weights.clone();
            }
            None => {
                let k = self.n_initial;
                self.profiles = (0..k)
                    .map(|_| random::dirichlet(rng, &self.dir_weights))
                    .collect();
                self.weights = random::dirichlet(rng, &vec![WEIGHT_CONCENTRATION; k]);
            }
        }
        for z in &mut self.allocation {
            *z = random::categorical(rng, &self.weights);
        }
    }

    fn to_stream<W: Write>(&self, _tree: &Tree, out: &mut W) -> io::Result<()> {
        let join = |values: &[f64]| {
            values
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join("\t")
        };
        writeln!(out, "{}\t{}", self.profiles.len(), self.n_states)?;
        writeln!(out, "{}", join(&self.dir_weights))?;
        for (weight, profile) in self.weights.iter().zip(&self.profiles) {
            writeln!(out, "{}\t{}", weight, join(profile))?;
        }
        writeln!(out, "{}", self.allocation.len())?;
        let allocation: Vec<String> = self.allocation.iter().map(usize::to_string).collect();
        writeln!(out, "{}", allocation.join("\t"))
    }

    fn from_stream<R: BufRead>(
        &mut self,
        _tree: &mut Tree,
        tokens: &mut TokenReader<R>,
    ) -> Result<(), CheckpointError> {
        let malformed = |field: &'static str, value: String| CheckpointError::Malformed { field, value };
        let k: usize = tokens.parse("component count")?;
        let bound = match &self.empirical {
            Some(empirical) => empirical.len(),
            None => self.allocation.len().max(1),
        };
        if k == 0 || k > bound || (self.empirical.is_some() && k != bound) {
            return Err(malformed("component count", k.to_string()));
        }
        let n_states: usize = tokens.parse("state count")?;
        if n_states != self.n_states {
            return Err(malformed("state count", n_states.to_string()));
        }
        let dir_weights: Vec<f64> = tokens.parse_vec(n_states, "dirichlet weight")?;
        let mut weights = Vec::with_capacity(k);
        let mut profiles = Vec::with_capacity(k);
        for _ in 0..k {
            weights.push(tokens.parse::<f64>("component weight")?);
            profiles.push(tokens.parse_vec::<f64>(n_states, "profile")?);
        }
        let n_site: usize = tokens.parse("mixture site count")?;
        if n_site != self.allocation.len() {
            return Err(malformed("mixture site count", n_site.to_string()));
        }
        let allocation: Vec<usize> = tokens.parse_vec(n_site, "allocation")?;
        if let Some(&bad) = allocation.iter().find(|&&z| z >= k) {
            return Err(malformed("allocation", bad.to_string()));
        }
        self.n_initial = k;
        self.dir_weights = dir_weights;
        self.weights = weights;
        self.profiles = profiles;
        self.allocation = allocation;
        Ok(())
    }
}
