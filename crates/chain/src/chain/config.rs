//! Chain configuration.
//!
//! A [`ChainConfig`] carries everything a fresh chain needs. It can be
//! written and read as JSON, so a run is fully described by one file, and
//! everything except the runtime-only fields is also persisted in the
//! checkpoint header.

use crate::errors::BuilderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the starting topology comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeSource {
    /// Random topology drawn on the coordinator and broadcast.
    Random,
    /// Newick file, read by every process.
    File(PathBuf),
}

impl TreeSource {
    /// Parse a command-line value: `none` (any case) means a random tree.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("none") {
            Self::Random
        } else {
            Self::File(PathBuf::from(value))
        }
    }
}

impl fmt::Display for TreeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "None"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Number of mixture components. Serialized as an integer where `-1`
/// stands for one component per site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ComponentCount {
    Fixed(usize),
    PerSite,
}

impl ComponentCount {
    /// Component count for an alignment of `n_site` sites.
    pub fn resolve(self, n_site: usize) -> usize {
        match self {
            Self::Fixed(n) => n,
            Self::PerSite => n_site.max(1),
        }
    }
}

impl TryFrom<i64> for ComponentCount {
    type Error = BuilderError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::PerSite),
            n if n >= 1 => Ok(Self::Fixed(n as usize)),
            n => Err(BuilderError::InvalidParameter(format!(
                "component count must be positive or -1, got {n}"
            ))),
        }
    }
}

impl From<ComponentCount> for i64 {
    fn from(count: ComponentCount) -> Self {
        match count {
            ComponentCount::Fixed(n) => n as i64,
            ComponentCount::PerSite => -1,
        }
    }
}

/// Mixture options persisted together in the checkpoint header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixtureFlags {
    /// Disable the birth/death move on the component count.
    pub fixed_count: bool,
    /// Read fixed profiles and weights from the file named by `mixture_type`.
    pub empirical: bool,
    /// Free-form label; the profile file path for empirical mixtures.
    pub mixture_type: String,
}

impl Default for MixtureFlags {
    fn default() -> Self {
        Self {
            fixed_count: false,
            empirical: false,
            mixture_type: "None".to_string(),
        }
    }
}

/// Which log-likelihood the trace reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLikelihood {
    /// Value cached by the last unfold or accepted proposal.
    Cached,
    /// Recomputed with mixture components integrated out.
    Full,
}

/// Complete description of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub data_file: PathBuf,
    pub tree: TreeSource,
    pub n_rate_categories: usize,
    pub components: ComponentCount,
    #[serde(default)]
    pub mixture: MixtureFlags,
    /// Rate of the exponential prior on Dirichlet weights; 0 means rate 1.
    #[serde(default)]
    pub dir_weight_prior: f64,
    #[serde(default)]
    pub fixed_topology: bool,
    #[serde(default = "default_n_spr")]
    pub n_spr: usize,
    #[serde(default)]
    pub n_nni: usize,
    #[serde(default)]
    pub remove_constant_sites: bool,
    /// Runtime only; never written to a checkpoint.
    #[serde(default)]
    pub fixed_branch_lengths: bool,
    /// Base seed; rank `r` seeds its generator with `seed + r`.
    #[serde(default)]
    pub seed: Option<u64>,
    pub trace_likelihood: TraceLikelihood,
}

fn default_n_spr() -> usize {
    10
}

impl ChainConfig {
    /// Load a JSON configuration and validate it.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, BuilderError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            BuilderError::InvalidParameter(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| BuilderError::InvalidParameter(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check value ranges and that every field written to the whitespace
    /// separated checkpoint header is a single token.
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.n_rate_categories == 0 {
            return Err(BuilderError::InvalidParameter(
                "n_rate_categories must be at least 1".to_string(),
            ));
        }
        if let ComponentCount::Fixed(0) = self.components {
            return Err(BuilderError::InvalidParameter(
                "component count must be positive or -1".to_string(),
            ));
        }
        if !(self.dir_weight_prior >= 0.0 && self.dir_weight_prior.is_finite()) {
            return Err(BuilderError::InvalidParameter(format!(
                "dir_weight_prior must be non-negative, got {}",
                self.dir_weight_prior
            )));
        }
        single_token("data_file", &self.data_file.to_string_lossy())?;
        single_token("mixture_type", &self.mixture.mixture_type)?;
        if let TreeSource::File(path) = &self.tree {
            single_token("tree", &path.to_string_lossy())?;
        }
        Ok(())
    }

    /// Seed of the generator on `rank`.
    pub fn rank_seed(&self, rank: usize) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(rank as u64))
    }
}

fn single_token(field: &str, value: &str) -> Result<(), BuilderError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(BuilderError::InvalidParameter(format!(
            "{field} must be a non-empty path without whitespace, got '{value}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChainConfig {
        ChainConfig {
            data_file: PathBuf::from("data.fasta"),
            tree: TreeSource::Random,
            n_rate_categories: 4,
            components: ComponentCount::PerSite,
            mixture: MixtureFlags::default(),
            dir_weight_prior: 0.0,
            fixed_topology: false,
            n_spr: 10,
            n_nni: 0,
            remove_constant_sites: false,
            fixed_branch_lengths: false,
            seed: Some(7),
            trace_likelihood: TraceLikelihood::Cached,
        }
    }

    #[test]
    fn test_tree_source_parse() {
        assert_eq!(TreeSource::parse("None"), TreeSource::Random);
        assert_eq!(TreeSource::parse("NONE"), TreeSource::Random);
        assert_eq!(
            TreeSource::parse("start.tre"),
            TreeSource::File(PathBuf::from("start.tre"))
        );
        assert_eq!(TreeSource::Random.to_string(), "None");
    }

    #[test]
    fn test_component_count_sentinel() {
        assert_eq!(ComponentCount::try_from(-1).unwrap(), ComponentCount::PerSite);
        assert_eq!(ComponentCount::try_from(3).unwrap(), ComponentCount::Fixed(3));
        assert!(ComponentCount::try_from(0).is_err());
        assert!(ComponentCount::try_from(-2).is_err());
        assert_eq!(ComponentCount::PerSite.resolve(30), 30);
        assert_eq!(i64::from(ComponentCount::PerSite), -1);
    }

    #[test]
    fn test_json_round_trip() {
        let c = config();
        let json = c.to_json();
        assert!(json.contains("\"components\": -1"));
        let back: ChainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_json_defaults_and_required_trace_likelihood() {
        let minimal = r#"{"data_file": "a.phy", "tree": "random",
                          "n_rate_categories": 4, "components": 2,
                          "trace_likelihood": "full"}"#;
        let c: ChainConfig = serde_json::from_str(minimal).unwrap();
        assert_eq!(c.n_spr, 10);
        assert_eq!(c.n_nni, 0);
        assert_eq!(c.components, ComponentCount::Fixed(2));
        assert_eq!(c.trace_likelihood, TraceLikelihood::Full);

        let missing = r#"{"data_file": "a.phy", "tree": "random",
                          "n_rate_categories": 4, "components": 2}"#;
        assert!(serde_json::from_str::<ChainConfig>(missing).is_err());
    }

    #[test]
    fn test_validate_rejects_whitespace_paths() {
        let mut c = config();
        assert!(c.validate().is_ok());
        c.data_file = PathBuf::from("my data.fasta");
        assert!(c.validate().is_err());
        let mut c = config();
        c.n_rate_categories = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rank_seed() {
        let c = config();
        assert_eq!(c.rank_seed(3), Some(10));
        assert_eq!(ChainConfig { seed: None, ..c }.rank_seed(3), None);
    }
}
