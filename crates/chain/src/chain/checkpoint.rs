//! Checkpoint header: a versioned, whitespace-separated text prologue.
//!
//! The header lists, in a fixed order and without tags, the settings a
//! chain is rebuilt from, followed by the tree in Newick format. Fields
//! added after the first release are only present from the version that
//! introduced them; older files get their default value. The parameter
//! body that follows is written by the sub-processes themselves.

use crate::base::TokenReader;
use crate::chain::{ChainConfig, ComponentCount, MixtureFlags, TraceLikelihood, TreeSource};
use crate::errors::CheckpointError;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Checkpoint format version, compared on `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// Version written by this build.
pub const CURRENT_VERSION: FormatVersion = FormatVersion::new(1, 8);

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for FormatVersion {
    type Err = CheckpointError;

    /// Reads the leading `major.minor`; anything after the minor digits
    /// (a patch number, a suffix) is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CheckpointError::Malformed {
            field: "version",
            value: s.to_string(),
        };
        let (major, rest) = s.split_once('.').ok_or_else(malformed)?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: digits.parse().map_err(|_| malformed())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionalField {
    TopologyBudget,
    DirWeightPrior,
}

struct FieldRule {
    field: OptionalField,
    since: FormatVersion,
}

const OPTIONAL_FIELDS: [FieldRule; 2] = [
    FieldRule {
        field: OptionalField::TopologyBudget,
        since: FormatVersion::new(1, 5),
    },
    FieldRule {
        field: OptionalField::DirWeightPrior,
        since: FormatVersion::new(1, 8),
    },
];

/// Which optional fields a given version carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub dir_weight_prior: bool,
    pub topology_budget: bool,
}

impl HeaderLayout {
    pub fn for_version(version: FormatVersion) -> Self {
        let present = |field| {
            OPTIONAL_FIELDS
                .iter()
                .any(|rule| rule.field == field && version >= rule.since)
        };
        Self {
            dir_weight_prior: present(OptionalField::DirWeightPrior),
            topology_budget: present(OptionalField::TopologyBudget),
        }
    }
}

/// Settings that are not persisted and must be supplied on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeOptions {
    pub trace_likelihood: TraceLikelihood,
    pub fixed_branch_lengths: bool,
    pub seed: Option<u64>,
}

impl ResumeOptions {
    pub fn new(trace_likelihood: TraceLikelihood) -> Self {
        Self {
            trace_likelihood,
            fixed_branch_lengths: false,
            seed: None,
        }
    }
}

/// Parsed header.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointHeader {
    pub version: FormatVersion,
    /// Rebuilt configuration. The component count is not part of the header
    /// and is left at one; the mixture body restores the actual count.
    pub config: ChainConfig,
    pub newick: String,
}

/// Write the header of a chain at [`CURRENT_VERSION`].
pub fn write_header<W: Write>(out: &mut W, config: &ChainConfig, newick: &str) -> io::Result<()> {
    writeln!(out, "{CURRENT_VERSION}")?;
    writeln!(out, "{}", config.data_file.display())?;
    writeln!(out, "{}", config.n_rate_categories)?;
    writeln!(
        out,
        "{}\t{}\t{}",
        u8::from(config.mixture.fixed_count),
        u8::from(config.mixture.empirical),
        config.mixture.mixture_type
    )?;
    writeln!(out, "{}", config.dir_weight_prior)?;
    writeln!(out, "{}", u8::from(config.fixed_topology))?;
    writeln!(out, "{}\t{}", config.n_spr, config.n_nni)?;
    writeln!(out, "{}", u8::from(config.remove_constant_sites))?;
    writeln!(out, "{newick}")
}

/// Read a header written by this or an older version.
pub fn read_header<R: BufRead>(
    tokens: &mut TokenReader<R>,
    options: &ResumeOptions,
) -> Result<CheckpointHeader, CheckpointError> {
    let raw_version = tokens.token("version")?;
    let version: FormatVersion = raw_version.parse()?;
    if version > CURRENT_VERSION {
        return Err(CheckpointError::Malformed {
            field: "version",
            value: raw_version,
        });
    }
    let layout = HeaderLayout::for_version(version);

    let data_file = PathBuf::from(tokens.token("data file")?);
    let n_rate_categories: usize = tokens.parse("rate category count")?;
    let mixture = MixtureFlags {
        fixed_count: tokens.flag("fixed component count")?,
        empirical: tokens.flag("empirical mixture")?,
        mixture_type: tokens.token("mixture type")?,
    };
    let dir_weight_prior = if layout.dir_weight_prior {
        tokens.parse("dirichlet weight prior")?
    } else {
        0.0
    };
    let fixed_topology = tokens.flag("fixed topology")?;
    let (n_spr, n_nni) = if layout.topology_budget {
        (tokens.parse("spr budget")?, tokens.parse("nni budget")?)
    } else {
        (10, 0)
    };
    let remove_constant_sites = tokens.flag("constant site removal")?;
    let newick = tokens.token("tree")?;

    let config = ChainConfig {
        data_file,
        tree: TreeSource::Random,
        n_rate_categories,
        components: ComponentCount::Fixed(1),
        mixture,
        dir_weight_prior,
        fixed_topology,
        n_spr,
        n_nni,
        remove_constant_sites,
        fixed_branch_lengths: options.fixed_branch_lengths,
        seed: options.seed,
        trace_likelihood: options.trace_likelihood,
    };
    config.validate().map_err(|e| CheckpointError::Malformed {
        field: "header",
        value: e.to_string(),
    })?;
    Ok(CheckpointHeader {
        version,
        config,
        newick,
    })
}

impl fmt::Display for CheckpointHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        writeln!(f, "version               {}", self.version)?;
        writeln!(f, "data file             {}", c.data_file.display())?;
        writeln!(f, "rate categories       {}", c.n_rate_categories)?;
        writeln!(f, "fixed component count {}", c.mixture.fixed_count)?;
        writeln!(f, "empirical mixture     {}", c.mixture.empirical)?;
        writeln!(f, "mixture type          {}", c.mixture.mixture_type)?;
        writeln!(f, "dir weight prior      {}", c.dir_weight_prior)?;
        writeln!(f, "fixed topology        {}", c.fixed_topology)?;
        writeln!(f, "spr / nni budget      {} / {}", c.n_spr, c.n_nni)?;
        writeln!(f, "remove constant sites {}", c.remove_constant_sites)?;
        write!(f, "tree                  {}", self.newick)
    }
}
