mod args;
mod commands;
pub mod defaults;
mod printing;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use args::{ResumeArgs, RunArgs};
use commands::{inspect, resume, run};

/// Phylomix: Bayesian phylogenetics under a finite profile mixture
///
/// Samples trees, branch lengths, Gamma rates across sites and a mixture of
/// equilibrium frequency profiles with a pool of one coordinator and
/// several workers, each worker owning a block of sites.
#[derive(Parser, Debug)]
#[command(name = "phylomix")]
#[command(author, version, about = "MCMC sampler for CAT-Poisson mixture phylogenetics", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new chain.
    ///
    /// Writes one trace record per sweep to <name>.trace and a checkpoint
    /// to <name>.param.
    Run(Box<RunArgs>),

    /// Continue a chain from its checkpoint.
    ///
    /// The sweep count continues from the checkpoint; trace records written
    /// after it are dropped.
    Resume(ResumeArgs),

    /// Show the header of a checkpoint file.
    Inspect {
        /// Checkpoint path
        checkpoint: PathBuf,

        /// Print the stored settings as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            run::run_chain(&args)?;
        }
        Commands::Resume(args) => {
            resume::resume_chain(&args)?;
        }
        Commands::Inspect { checkpoint, json } => {
            inspect::show_header(&checkpoint, json)?;
        }
    }

    Ok(())
}
