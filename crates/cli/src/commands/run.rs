use anyhow::{bail, Context, Result};
use phylomix_chain::LocalPool;

use crate::args::RunArgs;
use crate::printing::print_chain_parameters;
use crate::utils::{drive, ChainFiles};

pub fn run_chain(args: &RunArgs) -> Result<()> {
    println!("🌳 Phylomix - Running Chain");
    println!("============================================\n");

    let files = ChainFiles::new(&args.name);
    if files.exist() && !args.force {
        bail!(
            "Chain '{}' already exists; use `phylomix resume {}` or pass --force",
            args.name,
            args.name
        );
    }
    let config = args.to_config()?;
    print_chain_parameters(&config, &args.schedule);

    let pool = LocalPool::start(&config, args.schedule.n_procs)
        .with_context(|| format!("Failed to start chain '{}'", args.name))?;
    println!(
        "✓ Chain ready: {} taxa, {} sites, initial log-likelihood {:.4}",
        pool.chain().taxa().len(),
        pool.chain().alignment().n_site(),
        pool.chain().log_likelihood()
    );
    drive(pool, &files, &args.schedule, true)?;

    println!("\n✓ Chain complete!");
    println!("  Trace: {}", files.trace.display());
    println!("  Checkpoint: {}", files.param.display());
    Ok(())
}
