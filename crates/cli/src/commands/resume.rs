use anyhow::{Context, Result};
use phylomix_chain::chain::ResumeOptions;
use phylomix_chain::LocalPool;

use crate::args::ResumeArgs;
use crate::printing::print_chain_parameters;
use crate::utils::{drive, ChainFiles};

pub fn resume_chain(args: &ResumeArgs) -> Result<()> {
    println!("🌳 Phylomix - Resuming Chain");
    println!("============================================\n");

    let files = ChainFiles::new(&args.name);
    let mut options = ResumeOptions::new(args.schedule.trace_likelihood());
    options.fixed_branch_lengths = args.fixed_lengths;
    options.seed = args.seed;

    let mut pool = LocalPool::resume(&files.param, &options, args.schedule.n_procs)
        .with_context(|| format!("Failed to resume from {}", files.param.display()))?;
    // Checkpoints without a sweep count continue from the trace.
    let start = match pool.chain().iteration() {
        0 => files.recorded_sweeps()?,
        sweep => sweep,
    };
    pool.chain_mut().set_iteration(start);
    let dropped = files.rewind_trace(start)?;
    if dropped > 0 {
        log::warn!("dropped {dropped} trace records written after the checkpoint");
    }

    println!("📂 Loaded checkpoint at sweep {start}");
    print_chain_parameters(pool.chain().config(), &args.schedule);
    if start >= args.schedule.until {
        println!("✓ Chain already complete!");
        return pool.finish().context("Worker failed");
    }
    drive(pool, &files, &args.schedule, false)?;

    println!("\n✓ Chain complete!");
    println!("  Final sweep: {}", args.schedule.until);
    Ok(())
}
