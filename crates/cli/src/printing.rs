use phylomix_chain::chain::{ChainConfig, ComponentCount, TraceLikelihood};

use crate::args::ScheduleArgs;

pub fn print_chain_parameters(config: &ChainConfig, schedule: &ScheduleArgs) {
    println!("📁 Data");
    println!("  • Alignment: {} [--data]", config.data_file.display());
    println!("  • Starting Tree: {} [--tree]", config.tree);
    if config.remove_constant_sites {
        println!("  • Constant sites removed [--dc]");
    }

    println!("\n🧪 Model");
    println!(
        "  • Rate Categories: {} (discrete Gamma) [--ncat]",
        config.n_rate_categories
    );
    if config.mixture.empirical {
        println!(
            "  • Profiles: empirical mixture from {} [--empirical]",
            config.mixture.mixture_type
        );
    } else {
        let count = match config.components {
            ComponentCount::Fixed(n) => n.to_string(),
            ComponentCount::PerSite => "one per site".to_string(),
        };
        let mode = if config.mixture.fixed_count { "fixed" } else { "free" };
        println!("  • Components: {count}, {mode} count [--ncomp]");
    }
    println!(
        "  • Dirichlet Weight Prior: {} [--dir-weight-prior]",
        config.dir_weight_prior
    );

    println!("\n🌲 Tree Moves");
    if config.fixed_topology {
        println!("  • Topology: fixed [--fixed-topo]");
    } else {
        println!(
            "  • Topology: {} SPR and {} NNI per sweep [--nspr, --nni]",
            config.n_spr, config.n_nni
        );
    }
    if config.fixed_branch_lengths {
        println!("  • Branch Lengths: fixed [--fixed-lengths]");
    }

    println!("\n⚙️  Schedule");
    println!("  • Processes: {} [--np]", schedule.n_procs);
    println!("  • Sweeps: {} [--until]", schedule.until);
    println!("  • Checkpoint Every: {} sweeps [--save-every]", schedule.save_every);
    let traced = match config.trace_likelihood {
        TraceLikelihood::Cached => "cached",
        TraceLikelihood::Full => "integrated over components",
    };
    println!("  • Trace Likelihood: {traced} [--full-trace]");
    match config.seed {
        Some(seed) => println!("  • Seed: {seed} [--seed]"),
        None => println!("  • Seed: random"),
    }
    println!();
}
