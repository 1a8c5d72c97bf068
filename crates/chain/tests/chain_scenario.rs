//! Integration tests running full chains over an in-process pool.

use phylomix_chain::chain::{ChainBuilder, ChainConfig, LocalPool, TraceLikelihood, TraceRecord};
use phylomix_chain::errors::ChainError;
use phylomix_chain::process::Representation;
use phylomix_chain::tree::MIN_BRANCH_LENGTH;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TAXA: [&str; 6] = ["human", "chimp", "gorilla", "orang", "gibbon", "macaque"];

/// Deterministic DNA alignment with a mix of conserved and variable sites.
fn alignment_text(n_site: usize, taxa: &[&str]) -> String {
    let symbols = b"ACGT";
    let mut text = String::new();
    for (t, name) in taxa.iter().enumerate() {
        text.push('>');
        text.push_str(name);
        text.push('\n');
        for s in 0..n_site {
            let state = match s % 5 {
                0 => s % 4,
                1 => (s + t / 3) % 4,
                2 => (s + t / 2) % 4,
                _ => (s * 7 + t * (s % 3)) % 4,
            };
            text.push(symbols[state] as char);
        }
        text.push('\n');
    }
    text
}

fn write_alignment(dir: &TempDir, name: &str, n_site: usize) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, alignment_text(n_site, &TAXA)).unwrap();
    path
}

fn base_config(data: &Path) -> ChainBuilder {
    ChainBuilder::new()
        .data_file(data)
        .tree("None")
        .rate_categories(4)
        .components(-1)
        .trace_likelihood(TraceLikelihood::Cached)
        .seed(11)
}

fn check_state(config: &ChainConfig, pool: &LocalPool) {
    let chain = pool.chain();
    assert_eq!(chain.representation(), Representation::Unfolded);
    assert!(chain.log_likelihood().is_finite());
    chain.tree().validate().unwrap();
    assert!(chain.tree().edges().iter().all(|e| e.length >= MIN_BRANCH_LENGTH));

    let n_components = chain.n_components();
    assert_eq!(chain.weights().len(), n_components);
    assert!((chain.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
    for profile in chain.profiles() {
        assert!((profile.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(profile.iter().all(|&f| f >= 1e-12));
    }
    assert!(chain.allocation().iter().all(|&z| z < n_components));
    assert!(chain
        .rate_categories()
        .iter()
        .all(|&c| c < config.n_rate_categories));
    assert!((0.01..=100.0).contains(&chain.rate_shape()));
}

#[test]
fn test_fixed_topology_chain_over_four_ranks() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "aln.fasta", 30);
    let config = base_config(&data).fixed_topology(true).build().unwrap();

    let mut pool = LocalPool::start(&config, 4).unwrap();
    let splits = pool.chain().tree().splits();
    assert_eq!(pool.chain().n_components(), 30);
    assert_eq!(pool.chain().iteration(), 0);

    for sweep in 1..=5 {
        let ret = pool.chain_mut().step(1.0).unwrap();
        assert_eq!(ret, 1.0);
        assert_eq!(pool.chain().iteration(), sweep);
        check_state(&config, &pool);
        assert_eq!(pool.chain().tree().splits(), splits);
    }

    let chain = pool.chain_mut();
    let cached = chain.log_likelihood();
    let recomputed = chain.recompute_log_likelihood().unwrap();
    assert!((cached - recomputed).abs() < 1e-9);

    // The cached value is conditional on the allocation; per-site values
    // add up to it.
    let per_site = chain.site_log_likelihoods().unwrap();
    assert_eq!(per_site.len(), 30);
    assert!((per_site.iter().sum::<f64>() - cached).abs() < 1e-6);

    let full = chain.full_log_likelihood().unwrap();
    assert!(full.is_finite() && full < 0.0);
    pool.finish().unwrap();
}

#[test]
fn test_topology_moves_keep_tree_valid() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "aln.fasta", 24);
    let config = base_config(&data)
        .components(3)
        .topology_budget(5, 5)
        .seed(3)
        .build()
        .unwrap();
    let mut pool = LocalPool::start(&config, 3).unwrap();
    for _ in 0..5 {
        pool.chain_mut().step(1.0).unwrap();
        check_state(&config, &pool);
    }
    pool.finish().unwrap();
}

#[test]
fn test_fixed_tree_and_lengths_from_file() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "aln.fasta", 20);
    let tree_path = dir.path().join("start.tre");
    fs::write(
        &tree_path,
        "((human:0.1,chimp:0.1):0.05,(gorilla:0.2,orang:0.2):0.05,(gibbon:0.3,macaque:0.3):0.1);",
    )
    .unwrap();
    let config = base_config(&data)
        .tree(tree_path.to_str().unwrap())
        .components(2)
        .fixed_topology(true)
        .fixed_branch_lengths(true)
        .build()
        .unwrap();
    let mut pool = LocalPool::start(&config, 2).unwrap();
    let before = pool.chain().tree().clone();
    assert!((before.total_length() - 1.4).abs() < 1e-12);
    pool.chain_mut().run(3, 1.0).unwrap();
    assert_eq!(pool.chain().tree(), &before);
    check_state(&config, &pool);
    pool.finish().unwrap();
}

#[test]
fn test_trace_records_every_sweep() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "aln.fasta", 15);
    let config = base_config(&data)
        .components(2)
        .trace_likelihood(TraceLikelihood::Full)
        .build()
        .unwrap();
    let mut pool = LocalPool::start(&config, 3).unwrap();

    let mut out = Vec::new();
    pool.chain().trace_header(&mut out).unwrap();
    for _ in 0..3 {
        pool.chain_mut().step(1.0).unwrap();
        pool.chain_mut().trace(&mut out).unwrap();
    }
    // Timers were reset by the last record.
    pool.chain_mut().trace(&mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[0],
        "#time\ttime\ttopo\tloglik\tlength\talpha\tNmode\tstatent\tstatalpha\tallocvec"
    );
    for (i, line) in lines[1..4].iter().enumerate() {
        let record = TraceRecord::parse(line).unwrap();
        assert_eq!(record.iteration, i + 1);
        assert!(record.topology_percent <= 100);
        assert!(record.log_likelihood < 0.0);
        assert_eq!(record.allocation.len(), 15);
        assert!(!line.ends_with(','));
    }
    let idle = TraceRecord::parse(lines[4]).unwrap();
    assert_eq!(idle.seconds, 0.0);
    assert_eq!(idle.topology_percent, 0);
    assert_eq!(TraceRecord::last_iteration(&text), Some(3));
    pool.finish().unwrap();
}

#[test]
fn test_cross_validation_and_worker_failure() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "train.fasta", 20);
    let test_path = dir.path().join("test.fasta");
    // Same taxa in another order.
    let mut reversed = TAXA;
    reversed.reverse();
    fs::write(&test_path, alignment_text(9, &reversed)).unwrap();

    let config = base_config(&data).components(2).build().unwrap();
    let mut pool = LocalPool::start(&config, 3).unwrap();
    pool.chain_mut().step(1.0).unwrap();

    let score = pool.chain_mut().cross_validation(&test_path).unwrap();
    assert!(score.is_finite() && score < 0.0);

    let missing = dir.path().join("missing.fasta");
    let err = pool.chain_mut().cross_validation(&missing).unwrap_err();
    assert!(matches!(err, ChainError::Worker { rank: 1, .. }));

    // A failed query leaves the chain usable.
    pool.chain_mut().step(1.0).unwrap();
    check_state(&config, &pool);
    pool.finish().unwrap();
}

#[test]
fn test_empirical_mixture_keeps_profiles() {
    let dir = TempDir::new().unwrap();
    let data = write_alignment(&dir, "aln.fasta", 20);
    let profiles = dir.path().join("mix.txt");
    fs::write(&profiles, "2\n0.5 0.4 0.2 0.2 0.2\n0.5 0.1 0.3 0.3 0.3\n").unwrap();
    let config = base_config(&data)
        .empirical_mixture(profiles.to_str().unwrap())
        .build()
        .unwrap();
    let mut pool = LocalPool::start(&config, 2).unwrap();
    let before = pool.chain().profiles().to_vec();
    assert_eq!(before.len(), 2);
    pool.chain_mut().run(2, 1.0).unwrap();
    assert_eq!(pool.chain().profiles(), before.as_slice());
    assert_eq!(pool.chain().n_components(), 2);
    pool.finish().unwrap();
}

#[test]
fn test_bad_alignment_fails_every_rank() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("bad.fasta");
    fs::write(&data, ">a\nACGT\n>b\nACG\n>c\nACGT\n").unwrap();
    let config = base_config(&data).build().unwrap();
    let err = LocalPool::start(&config, 3).err().unwrap();
    assert!(matches!(err, ChainError::Data(_)));
}
