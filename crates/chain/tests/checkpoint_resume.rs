//! Save, resume and save again through on-disk checkpoints.

use phylomix_chain::base::TokenReader;
use phylomix_chain::chain::checkpoint::read_header;
use phylomix_chain::chain::{
    ChainBuilder, ChainConfig, FormatVersion, LocalPool, ResumeOptions, TraceLikelihood,
};
use phylomix_chain::errors::{ChainError, CheckpointError};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ALIGNMENT: &str = "\
>a\nACGTACGTTAGGCCTAACGTAGCTAGGA\n\
>b\nACGTACGATAGGCCTAACGAAGCTAGGA\n\
>c\nACCTACGTTAGGCGTAACGTAGCAAGGT\n\
>d\nTCGTACGTTAGCCCTAAAGTAGCTAGCA\n\
>e\nACGTTCGTTAGGCCTTTCGTAGGTAGGA\n\
>f\nACGATCGTTAGGCGTTTCGTACGTAGGA\n";

fn setup(dir: &TempDir) -> ChainConfig {
    let data = dir.path().join("aln.fasta");
    fs::write(&data, ALIGNMENT).unwrap();
    ChainBuilder::new()
        .data_file(data)
        .rate_categories(4)
        .components(3)
        .dir_weight_prior(1.5)
        .topology_budget(4, 2)
        .trace_likelihood(TraceLikelihood::Cached)
        .seed(21)
        .build()
        .unwrap()
}

fn save(pool: &LocalPool, path: &Path) -> String {
    let mut out = Vec::new();
    pool.chain().save(&mut out).unwrap();
    fs::write(path, &out).unwrap();
    String::from_utf8(out).unwrap()
}

fn options() -> ResumeOptions {
    let mut options = ResumeOptions::new(TraceLikelihood::Cached);
    options.seed = Some(5);
    options
}

fn checkpoint(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn test_resume_then_save_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let mut pool = LocalPool::start(&config, 3).unwrap();
    pool.chain_mut().run(3, 1.0).unwrap();
    let first_path = checkpoint(&dir, "first.param");
    let first = save(&pool, &first_path);
    let lnl = pool.chain().log_likelihood();
    let splits = pool.chain().tree().splits();
    let allocation = pool.chain().allocation().to_vec();
    let n_components = pool.chain().n_components();
    pool.finish().unwrap();

    for n_procs in [3, 2, 5] {
        let resumed = LocalPool::resume(&first_path, &options(), n_procs).unwrap();
        let chain = resumed.chain();
        assert!((chain.log_likelihood() - lnl).abs() < 1e-8);
        assert_eq!(chain.tree().splits(), splits);
        assert_eq!(chain.allocation(), allocation.as_slice());
        assert_eq!(chain.n_components(), n_components);
        assert_eq!(chain.config().dir_weight_prior, 1.5);
        assert_eq!((chain.config().n_spr, chain.config().n_nni), (4, 2));

        let again = save(&resumed, &checkpoint(&dir, "again.param"));
        assert_eq!(again, first, "resave over {n_procs} ranks differs");
        resumed.finish().unwrap();
    }
}

#[test]
fn test_resumed_chain_keeps_sampling() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let mut pool = LocalPool::start(&config, 2).unwrap();
    pool.chain_mut().step(1.0).unwrap();
    let path = checkpoint(&dir, "chain.param");
    save(&pool, &path);
    pool.finish().unwrap();

    let mut resumed = LocalPool::resume(&path, &options(), 4).unwrap();
    assert_eq!(resumed.chain().iteration(), 1);
    resumed.chain_mut().run(2, 1.0).unwrap();
    assert_eq!(resumed.chain().iteration(), 3);
    assert!(resumed.chain().log_likelihood().is_finite());
    resumed.finish().unwrap();
}

#[test]
fn test_sweep_count_is_optional_at_the_end() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let mut pool = LocalPool::start(&config, 2).unwrap();
    pool.chain_mut().run(2, 1.0).unwrap();
    let current = save(&pool, &checkpoint(&dir, "current.param"));
    pool.finish().unwrap();
    assert!(current.ends_with("\n2\n"));

    // Drop the last line, as written by releases without the counter.
    let body = current.trim_end_matches('\n');
    let cut = body.rfind('\n').unwrap();
    let legacy = checkpoint(&dir, "legacy.param");
    fs::write(&legacy, format!("{}\n", &body[..cut])).unwrap();
    let resumed = LocalPool::resume(&legacy, &options(), 2).unwrap();
    assert_eq!(resumed.chain().iteration(), 0);
    resumed.finish().unwrap();

    let garbled = checkpoint(&dir, "garbled.param");
    fs::write(&garbled, format!("{}\nlast\n", &body[..cut])).unwrap();
    let err = LocalPool::resume(&garbled, &options(), 2).err().unwrap();
    assert!(matches!(
        err,
        ChainError::Checkpoint(CheckpointError::Malformed { field: "sweep count", .. })
    ));
}

/// Rewrite a current checkpoint as an older format version by dropping
/// the header lines that version did not have.
fn downgrade(text: &str, version: &str, drop_lines: &[usize]) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    lines[0] = version;
    for &index in drop_lines.iter().rev() {
        lines.remove(index);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[test]
fn test_older_formats_resume_with_defaults() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let mut pool = LocalPool::start(&config, 3).unwrap();
    pool.chain_mut().step(1.0).unwrap();
    let current = save(&pool, &checkpoint(&dir, "current.param"));
    let lnl = pool.chain().log_likelihood();
    pool.finish().unwrap();

    // Line 4 holds the Dirichlet weight prior, line 6 the SPR/NNI budget.
    let v17 = downgrade(&current, "1.7", &[4]);
    let header = read_header(&mut TokenReader::new(Cursor::new(v17.as_bytes())), &options()).unwrap();
    assert_eq!(header.version, FormatVersion::new(1, 7));
    assert_eq!(header.config.dir_weight_prior, 0.0);
    assert_eq!((header.config.n_spr, header.config.n_nni), (4, 2));

    let path = checkpoint(&dir, "v17.param");
    fs::write(&path, &v17).unwrap();
    let resumed = LocalPool::resume(&path, &options(), 3).unwrap();
    assert!((resumed.chain().log_likelihood() - lnl).abs() < 1e-8);
    // Saving upgrades the file to the current version.
    let upgraded = save(&resumed, &checkpoint(&dir, "upgraded.param"));
    assert!(upgraded.starts_with("1.8\n"));
    resumed.finish().unwrap();

    let v14 = downgrade(&current, "1.4", &[4, 6]);
    let path = checkpoint(&dir, "v14.param");
    fs::write(&path, &v14).unwrap();
    let resumed = LocalPool::resume(&path, &options(), 2).unwrap();
    let chain = resumed.chain();
    assert_eq!(chain.config().dir_weight_prior, 0.0);
    assert_eq!((chain.config().n_spr, chain.config().n_nni), (10, 0));
    assert!((chain.log_likelihood() - lnl).abs() < 1e-8);
    resumed.finish().unwrap();
}

#[test]
fn test_damaged_checkpoints_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = setup(&dir);
    let pool = LocalPool::start(&config, 2).unwrap();
    let current = save(&pool, &checkpoint(&dir, "current.param"));
    pool.finish().unwrap();

    let cut = current.len() / 2;
    let path = checkpoint(&dir, "truncated.param");
    fs::write(&path, &current[..cut]).unwrap();
    let err = LocalPool::resume(&path, &options(), 2).err().unwrap();
    assert!(matches!(
        err,
        ChainError::Checkpoint(CheckpointError::Truncated { .. } | CheckpointError::Malformed { .. })
    ));

    let future = downgrade(&current, "2.0", &[]);
    let path = checkpoint(&dir, "future.param");
    fs::write(&path, future).unwrap();
    let err = LocalPool::resume(&path, &options(), 2).err().unwrap();
    assert!(matches!(
        err,
        ChainError::Checkpoint(CheckpointError::Malformed { field: "version", .. })
    ));

    let missing = checkpoint(&dir, "missing.param");
    assert!(LocalPool::resume(&missing, &options(), 2).is_err());
}
