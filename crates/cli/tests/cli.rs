use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const ALIGNMENT: &str = "\
>human\nACGTACGTTAGGCCTAACGTAGCT\n\
>chimp\nACGTACGATAGGCCTAACGAAGCT\n\
>gorilla\nACCTACGTTAGGCGTAACGTAGCA\n\
>orang\nTCGTACGTTAGCCCTAAAGTAGCT\n\
>gibbon\nACGTTCGTTAGGCCTTTCGTAGGT\n";

fn write_alignment(dir: &Path) {
    fs::write(dir.join("aln.fasta"), ALIGNMENT).unwrap();
}

fn phylomix(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("phylomix").unwrap();
    cmd.current_dir(dir);
    cmd
}

fn trace_records(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(format!("{name}.trace")))
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

#[test]
fn test_run_writes_trace_and_checkpoint() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());

    phylomix(temp.path())
        .args(["run", "demo", "-d", "aln.fasta", "--ncomp", "2", "--np", "3"])
        .args(["--until", "3", "--seed", "7", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chain complete!"));

    let trace = fs::read_to_string(temp.path().join("demo.trace")).unwrap();
    assert!(trace.starts_with("#time\ttime\ttopo\tloglik"));
    let records = trace_records(temp.path(), "demo");
    assert_eq!(records.len(), 3);
    assert!(records[2].starts_with("3\t"));
    assert!(records.iter().all(|r| r.split('\t').count() == 10));
    assert!(temp.path().join("demo.param").exists());
    assert!(!temp.path().join("demo.param.tmp").exists());
}

#[test]
fn test_resume_continues_the_sweep_count() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());

    phylomix(temp.path())
        .args(["run", "demo", "-d", "aln.fasta", "--ncomp", "-1", "--np", "3"])
        .args(["--until", "2", "--seed", "3", "--no-progress"])
        .assert()
        .success();

    phylomix(temp.path())
        .args(["resume", "demo", "--np", "4", "--until", "4", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded checkpoint at sweep 2"));

    let records = trace_records(temp.path(), "demo");
    let sweeps: Vec<&str> = records
        .iter()
        .map(|r| r.split('\t').next().unwrap())
        .collect();
    assert_eq!(sweeps, vec!["1", "2", "3", "4"]);

    // Nothing left to do.
    phylomix(temp.path())
        .args(["resume", "demo", "--until", "4", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already complete"));
}

#[test]
fn test_resume_after_crash_between_checkpoints() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());

    phylomix(temp.path())
        .args(["run", "demo", "-d", "aln.fasta", "--np", "2", "--until", "3"])
        .args(["--seed", "5", "--no-progress"])
        .assert()
        .success();
    let at_three = fs::read(temp.path().join("demo.param")).unwrap();

    phylomix(temp.path())
        .args(["resume", "demo", "--np", "2", "--until", "5", "--no-progress"])
        .assert()
        .success();
    assert_eq!(trace_records(temp.path(), "demo").len(), 5);

    // A crash after sweep 5 but before its checkpoint leaves the sweep 3
    // state next to a trace that already holds sweeps 4 and 5.
    fs::write(temp.path().join("demo.param"), at_three).unwrap();

    phylomix(temp.path())
        .args(["resume", "demo", "--np", "3", "--until", "6", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded checkpoint at sweep 3"));

    let sweeps: Vec<String> = trace_records(temp.path(), "demo")
        .iter()
        .map(|r| r.split('\t').next().unwrap().to_string())
        .collect();
    assert_eq!(sweeps, vec!["1", "2", "3", "4", "5", "6"]);
}

#[test]
fn test_run_refuses_to_overwrite_without_force() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());
    let args = ["run", "demo", "-d", "aln.fasta", "--np", "2", "--until", "1", "--no-progress"];

    phylomix(temp.path()).args(args).assert().success();
    phylomix(temp.path())
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    phylomix(temp.path()).args(args).arg("--force").assert().success();
    assert_eq!(trace_records(temp.path(), "demo").len(), 1);
}

#[test]
fn test_run_from_json_config() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());
    let config = r#"{
        "data_file": "aln.fasta",
        "tree": "random",
        "n_rate_categories": 2,
        "components": 3,
        "dir_weight_prior": 0.0,
        "fixed_topology": true,
        "n_nni": 0,
        "remove_constant_sites": false,
        "fixed_branch_lengths": false,
        "seed": 11,
        "trace_likelihood": "full"
    }"#;
    fs::write(temp.path().join("chain.json"), config).unwrap();

    phylomix(temp.path())
        .args(["run", "json", "--config", "chain.json", "--np", "2"])
        .args(["--until", "2", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rate Categories: 2"));
    assert_eq!(trace_records(temp.path(), "json").len(), 2);
}

#[test]
fn test_inspect_prints_the_header() {
    let temp = tempdir().unwrap();
    write_alignment(temp.path());
    phylomix(temp.path())
        .args(["run", "demo", "-d", "aln.fasta", "--nspr", "3", "--nni", "2", "--np", "2"])
        .args(["--until", "1", "--no-progress"])
        .assert()
        .success();

    phylomix(temp.path())
        .args(["inspect", "demo.param"])
        .assert()
        .success()
        .stdout(predicate::str::contains("version               1.8"))
        .stdout(predicate::str::contains("spr / nni budget      3 / 2"));

    phylomix(temp.path())
        .args(["inspect", "demo.param", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"n_spr\": 3"));
}

#[test]
fn test_errors_are_reported() {
    let temp = tempdir().unwrap();

    phylomix(temp.path())
        .args(["run", "demo", "-d", "missing.fasta", "--np", "2", "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to start chain"));

    phylomix(temp.path())
        .args(["resume", "nothing", "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to resume"));

    write_alignment(temp.path());
    phylomix(temp.path())
        .args(["run", "demo", "-d", "aln.fasta", "--np", "1", "--no-progress"])
        .assert()
        .failure();
}
