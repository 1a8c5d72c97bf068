use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use phylomix_chain::chain::TraceRecord;
use phylomix_chain::{Chain, LocalPool};
use phylomix_comm::Communicator;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::args::ScheduleArgs;

/// Output files of a named chain.
#[derive(Debug, Clone)]
pub struct ChainFiles {
    pub trace: PathBuf,
    pub param: PathBuf,
}

impl ChainFiles {
    pub fn new(name: &str) -> Self {
        Self {
            trace: PathBuf::from(format!("{name}.trace")),
            param: PathBuf::from(format!("{name}.param")),
        }
    }

    pub fn exist(&self) -> bool {
        self.trace.exists() || self.param.exists()
    }

    /// Sweeps already recorded in the trace, 0 for a missing or empty one.
    pub fn recorded_sweeps(&self) -> Result<usize> {
        if !self.trace.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(&self.trace)
            .with_context(|| format!("Failed to read trace {}", self.trace.display()))?;
        Ok(TraceRecord::last_iteration(&text).unwrap_or(0))
    }

    /// Drop trace records past `sweep`, the sweep the checkpoint holds.
    /// Returns the number of records removed.
    pub fn rewind_trace(&self, sweep: usize) -> Result<usize> {
        if !self.trace.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(&self.trace)
            .with_context(|| format!("Failed to read trace {}", self.trace.display()))?;
        let mut kept = String::with_capacity(text.len());
        let mut removed = 0;
        for line in text.lines() {
            match TraceRecord::parse(line) {
                Some(record) if record.iteration > sweep => removed += 1,
                // A partial last line is never a complete record.
                None if !line.starts_with('#') => removed += 1,
                _ => {
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }
        if removed > 0 {
            let staging = self.trace.with_extension("trace.tmp");
            fs::write(&staging, kept)
                .with_context(|| format!("Failed to write {}", staging.display()))?;
            fs::rename(&staging, &self.trace)
                .with_context(|| format!("Failed to rewind trace {}", self.trace.display()))?;
        }
        Ok(removed)
    }

    /// Write the checkpoint next to its final path, then move it in place.
    pub fn save<C: Communicator>(&self, chain: &Chain<C>) -> Result<()> {
        let staging = self.param.with_extension("param.tmp");
        let file = File::create(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        let mut out = BufWriter::new(file);
        chain
            .save(&mut out)
            .with_context(|| format!("Failed to write checkpoint {}", staging.display()))?;
        drop(out);
        fs::rename(&staging, &self.param)
            .with_context(|| format!("Failed to move checkpoint to {}", self.param.display()))
    }
}

fn open_trace(path: &Path, fresh: bool) -> Result<BufWriter<File>> {
    let file = if fresh {
        File::create(path)
    } else {
        OpenOptions::new().create(true).append(true).open(path)
    }
    .with_context(|| format!("Failed to open trace {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn progress_bar(schedule: &ScheduleArgs, start: usize) -> Option<ProgressBar> {
    if schedule.no_progress {
        return None;
    }
    let pb = ProgressBar::new(schedule.until as u64);
    pb.set_position(start as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    Some(pb)
}

/// Run the pool's chain up to `schedule.until` sweeps, appending one trace
/// record per sweep and checkpointing every `schedule.save_every` sweeps.
/// The pool is shut down on every path.
pub fn drive(mut pool: LocalPool, files: &ChainFiles, schedule: &ScheduleArgs, fresh: bool) -> Result<()> {
    let outcome = drive_chain(&mut pool, files, schedule, fresh);
    let shutdown = pool.finish().context("Worker failed");
    outcome.and(shutdown)
}

fn drive_chain(pool: &mut LocalPool, files: &ChainFiles, schedule: &ScheduleArgs, fresh: bool) -> Result<()> {
    let mut trace = open_trace(&files.trace, fresh)?;
    let chain = pool.chain_mut();
    if fresh {
        chain.trace_header(&mut trace)?;
    }
    let start = chain.iteration();
    let pb = progress_bar(schedule, start);
    let save_every = schedule.save_every.max(1);

    while chain.iteration() < schedule.until {
        let sweep = chain.iteration() + 1;
        chain
            .step(schedule.tuning)
            .with_context(|| format!("Sweep {sweep} failed"))?;
        chain.trace(&mut trace)?;
        trace.flush()?;
        if sweep % save_every == 0 {
            files.save(&*chain)?;
        }
        if let Some(pb) = &pb {
            pb.set_message(format!("lnL {:.2}", chain.log_likelihood()));
            pb.inc(1);
        }
    }
    files.save(&*chain)?;

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }
    Ok(())
}
