//! Tab-separated trace of a chain, one record per sweep.

use std::io::{self, Write};

/// First line of every trace file.
pub const TRACE_HEADER: &str =
    "#time\ttime\ttopo\tloglik\tlength\talpha\tNmode\tstatent\tstatalpha\tallocvec";

pub fn write_header<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{TRACE_HEADER}")
}

/// One line of the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub iteration: usize,
    /// Sweep time since the previous record.
    pub seconds: f64,
    /// Share of that time spent on branch-length and topology proposals.
    pub topology_percent: u32,
    pub log_likelihood: f64,
    pub length: f64,
    pub alpha: f64,
    pub n_occupied: usize,
    pub stat_entropy: f64,
    pub mean_dir_weight: f64,
    pub allocation: Vec<usize>,
}

impl TraceRecord {
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let allocation: Vec<String> = self.allocation.iter().map(usize::to_string).collect();
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.iteration,
            self.seconds,
            self.topology_percent,
            self.log_likelihood,
            self.length,
            self.alpha,
            self.n_occupied,
            self.stat_entropy,
            self.mean_dir_weight,
            allocation.join(",")
        )
    }

    /// Parse a record line; `None` for the header, blank lines or anything
    /// malformed.
    pub fn parse(line: &str) -> Option<Self> {
        if line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 10 {
            return None;
        }
        let allocation = if fields[9].is_empty() {
            Vec::new()
        } else {
            fields[9]
                .split(',')
                .map(str::parse)
                .collect::<Result<Vec<usize>, _>>()
                .ok()?
        };
        Some(Self {
            iteration: fields[0].parse().ok()?,
            seconds: fields[1].parse().ok()?,
            topology_percent: fields[2].parse().ok()?,
            log_likelihood: fields[3].parse().ok()?,
            length: fields[4].parse().ok()?,
            alpha: fields[5].parse().ok()?,
            n_occupied: fields[6].parse().ok()?,
            stat_entropy: fields[7].parse().ok()?,
            mean_dir_weight: fields[8].parse().ok()?,
            allocation,
        })
    }

    /// Iteration of the last well-formed record of a trace.
    pub fn last_iteration(trace: &str) -> Option<usize> {
        trace.lines().rev().find_map(Self::parse).map(|r| r.iteration)
    }
}
