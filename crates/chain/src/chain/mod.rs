//! The chain orchestrator and its distributed execution layer.
//!
//! - `Chain`: coordinator-side state and the sweep schedule.
//! - `Worker`, `Coordinator`, `Role`: the two sides of the command protocol.
//! - `LocalPool`: a chain whose workers are threads of this process.
//! - `ChainConfig` / `ChainBuilder`: run settings.
//! - `checkpoint` and `trace`: the two output formats.

pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod messages;
pub mod roles;
mod setup;
pub mod trace;

pub use builder::ChainBuilder;
pub use checkpoint::{CheckpointHeader, FormatVersion, ResumeOptions, CURRENT_VERSION};
pub use config::{ChainConfig, ComponentCount, MixtureFlags, TraceLikelihood, TreeSource};
pub use engine::Chain;
pub use messages::{Command, GlobalParameters, Reply};
pub use roles::{Coordinator, Executor, LocalPool, Role, Worker};
pub use trace::{TraceRecord, TRACE_HEADER};
