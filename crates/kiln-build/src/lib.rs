//! Kiln incremental build-state tracking
//!
//! Decides which packages of a source tree need recompiling, compiles them in
//! memory-bounded concurrent chunks through a pluggable [`Compiler`], and
//! records the result in a ledger so the next build can do the same cheaply:
//! - Build state model (modules, packages, sources, artifacts)
//! - Public-API snapshots and compatibility policies
//! - Transitive taint propagation over a possibly cyclic package graph
//! - Chunk planning and dispatch on a bounded thread pool
//! - Ledger persistence and artifact reconciliation
//! - `kiln.toml` configuration and filesystem source scanning

pub mod artifacts;
pub mod builder;
pub mod changes;
pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod ids;
pub mod ledger;
pub mod log;
pub mod pubapi;
pub mod scan;
pub mod scheduler;
pub mod state;
pub mod taint;

// Re-export main types
pub use builder::{BuildOutcome, BuildStats, Builder};
pub use changes::{ChangeDetector, ChangeType, ChangedSource};
pub use compiler::{CompileRequest, CompileResponse, Compiler, CompilerCapabilities, PackageOutput};
pub use config::{ArtifactAllowList, BuildConfig, CompatibilityMode};
pub use error::{BuildError, BuildResult, ConfigError};
pub use graph::DependencyGraph;
pub use ids::{ModuleId, PackageId, TypeId};
pub use ledger::{Ledger, LedgerLoad, LEDGER_VERSION};
pub use log::{init_tracing, ChunkLog};
pub use pubapi::{ApiDelta, CompatibilityPolicy, MemberSuperset, PubApi, StrictEquality};
pub use scan::{FsScanner, ScanRequest, ScannedSource, SourceScanner};
pub use scheduler::{plan_chunks, Chunk, ChunkPlan, InterruptFlag};
pub use state::{BuildState, DependencyKind, Module, Package, Source, TypeDependencies};
pub use taint::TaintEngine;
