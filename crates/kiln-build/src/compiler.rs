//! Boundary to the compiler that does the actual work
//!
//! The tracker never compiles anything itself. It hands chunks of sources to
//! a [`Compiler`] and reads back what was produced: artifacts, type
//! dependencies and public-API snapshots.

use crate::error::BuildResult;
use crate::ids::PackageId;
use crate::log::ChunkLog;
use crate::pubapi::PubApi;
use crate::state::{Source, TypeDependencies};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Memory assumed available when the compiler does not say: 2 GiB
pub const DEFAULT_MEMORY_BUDGET: u64 = 2 * 1024 * 1024 * 1024;

/// What the compiler can handle at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerCapabilities {
    /// Bytes of memory available to concurrent compilations
    pub available_memory: u64,
    /// Usable CPU cores
    pub cores: usize,
}

impl CompilerCapabilities {
    pub fn new(available_memory: u64, cores: usize) -> Self {
        Self {
            available_memory,
            cores: cores.max(1),
        }
    }

    /// Host core count with the default memory budget
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(DEFAULT_MEMORY_BUDGET, cores)
    }
}

impl Default for CompilerCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// One chunk of work
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub chunk_id: String,
    /// Flattened compiler arguments
    pub args: Arc<[String]>,
    /// Sources to compile, by package
    pub sources: BTreeMap<PackageId, Vec<Source>>,
    /// Every source of the build, for cross references and linking
    pub visible_sources: Arc<BTreeSet<String>>,
}

impl CompileRequest {
    pub fn source_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageId> {
        self.sources.keys()
    }
}

/// What compiling produced for one package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOutput {
    /// Files written; timestamps are read from disk when merged
    pub artifacts: BTreeSet<PathBuf>,
    pub in_graph: TypeDependencies,
    pub classpath: TypeDependencies,
    /// Full snapshot, present when the package itself was compiled
    pub pubapi: Option<PubApi>,
}

/// Everything a chunk compilation reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileResponse {
    pub packages: BTreeMap<PackageId, PackageOutput>,
    /// Partial surfaces of referenced types, by owning package
    pub dependency_apis: BTreeMap<PackageId, PubApi>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CompileResponse {
    /// An empty successful response
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A response carrying nothing but a failure message
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// The compiler collaborator. Called from several worker threads at once.
pub trait Compiler: Send + Sync {
    fn capabilities(&self) -> CompilerCapabilities {
        CompilerCapabilities::detect()
    }

    /// Compile one chunk. An `Err` is reported as a failed chunk, not a
    /// failed build.
    fn compile(&self, request: &CompileRequest, log: &mut ChunkLog) -> BuildResult<CompileResponse>;
}
