//! Compile-chunk scheduling
//!
//! Tainted sources are split into chunks sized so that the compilers running
//! at the same time fit in the memory the compiler says it has. Chunks then
//! run on a bounded rayon pool; every chunk produces a result, failed or not,
//! and the round only ends once all of them are in.

use crate::compiler::{CompileRequest, CompileResponse, Compiler, CompilerCapabilities};
use crate::graph::DependencyGraph;
use crate::ids::PackageId;
use crate::log::ChunkLog;
use crate::state::Source;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Estimated compiler memory per source file
pub const BYTES_PER_SOURCE: u64 = 175 * 1024;

/// Estimated fixed memory of one compiler instance
pub const CHUNK_OVERHEAD_BYTES: u64 = 64 * 1024 * 1024;

/// Smallest chunk a memory-starved serial build will use
pub const MIN_SOURCES_PER_CHUNK: usize = 10;

/// Sources grouped by package, the input of a round
pub type WorkSet = BTreeMap<PackageId, Vec<Source>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub sources: WorkSet,
    /// Total dependents of the chunk's packages
    pub dependents: usize,
}

impl Chunk {
    pub fn source_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    pub fn packages(&self) -> BTreeSet<PackageId> {
        self.sources.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// Compilers allowed to run at once
    pub concurrency: usize,
    /// Memory does not allow a single chunk holding every source
    pub serial: bool,
}

impl ChunkPlan {
    pub fn source_count(&self) -> usize {
        self.chunks.iter().map(Chunk::source_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn fits(concurrency: u64, sources_per_chunk: u64, memory: u64) -> bool {
    let per_chunk = CHUNK_OVERHEAD_BYTES.saturating_add(sources_per_chunk.saturating_mul(BYTES_PER_SOURCE));
    concurrency.saturating_mul(per_chunk) <= memory
}

/// Split the work into memory-bounded chunks. Packages are never split
/// across chunks.
pub fn plan_chunks(
    work: &WorkSet,
    parallelism: usize,
    capabilities: CompilerCapabilities,
    graph: &DependencyGraph,
) -> ChunkPlan {
    let total: usize = work.values().map(Vec::len).sum();
    if total == 0 {
        return ChunkPlan {
            chunks: Vec::new(),
            concurrency: 1,
            serial: false,
        };
    }

    let memory = capabilities.available_memory;
    let wanted = parallelism.min(capabilities.cores).max(1);

    let mut concurrency = wanted;
    while concurrency > 1 && !fits(concurrency as u64, total.div_ceil(concurrency) as u64, memory) {
        concurrency -= 1;
    }

    let serial = !fits(1, total as u64, memory);
    let target = if serial {
        concurrency = 1;
        let room = memory.saturating_sub(CHUNK_OVERHEAD_BYTES) / BYTES_PER_SOURCE;
        usize::try_from(room)
            .unwrap_or(usize::MAX)
            .max(MIN_SOURCES_PER_CHUNK)
    } else {
        total.div_ceil(concurrency)
    };

    let mut chunks = Vec::new();
    let mut current = WorkSet::new();
    let mut current_size = 0;
    for (package, sources) in work {
        if sources.is_empty() {
            continue;
        }
        if current_size > 0 && current_size + sources.len() > target {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += sources.len();
        current.insert(package.clone(), sources.clone());
    }
    if current_size > 0 {
        chunks.push(current);
    }

    let mut chunks: Vec<Chunk> = chunks
        .into_iter()
        .map(|sources| {
            let dependents = sources.keys().map(|p| graph.dependent_count(p)).sum();
            Chunk {
                id: String::new(),
                sources,
                dependents,
            }
        })
        .collect();

    // Serial builds compile the most depended-on code first
    if serial {
        chunks.sort_by(|a, b| b.dependents.cmp(&a.dependents));
    }
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.id = format!("chunk-{}", index);
    }

    tracing::debug!(
        sources = total,
        chunks = chunks.len(),
        concurrency,
        serial,
        "planned compile chunks"
    );

    ChunkPlan {
        chunks,
        concurrency,
        serial,
    }
}

/// Shared request to stop the build
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_id: String,
    /// Packages the chunk was asked to compile
    pub packages: BTreeSet<PackageId>,
    pub response: CompileResponse,
    /// Captured chunk log
    pub log: String,
    /// Never started because of an interrupt
    pub skipped: bool,
}

impl ChunkResult {
    pub fn succeeded(&self) -> bool {
        !self.skipped && self.response.success
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub results: Vec<ChunkResult>,
    pub interrupted: bool,
}

impl RoundOutcome {
    pub fn success(&self) -> bool {
        !self.interrupted && self.results.iter().all(ChunkResult::succeeded)
    }

    /// Diagnostics of every failed chunk
    pub fn failure_text(&self) -> String {
        let mut text = String::new();
        for result in self.results.iter().filter(|r| !r.succeeded()) {
            text.push_str(&result.log);
            for output in [&result.response.stdout, &result.response.stderr] {
                if !output.is_empty() {
                    text.push_str(output);
                    if !output.ends_with('\n') {
                        text.push('\n');
                    }
                }
            }
        }
        if self.interrupted && text.is_empty() {
            text.push_str("build interrupted\n");
        }
        text
    }
}

/// Everything a chunk needs besides its own sources
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub args: Arc<[String]>,
    pub visible_sources: Arc<BTreeSet<String>>,
    pub interrupt: InterruptFlag,
}

/// Run every chunk of the plan and wait for all of them
pub fn dispatch(plan: &ChunkPlan, compiler: &dyn Compiler, context: &DispatchContext) -> RoundOutcome {
    let results = rayon::ThreadPoolBuilder::new()
        .num_threads(plan.concurrency.max(1))
        .thread_name(|index| format!("kiln-compile-{}", index))
        .build_scoped(rayon::ThreadBuilder::run, |pool| {
            pool.install(|| {
                plan.chunks
                    .par_iter()
                    .map(|chunk| run_chunk(chunk, compiler, context))
                    .collect::<Vec<_>>()
            })
        })
        .unwrap_or_else(|e| {
            tracing::warn!("failed to create compile pool ({e}), compiling sequentially");
            plan.chunks
                .iter()
                .map(|chunk| run_chunk(chunk, compiler, context))
                .collect()
        });

    RoundOutcome {
        results,
        interrupted: context.interrupt.is_interrupted(),
    }
}

fn run_chunk(chunk: &Chunk, compiler: &dyn Compiler, context: &DispatchContext) -> ChunkResult {
    let mut log = ChunkLog::new(chunk.id.clone());

    if context.interrupt.is_interrupted() {
        log.warn("interrupted before start");
        return ChunkResult {
            chunk_id: chunk.id.clone(),
            packages: chunk.packages(),
            response: CompileResponse::failed("interrupted"),
            log: log.to_text(),
            skipped: true,
        };
    }

    let request = CompileRequest {
        chunk_id: chunk.id.clone(),
        args: Arc::clone(&context.args),
        sources: chunk.sources.clone(),
        visible_sources: Arc::clone(&context.visible_sources),
    };
    log.debug(format!(
        "compiling {} sources in {} packages",
        request.source_count(),
        chunk.sources.len()
    ));

    let response = match panic::catch_unwind(AssertUnwindSafe(|| compiler.compile(&request, &mut log))) {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            log.error(&e);
            CompileResponse::failed(e.to_string())
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log.error(format!("compiler panicked: {}", message));
            CompileResponse::failed(format!("compiler panicked: {}", message))
        }
    };

    if response.success {
        log.debug("chunk compiled");
    }

    ChunkResult {
        chunk_id: chunk.id.clone(),
        packages: chunk.packages(),
        response,
        log: log.to_text(),
        skipped: false,
    }
}
