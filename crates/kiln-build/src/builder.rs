//! Build orchestration
//!
//! One call to [`Builder::build`] is one incremental build:
//!
//! 1. load the previous state from the ledger (or start clean),
//! 2. scan the sources into a fresh state,
//! 3. taint packages whose sources changed or whose artifacts vanished,
//! 4. compile tainted packages in rounds until no taint is left, tainting the
//!    dependents of every package whose public API changed incompatibly,
//! 5. reconcile the output directories and write the new ledger.

use crate::artifacts::{
    find_missing, modified_millis, purge_packages, remove_superfluous, sweep_unidentified,
    wipe_output_roots,
};
use crate::changes::{ChangeDetector, ChangeType};
use crate::compiler::{CompileResponse, Compiler};
use crate::config::BuildConfig;
use crate::error::BuildResult;
use crate::graph::format_cycle;
use crate::ids::PackageId;
use crate::ledger::Ledger;
use crate::pubapi::{CompatibilityPolicy, PubApi};
use crate::scan::{FsScanner, SourceScanner};
use crate::scheduler::{dispatch, plan_chunks, DispatchContext, InterruptFlag, RoundOutcome, WorkSet};
use crate::state::{BuildState, DependencyKind, Source};
use crate::taint::TaintEngine;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Packages known after the build
    pub total_packages: usize,
    /// Sources found by the scan
    pub total_sources: usize,
    /// Packages handed to the compiler, over all rounds
    pub compiled_packages: usize,
    /// Sources handed to the compiler, over all rounds
    pub compiled_sources: usize,
    /// Compile chunks dispatched
    pub chunks: usize,
    /// Total build time
    pub total_time: Duration,
    /// Time spent scanning sources
    pub scan_time: Duration,
    /// Time spent waiting for the compiler
    pub compilation_time: Duration,
}

impl BuildStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of one build
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub success: bool,
    pub interrupted: bool,
    /// Compile rounds run
    pub rounds: usize,
    /// Packages tainted before the first round
    pub initially_tainted: BTreeSet<PackageId>,
    /// Packages compiled in any round
    pub compiled: BTreeSet<PackageId>,
    /// Files removed from the output directories
    pub deleted_artifacts: Vec<PathBuf>,
    /// Diagnostics of failed chunks
    pub failure_text: String,
    /// Why the previous build state was not used, if it was not
    pub ledger_notice: Option<String>,
    pub stats: BuildStats,
}

impl BuildOutcome {
    /// Nothing needed recompiling
    pub fn is_up_to_date(&self) -> bool {
        self.success && self.compiled.is_empty()
    }
}

/// Main builder for incremental builds
pub struct Builder {
    config: BuildConfig,
    compiler: Arc<dyn Compiler>,
    scanner: Box<dyn SourceScanner>,
    policy: Box<dyn CompatibilityPolicy>,
    interrupt: InterruptFlag,
}

impl Builder {
    pub fn new(config: BuildConfig, compiler: Arc<dyn Compiler>) -> Self {
        let policy = config.build.compatibility.policy();
        Self {
            config,
            compiler,
            scanner: Box::new(FsScanner::new()),
            policy,
            interrupt: InterruptFlag::new(),
        }
    }

    /// Set build configuration. Also resets the compatibility policy to the
    /// configured one.
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.policy = config.build.compatibility.policy();
        self.config = config;
        self
    }

    pub fn with_scanner(mut self, scanner: Box<dyn SourceScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn CompatibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Share an interrupt flag with the caller
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.config.build.parallelism = parallelism;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Execute one incremental build.
    ///
    /// Compilation failures are reported through the outcome. An `Err` means
    /// the build state itself could not be trusted or written; the ledger is
    /// left untouched in that case.
    pub fn build(&mut self) -> BuildResult<BuildOutcome> {
        let build_start = Instant::now();
        let mut outcome = BuildOutcome::default();

        let fingerprint = self.config.fingerprint();
        let ledger = Ledger::new(self.config.ledger_path());
        let output_roots = self.config.output_roots();
        let allow_list = self.config.artifact_allow_list()?;

        let (prev, tampered) =
            self.load_previous(&ledger, &fingerprint, &output_roots, &mut outcome)?;

        let scan_start = Instant::now();
        let mut now = BuildState::new();
        for scanned in self.scanner.scan(&self.config.scan_request())? {
            now.add_source(&scanned.package, scanned.source)?;
        }
        outcome.stats.scan_time = scan_start.elapsed();
        outcome.stats.total_sources = now.source_count();

        let mut engine = TaintEngine::from_state(&prev);
        if let Some(cycle) = engine.graph().find_cycle() {
            tracing::debug!(cycle = %format_cycle(&cycle), "package dependency cycle");
        }
        for owner in &tampered {
            engine.taint(owner, "artifact modified outside the build");
        }
        self.seed_taint(&prev, &now, &mut engine);
        outcome.initially_tainted = engine.tainted();
        if !engine.is_empty() {
            tracing::info!(packages = engine.len(), "packages need recompiling");
        }

        // Packages that lost every compilable source, or every source at all.
        // Link-only sources left behind produce nothing.
        let removed: BTreeSet<PackageId> = prev
            .packages()
            .iter()
            .filter(|(id, old)| {
                let (remaining, compilable) = now
                    .package(id)
                    .map_or((0, 0), |p| (p.sources().len(), p.compilable_sources().count()));
                let had_compilable = old.compilable_sources().next().is_some();
                compilable == 0 && (had_compilable || (!old.sources().is_empty() && remaining == 0))
            })
            .map(|(id, _)| id.clone())
            .collect();

        let failed = self.run_rounds(&prev, &mut now, &mut engine, &mut outcome)?;

        // Sources that did not compile are forgotten so the next build
        // sees them as added and tries again.
        let still_tainted = engine.tainted();
        for id in failed.iter().chain(still_tainted.iter()) {
            now.remove_package_sources(id);
        }

        now.copy_packages_except(&prev, &outcome.compiled, &removed)?;
        now.calculate_dependents();

        let replaced: BTreeSet<PackageId> = outcome.compiled.union(&removed).cloned().collect();
        outcome
            .deleted_artifacts
            .extend(remove_superfluous(&prev, &now, &replaced));
        if !allow_list.permits_all() {
            let known = now.artifact_paths();
            let permitted = |path: &Path| allow_list.permits(path);
            outcome
                .deleted_artifacts
                .extend(sweep_unidentified(&output_roots, &known, &permitted)?);
        }

        ledger.save(&now, &fingerprint)?;

        outcome.stats.total_packages = now.packages().len();
        outcome.stats.total_time = build_start.elapsed();

        if outcome.success {
            tracing::info!(
                rounds = outcome.rounds,
                compiled = outcome.compiled.len(),
                elapsed_ms = outcome.stats.total_time.as_millis() as u64,
                "build finished"
            );
        } else {
            tracing::warn!(
                rounds = outcome.rounds,
                interrupted = outcome.interrupted,
                "build failed"
            );
        }
        Ok(outcome)
    }

    /// Read the ledger, returning the previous state and the owners of
    /// tampered artifacts. Without a ledger the output directories are
    /// emptied, since nothing in them can be attributed to a package.
    fn load_previous(
        &self,
        ledger: &Ledger,
        fingerprint: &str,
        output_roots: &[PathBuf],
        outcome: &mut BuildOutcome,
    ) -> BuildResult<(BuildState, BTreeSet<PackageId>)> {
        match ledger.load(fingerprint) {
            None => {
                tracing::info!(ledger = %ledger.path().display(), "no previous build state, building everything");
                if !self.config.build.permit_unidentified_artifacts {
                    wipe_output_roots(output_roots)?;
                }
                Ok((BuildState::new(), BTreeSet::new()))
            }
            Some(load) if load.is_trusted() => {
                let mut tampered = BTreeSet::new();
                for (owner, path) in load.tampered {
                    tampered.insert(owner);
                    outcome.deleted_artifacts.push(path);
                }
                Ok((load.state, tampered))
            }
            Some(load) => {
                let notice = load
                    .problem
                    .unwrap_or_else(|| "previous build state rejected".to_string());
                tracing::info!(reason = %notice, "ignoring previous build state, building everything");
                outcome.ledger_notice = Some(notice);
                Ok((BuildState::new(), BTreeSet::new()))
            }
        }
    }

    fn seed_taint(&self, prev: &BuildState, now: &BuildState, engine: &mut TaintEngine) {
        for change in ChangeDetector::new().detect_changes(prev, now) {
            if change.change_type == ChangeType::ModifiedBackwards {
                tracing::warn!(source = %change.path, "source timestamp moved backwards");
            }
            engine.taint(&change.package, change.change_type.reason());
        }
        for (package, path) in find_missing(prev) {
            tracing::debug!(package = %package, artifact = %path.display(), "artifact missing");
            engine.taint(&package, "artifact missing");
        }
    }

    /// Compile until nothing is tainted or a round fails. Returns the
    /// packages of failed chunks.
    fn run_rounds(
        &self,
        prev: &BuildState,
        now: &mut BuildState,
        engine: &mut TaintEngine,
        outcome: &mut BuildOutcome,
    ) -> BuildResult<BTreeSet<PackageId>> {
        let mut failed = BTreeSet::new();
        let capabilities = self.compiler.capabilities();
        let parallelism = self.config.parallelism();
        let context = DispatchContext {
            args: Arc::from(self.config.build.compiler_args.clone()),
            visible_sources: Arc::new(now.sources().map(|s| s.path().to_string()).collect()),
            interrupt: self.interrupt.clone(),
        };

        outcome.success = true;
        while !engine.is_empty() {
            let work: WorkSet = engine
                .tainted()
                .into_iter()
                .filter_map(|id| {
                    let sources: Vec<Source> = now.package(&id)?.compilable_sources().cloned().collect();
                    (!sources.is_empty()).then_some((id, sources))
                })
                .collect();
            engine.clear();
            if work.is_empty() {
                break;
            }
            outcome.rounds += 1;

            let round: BTreeSet<PackageId> = work.keys().cloned().collect();
            let first_time: BTreeSet<PackageId> = round.difference(&outcome.compiled).cloned().collect();
            outcome
                .deleted_artifacts
                .extend(purge_packages(prev, &first_time));

            // Snapshots to compare against, only for packages that were
            // compiled before: earlier this build, or in the previous one.
            let last_known: BTreeMap<PackageId, PubApi> = round
                .iter()
                .filter_map(|id| {
                    let known = if outcome.compiled.contains(id) {
                        now.package(id)
                    } else {
                        prev.package(id).filter(|p| p.has_been_compiled())
                    };
                    Some((id.clone(), known?.pubapi().clone()))
                })
                .collect();

            let plan = plan_chunks(&work, parallelism, capabilities, engine.graph());
            let source_count = plan.source_count();
            tracing::info!(
                round = outcome.rounds,
                packages = round.len(),
                sources = source_count,
                chunks = plan.chunks.len(),
                concurrency = plan.concurrency,
                "compiling"
            );

            let compile_start = Instant::now();
            let result = dispatch(&plan, self.compiler.as_ref(), &context);
            outcome.stats.compilation_time += compile_start.elapsed();
            outcome.stats.chunks += plan.chunks.len();
            outcome.stats.compiled_packages += round.len();
            outcome.stats.compiled_sources += source_count;

            merge_round(now, engine, &result)?;
            for chunk in result.results.iter().filter(|r| !r.succeeded()) {
                failed.extend(chunk.packages.iter().cloned());
            }
            outcome.compiled.extend(round.iter().cloned());

            for (id, older) in &last_known {
                let Some(package) = now.package(id) else {
                    continue;
                };
                if package
                    .pubapi()
                    .is_backward_compatible_with_policy(older, self.policy.as_ref())
                {
                    continue;
                }
                for delta in package.pubapi().diff(older) {
                    tracing::debug!(package = %id, change = %delta, "public api changed");
                }
                let reason = format!("public api of {} changed", id);
                engine.taint_dependents(id, &reason, &round);
            }

            if !result.success() {
                outcome.success = false;
                outcome.interrupted = result.interrupted;
                outcome.failure_text = result.failure_text();
                break;
            }
        }

        Ok(failed)
    }
}

/// Fold one round's compiler output into `now`. Partial surfaces of
/// referenced types go in first; snapshots of compiled packages then
/// replace whatever is there.
fn merge_round(now: &mut BuildState, engine: &mut TaintEngine, round: &RoundOutcome) -> BuildResult<()> {
    let responses = || round.results.iter().map(|r| &r.response);

    for response in responses() {
        for (id, partial) in &response.dependency_apis {
            let package = now.lookup_package_or_create(id);
            let merged = package.pubapi().merge(partial);
            package.set_pubapi(merged);
        }
    }

    for response in responses() {
        merge_response(now, response)?;
        for id in response.packages.keys() {
            if let Some(package) = now.package(id) {
                engine.extend_dependents(package);
            }
        }
    }
    Ok(())
}

fn merge_response(now: &mut BuildState, response: &CompileResponse) -> BuildResult<()> {
    for (id, output) in &response.packages {
        let mut artifacts = BTreeMap::new();
        for path in &output.artifacts {
            match modified_millis(path) {
                Ok(timestamp) => {
                    artifacts.insert(path.clone(), timestamp);
                }
                Err(e) => {
                    tracing::warn!(package = %id, artifact = %path.display(), error = %e, "reported artifact is not readable");
                }
            }
        }
        now.set_package_artifacts(id, artifacts)?;

        let package = now.lookup_package_or_create(id);
        package.set_dependencies(DependencyKind::InGraph, output.in_graph.clone());
        package.set_dependencies(DependencyKind::Classpath, output.classpath.clone());
        if let Some(api) = &output.pubapi {
            let replaced = package.pubapi().replace(api);
            package.set_pubapi(replaced);
        }
    }
    Ok(())
}
