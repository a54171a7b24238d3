//! Shared fixtures: a toy compiler and a project layout in a temp directory
//!
//! Toy sources hold one type each, named after the file. Recognized lines:
//!
//! ```text
//! pub <member signature>     public member of the type
//! use <module:pkg.Type>      in-graph dependency
//! extern <module:pkg.Type>   classpath dependency
//! error <message>            compilation fails
//! ```
//!
//! Compiling writes `<out>/<module>/<pkg dirs>/<Type>.out` holding the
//! public members.

#![allow(dead_code)]

use kiln_build::{
    BuildConfig, BuildError, BuildResult, ChunkLog, CompileRequest, CompileResponse, Compiler,
    CompilerCapabilities, PackageId, PackageOutput, PubApi, Source, TypeId,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Base timestamp for source files, in ms
pub const T0: u64 = 1_700_000_000_000;

pub fn pkg(s: &str) -> PackageId {
    s.parse().unwrap()
}

pub fn ty(s: &str) -> TypeId {
    s.parse().unwrap()
}

pub fn set_mtime(path: &Path, millis: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
        .unwrap();
}

/// Parsed toy source
#[derive(Debug, Default)]
pub struct ToySource {
    pub members: Vec<String>,
    pub uses: Vec<TypeId>,
    pub externs: Vec<TypeId>,
    pub errors: Vec<String>,
}

impl ToySource {
    pub fn parse(text: &str) -> BuildResult<Self> {
        let mut parsed = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
            match word {
                "pub" => parsed.members.push(rest.to_string()),
                "use" => parsed.uses.push(rest.parse()?),
                "extern" => parsed.externs.push(rest.parse()?),
                "error" => parsed.errors.push(rest.to_string()),
                other => {
                    return Err(BuildError::compilation("toy", format!("unknown directive '{}'", other)))
                }
            }
        }
        Ok(parsed)
    }
}

/// Compiler for the toy language. Records every request it receives.
pub struct ToyCompiler {
    out: PathBuf,
    capabilities: CompilerCapabilities,
    requests: Mutex<Vec<BTreeSet<PackageId>>>,
}

impl ToyCompiler {
    pub fn new(out: impl Into<PathBuf>) -> Self {
        Self {
            out: out.into(),
            capabilities: CompilerCapabilities::new(4 * 1024 * 1024 * 1024, 4),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CompilerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every package compiled so far, in any request
    pub fn compiled(&self) -> BTreeSet<PackageId> {
        self.requests.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn artifact_path(&self, owner: &TypeId) -> PathBuf {
        let mut path = self.out.join(owner.package.module.as_str());
        for part in owner.package.name.split('.').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.join(format!("{}.out", owner.simple))
    }

    fn compile_source(
        &self,
        package: &PackageId,
        source: &Source,
        output: &mut PackageOutput,
        api: &mut PubApi,
        log: &mut ChunkLog,
    ) -> BuildResult<bool> {
        let path = Path::new(source.path());
        let text = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        let parsed = ToySource::parse(&text)?;
        if !parsed.errors.is_empty() {
            for error in &parsed.errors {
                log.error(format!("{}: {}", source.path(), error));
            }
            return Ok(false);
        }

        let simple = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let owner = package.type_id(simple)?;

        api.add_type(owner.clone());
        for member in &parsed.members {
            api.add_member(owner.clone(), member);
        }
        for target in parsed.uses {
            if target.package != *package {
                output.in_graph.entry(owner.clone()).or_default().insert(target);
            }
        }
        for target in parsed.externs {
            output.classpath.entry(owner.clone()).or_default().insert(target);
        }

        let artifact = self.artifact_path(&owner);
        if let Some(parent) = artifact.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        fs::write(&artifact, parsed.members.join("\n")).map_err(|e| BuildError::io(&artifact, e))?;
        output.artifacts.insert(artifact);
        Ok(true)
    }
}

impl Compiler for ToyCompiler {
    fn capabilities(&self) -> CompilerCapabilities {
        self.capabilities
    }

    fn compile(&self, request: &CompileRequest, log: &mut ChunkLog) -> BuildResult<CompileResponse> {
        self.requests
            .lock()
            .unwrap()
            .push(request.sources.keys().cloned().collect());

        let mut response = CompileResponse::succeeded();
        for (package, sources) in &request.sources {
            let mut output = PackageOutput::default();
            let mut api = PubApi::new();
            for source in sources {
                if !self.compile_source(package, source, &mut output, &mut api, log)? {
                    response.success = false;
                }
            }
            output.pubapi = Some(api);
            response.packages.insert(package.clone(), output);
        }
        if !response.success {
            response.stderr = "compilation failed\n".to_string();
        }
        Ok(response)
    }
}

/// A project in a temp directory: sources under `src/`, outputs under `out/`
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn src(&self) -> PathBuf {
        self.root().join("src")
    }

    pub fn out(&self) -> PathBuf {
        self.root().join("out")
    }

    pub fn ledger(&self) -> PathBuf {
        self.root().join(".kiln/kiln.state")
    }

    pub fn config(&self) -> BuildConfig {
        BuildConfig::new()
            .with_base_dir(self.root())
            .with_suffixes(vec![".src".to_string()])
            .with_parallelism(2)
    }

    /// Write a source relative to `src/` with a fixed timestamp
    pub fn write(&self, relative: &str, text: &str, mtime: u64) -> PathBuf {
        let path = self.src().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        set_mtime(&path, mtime);
        path
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.src().join(relative)).unwrap();
    }

    /// Path of a type's artifact under `out/`
    pub fn artifact(&self, module: &str, package: &str, simple: &str) -> PathBuf {
        let mut path = self.out().join(module);
        for part in package.split('.').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.join(format!("{}.out", simple))
    }

    pub fn ledger_text(&self) -> String {
        fs::read_to_string(self.ledger()).unwrap()
    }
}
