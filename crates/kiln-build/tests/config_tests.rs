//! Builds driven by an on-disk `kiln.toml`

mod common;

use common::{pkg, ToyCompiler, T0};
use kiln_build::{BuildConfig, Builder, CompatibilityMode, Compiler};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const CONFIG: &str = r#"
[build]
output_roots = ["build/classes"]
state_dir = "build/state"
parallelism = 1
compatibility = "member-superset"

[sources]
roots = ["code"]
suffixes = [".src"]
exclude = ["**/scratch/**"]
"#;

fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    common::set_mtime(&path, T0);
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "kiln.toml", CONFIG);
    write(dir.path(), "code/app/kiln-module", "app\n");
    write(dir.path(), "code/app/core/Core.src", "pub fn run()\n");
    write(dir.path(), "code/app/ui/View.src", "use app:core.Core\n");
    write(dir.path(), "code/app/scratch/Wip.src", "error not ready\n");
    dir
}

fn build(dir: &Path, config: BuildConfig) -> kiln_build::BuildOutcome {
    let compiler: Arc<dyn Compiler> = Arc::new(ToyCompiler::new(dir.join("build/classes")));
    Builder::new(config, compiler).build().unwrap()
}

#[test]
fn test_build_from_config_file() {
    let dir = project();
    let config = BuildConfig::load_from_directory(&dir.path().join("code/app/ui")).unwrap();
    assert_eq!(config.build.compatibility, CompatibilityMode::MemberSuperset);
    assert_eq!(config.ledger_path(), dir.path().join("build/state/kiln.state"));

    let outcome = build(dir.path(), config);

    assert!(outcome.success, "{}", outcome.failure_text);
    let expected: BTreeSet<_> = [pkg("app:core"), pkg("app:ui")].into_iter().collect();
    assert_eq!(outcome.compiled, expected);
    assert!(dir.path().join("build/classes/app/core/Core.out").exists());
    assert!(dir.path().join("build/state/kiln.state").exists());
}

#[rstest]
#[case::compiler_args("parallelism = 1", "parallelism = 1\ncompiler_args = [\"-g\"]", true)]
#[case::parallelism("parallelism = 1", "parallelism = 3", false)]
fn test_config_edits_and_rebuilds(#[case] from: &str, #[case] to: &str, #[case] rebuilds: bool) {
    let dir = project();
    build(dir.path(), BuildConfig::load_from_directory(dir.path()).unwrap());

    let edited = CONFIG.replacen(from, to, 1);
    fs::write(dir.path().join("kiln.toml"), edited).unwrap();
    let outcome = build(dir.path(), BuildConfig::load_from_directory(dir.path()).unwrap());

    assert!(outcome.success);
    assert_eq!(outcome.ledger_notice.is_some(), rebuilds);
    assert_eq!(outcome.compiled.len(), if rebuilds { 2 } else { 0 });
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "kiln.toml", "[build]\noutput_dirs = [\"out\"]\n");
    assert!(BuildConfig::load_from_directory(dir.path()).is_err());
}
