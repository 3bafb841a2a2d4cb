use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};
use std::process::Command;

use hotswap_runtime::{HotswapError, Note, PluginManagerSwapper, SwapperConfig};
use hotswap_testing::init_tracing;

/// Build the greeter fixture into a target directory of its own and return
/// the path of the library.
fn build_greeter() -> PathBuf {
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("fixture-plugins");
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/greeter/Cargo.toml");
    let status = Command::new(option_env!("CARGO").unwrap_or("cargo"))
        .args(["build", "--quiet", "--manifest-path"])
        .arg(&manifest)
        .arg("--target-dir")
        .arg(&target_dir)
        .status()
        .unwrap();
    assert!(status.success(), "building the greeter fixture failed");

    target_dir
        .join("debug")
        .join(format!("{DLL_PREFIX}hotswap_fixture_greeter.{DLL_EXTENSION}"))
}

#[test]
fn test_native_plugin_resolves_through_constructors() {
    init_tracing();
    let built = build_greeter();
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(&built, dir.path().join(format!("greeter.{DLL_EXTENSION}"))).unwrap();

    let swapper = PluginManagerSwapper::new(SwapperConfig::new(dir.path()));
    let details = swapper.load_plugins(&()).unwrap();
    assert_eq!(details.to_string(), "greeter: ok");

    let current = swapper.current().unwrap();
    let greeter = current.find_plugin("greeter").unwrap();
    assert!(greeter.is_reloadable());
    assert_eq!(
        greeter
            .exported()
            .and_then(|v| v.downcast_ref::<String>())
            .map(String::as_str),
        Some("greeter")
    );
    assert_eq!(
        current.vault().data::<String>("greeter").map(String::as_str),
        Some("ready")
    );

    let out = greeter.invoke("arya", &[]).unwrap().unwrap();
    assert_eq!(
        out.downcast_ref::<String>().map(String::as_str),
        Some("hello, arya")
    );

    assert_eq!(
        greeter.lookup_value::<String>("build_tag").unwrap().as_deref(),
        Some("greeter-1")
    );
    assert!(greeter.lookup("hotswap_live_funcs").unwrap().is_none());
    assert!(matches!(
        greeter.lookup("hotswap_live_types"),
        Err(HotswapError::SymbolNotExist { .. })
    ));

    // The library was mapped from a per-generation copy.
    let staged = dir.path().join("tmp").join(current.generation());
    assert_eq!(std::fs::read_dir(&staged).unwrap().count(), 1);

    let details = swapper.reload(&()).unwrap();
    assert_eq!(details.note_of("greeter"), Some(Note::Unchanged));
}
