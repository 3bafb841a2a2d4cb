use hotswap_kernel::symbol::{INVOKE, ON_FREE, ON_INIT, ON_LOAD};
use hotswap_runtime::{
    HotswapError, ManagerState, Note, PluginManagerSwapper, StaticRegistry, SwapperConfig,
};
use hotswap_testing::{Fault, HookJournal, MockPlugin, PluginDir, assert_hook_called, init_tracing};

fn plugin_dir(plugins: Vec<MockPlugin>) -> PluginDir {
    init_tracing();
    let mut dir = PluginDir::new().unwrap();
    for plugin in plugins {
        dir.add(plugin).unwrap();
    }
    dir
}

fn ordered_names(swapper: &PluginManagerSwapper) -> Vec<String> {
    swapper
        .current()
        .unwrap()
        .plugins()
        .iter()
        .map(|p| p.name().to_string())
        .collect()
}

#[test]
fn test_dependency_comes_first() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("snow", &journal).depends_on("Arya").without_export(),
        MockPlugin::new("arya", &journal),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());

    let details = swapper.load_plugins(&()).unwrap();
    assert_eq!(details.to_string(), "arya: ok, snow: ok");
    assert_eq!(ordered_names(&swapper), ["arya", "snow"]);

    let current = swapper.current().unwrap();
    assert_eq!(current.state(), ManagerState::Loaded);
    assert_eq!(current.find_plugin("SNOW").unwrap().dependencies(), ["arya"]);
    assert_eq!(
        dir.plugin("snow").unwrap().injected("Arya").as_deref(),
        Some("arya")
    );
    assert_eq!(
        journal.calls_of(ON_LOAD),
        ["arya.hotswap_on_load", "snow.hotswap_on_load"]
    );
    assert_eq!(
        journal.calls_of(ON_INIT),
        ["arya.hotswap_on_init", "snow.hotswap_on_init"]
    );
}

#[test]
fn test_order_is_deterministic() {
    let journal = HookJournal::new();
    let build = || {
        plugin_dir(vec![
            MockPlugin::new("wall", &journal).depends_on("stark").depends_on("tully"),
            MockPlugin::new("tully", &journal),
            MockPlugin::new("stark", &journal).depends_on("arya"),
            MockPlugin::new("arya", &journal),
            MockPlugin::new("bran", &journal),
        ])
    };

    let first = build();
    let second = build();
    let a = PluginManagerSwapper::new(first.config());
    let b = PluginManagerSwapper::new(second.config());
    a.load_plugins(&()).unwrap();
    b.load_plugins(&()).unwrap();

    let order = ordered_names(&a);
    assert_eq!(order, ordered_names(&b));
    assert_eq!(order, ["arya", "bran", "tully", "stark", "wall"]);
}

#[test]
fn test_cycle_is_rejected() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal).depends_on("snow"),
        MockPlugin::new("snow", &journal).depends_on("stark"),
        MockPlugin::new("stark", &journal).depends_on("snow"),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());

    let err = swapper.load_plugins(&()).unwrap_err().to_string();
    assert!(err.contains("cyclic dependency detected"));
    let path: Vec<&str> = err
        .trim_start_matches("cyclic dependency detected: ")
        .split(" -> ")
        .collect();
    assert!(path.len() >= 3);
    assert_eq!(path.first(), path.last());

    assert!(swapper.current().is_none());
    assert_hook_called!(journal, "arya", ON_LOAD, 0);
    assert_hook_called!(journal, "arya", ON_FREE, 1);
}

#[test]
fn test_unknown_dependency_names_field_and_plugin() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal),
        MockPlugin::new("xdep", &journal).depends_on("Xtypo2"),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());
    assert_eq!(
        swapper.load_plugins(&()).unwrap_err().to_string(),
        "unknown dependency: Xtypo2. plugin: xdep"
    );
}

#[test]
fn test_not_reloadable_plugin_with_reloadable_dependency() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal),
        MockPlugin::new("xdep", &journal).depends_on("arya").not_reloadable(),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());
    let err = swapper.load_plugins(&()).unwrap_err();
    assert!(matches!(err, HotswapError::ReloadabilityMismatch { .. }));
    assert!(err.to_string().contains("is NOT reloadable while its dependency"));
}

#[test]
fn test_duplicate_live_function_fails_the_generation() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal).with_live_func("Hello"),
        MockPlugin::new("snow", &journal).with_live_func("Hello"),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());
    assert_eq!(
        swapper.load_plugins(&()).unwrap_err().to_string(),
        "duplicate live function name detected: Hello. plugins: arya, snow"
    );
    assert_hook_called!(journal, "arya", ON_INIT, 0);
    assert_hook_called!(journal, "arya", ON_FREE, 1);
    assert_hook_called!(journal, "snow", ON_FREE, 1);
}

#[test]
fn test_vault_serves_live_functions_and_types() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal)
            .with_live_func("Needle")
            .with_live_type("Sword"),
        MockPlugin::new("snow", &journal).with_live_type("Longclaw"),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());
    swapper.load_plugins(&()).unwrap();

    let current = swapper.current().unwrap();
    let vault = current.vault();
    assert_eq!(vault.live_func::<String>("Needle").map(String::as_str), Some("arya"));
    let sword = vault.new_live_type_as::<String>("Longclaw").unwrap();
    assert_eq!(sword.as_str(), "Longclaw");
    assert!(vault.new_live_type("Ice").is_none());
}

#[test]
fn test_duplicate_names_are_rejected() {
    let journal = HookJournal::new();
    let registry: StaticRegistry = [
        MockPlugin::new("Arya", &journal),
        MockPlugin::new("arya", &journal),
        MockPlugin::new("snow", &journal),
    ]
    .iter()
    .map(MockPlugin::to_static)
    .collect();
    let swapper = PluginManagerSwapper::new(SwapperConfig::from_static(registry));
    let err = swapper.load_plugins(&()).unwrap_err();
    assert_eq!(err.to_string(), "duplicate name detected: Arya, arya");
}

#[test]
fn test_failing_hook_tears_down_the_attempt() {
    let journal = HookJournal::new();
    let snow = MockPlugin::new("snow", &journal).depends_on("arya");
    snow.set_fault(ON_LOAD, Fault::Fail);
    let dir = plugin_dir(vec![MockPlugin::new("arya", &journal), snow]);
    let swapper = PluginManagerSwapper::new(dir.config());

    let err = swapper.load_plugins(&()).unwrap_err();
    assert!(matches!(err, HotswapError::Hook { ref plugin, .. } if plugin == "snow"));
    assert!(err.to_string().contains("snow.hotswap_on_load failed on purpose"));
    assert!(swapper.current().is_none());
    assert_eq!(
        journal.calls_of(ON_FREE),
        ["snow.hotswap_on_free", "arya.hotswap_on_free"]
    );
}

#[test]
fn test_panicking_hook_is_contained() {
    let journal = HookJournal::new();
    let snow = MockPlugin::new("snow", &journal);
    snow.set_fault(ON_INIT, Fault::Panic);
    let dir = plugin_dir(vec![MockPlugin::new("arya", &journal), snow]);
    let swapper = PluginManagerSwapper::new(dir.config());

    let err = swapper.load_plugins(&()).unwrap_err();
    assert!(err.is_panic());
    assert!(err.to_string().starts_with("<hotswap:snow> panic in hotswap_on_init"));
    assert_hook_called!(journal, "arya", ON_FREE, 1);
    assert_hook_called!(journal, "snow", ON_FREE, 1);

    // The failed attempt left nothing behind; a clean retry works.
    dir.plugin("snow").unwrap().clear_faults();
    swapper.load_plugins(&()).unwrap();
    assert!(swapper.current().is_some());
}

#[test]
fn test_invoke_each_isolates_faults() {
    let journal = HookJournal::new();
    let arya = MockPlugin::new("arya", &journal);
    let snow = MockPlugin::new("snow", &journal).depends_on("arya");
    let stark = MockPlugin::new("stark", &journal).depends_on("snow");
    let dir = plugin_dir(vec![arya.clone(), snow.clone(), stark]);
    let swapper = PluginManagerSwapper::new(dir.config());
    swapper.load_plugins(&()).unwrap();

    arya.set_fault(INVOKE, Fault::Panic);
    snow.set_fault(INVOKE, Fault::Fail);
    let current = swapper.current().unwrap();
    current.invoke_each("ping", &[]);
    current.invoke_each_backward("pong", &[]);
    assert_eq!(
        journal.calls_of(INVOKE),
        [
            "arya.hotswap_invoke",
            "snow.hotswap_invoke",
            "stark.hotswap_invoke",
            "stark.hotswap_invoke",
            "snow.hotswap_invoke",
            "arya.hotswap_invoke",
        ]
    );

    let out = current
        .find_plugin("stark")
        .unwrap()
        .invoke("ping", &[])
        .unwrap()
        .unwrap();
    assert_eq!(out.downcast_ref::<String>().map(String::as_str), Some("ping:stark"));
}

#[test]
fn test_source_errors() {
    let journal = HookJournal::new();
    let empty = plugin_dir(Vec::new());
    empty.add_noise("README.md").unwrap();
    let swapper = PluginManagerSwapper::new(empty.config());
    assert!(matches!(
        swapper.load_plugins(&()),
        Err(HotswapError::NoPlugins(_))
    ));

    let missing = PluginManagerSwapper::new(SwapperConfig::new(empty.path().join("nope")));
    assert!(matches!(missing.load_plugins(&()), Err(HotswapError::Io { .. })));

    let file = PluginManagerSwapper::new(SwapperConfig::new(empty.path().join("README.md")));
    assert!(matches!(
        file.load_plugins(&()),
        Err(HotswapError::NotADirectory(_))
    ));

    let dir = plugin_dir(vec![MockPlugin::new("arya", &journal)]);
    dir.add_noise("arya.txt").unwrap();
    let swapper = PluginManagerSwapper::new(dir.config());
    assert_eq!(swapper.load_plugins(&()).unwrap().len(), 1);
    assert!(matches!(
        swapper.load_plugins(&()),
        Err(HotswapError::AlreadyLoaded)
    ));
}

#[test]
fn test_plugin_summary_serializes() {
    let journal = HookJournal::new();
    let dir = plugin_dir(vec![
        MockPlugin::new("arya", &journal),
        MockPlugin::new("snow", &journal).depends_on("arya"),
    ]);
    let swapper = PluginManagerSwapper::new(dir.config());
    swapper.load_plugins(&()).unwrap();

    let current = swapper.current().unwrap();
    let snow = current.find_plugin("snow").unwrap();
    assert_eq!(snow.note(), Note::Ok);
    let json = serde_json::to_value(snow.summary()).unwrap();
    assert_eq!(json["name"], "snow");
    assert_eq!(json["note"], "ok");
    assert_eq!(json["dependencies"], serde_json::json!(["arya"]));
    assert_eq!(json["refs"], 1);
    assert_eq!(json["fingerprint"].as_str().map(str::len), Some(64));
}
