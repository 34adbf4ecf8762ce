//! Module lifecycle tests
//!
//! Loading, hot replacement, unloading and failure isolation through the
//! full-capability module manager.

mod common;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addon_host::module::image::{ContractKind, ModuleImage};
use addon_host::module::manager::{AddonManager, ModuleManager};
use addon_host::module::sandbox::{InProcessValidator, ModuleValidator};
use addon_host::module::validation::{ValidationPolicy, Verdict};
use addon_host::{LifecycleEventKind, ModuleState};
use common::*;

const GREETER: &str = "Greeter.Entry";

fn setup(hotloadable: bool, behavior: Behavior) -> (AddonTestFixture, ModuleManager, std::path::PathBuf) {
    let fixture = AddonTestFixture::new().unwrap();
    fixture.register(GREETER, behavior);
    let manager = ModuleManager::new(fixture.engine());
    let path = write_image(
        &fixture.config.modules_dir,
        "greeter",
        &simple_image("Greeter", ContractKind::Module, hotloadable),
    );
    (fixture, manager, path)
}

#[tokio::test]
async fn test_load_activates_and_tracks() {
    let (fixture, manager, path) = setup(true, Behavior::default());

    let addon = manager.load(&path, "test").await.expect("loaded");
    assert_eq!(addon.type_name(), GREETER);
    assert_eq!(manager.state(&path), ModuleState::Loaded);

    let record = manager.record(&path).await.unwrap();
    assert_eq!(record.logical_name, "Greeter");
    assert!(record.identity.starts_with("Greeter_"));
    assert!(record.can_hotload);
    assert!(!record.is_inert());

    assert_eq!(
        fixture.hooks_of(GREETER),
        vec!["hydrate", "awake", "on_loaded", "on_enable"]
    );

    let loaded = manager.loaded().await;
    assert_eq!(loaded.get(GREETER).map(|(p, _)| p.clone()), Some(path.clone()));
    assert!(manager.shared().await.contains_key(GREETER));
}

#[tokio::test]
async fn test_non_hotloadable_module_is_not_replaced() {
    let (fixture, manager, path) = setup(false, Behavior::default());
    let (_, mut failures) = manager
        .core()
        .engine()
        .events()
        .subscribe(&[LifecycleEventKind::ModuleUnloadFailed]);

    manager.load(&path, "test").await.expect("first load");
    let identity = manager.record(&path).await.unwrap().identity;
    let loads = fixture.native_loads();

    assert!(manager.load(&path, "test").await.is_none());
    assert_eq!(manager.record(&path).await.unwrap().identity, identity);
    assert_eq!(fixture.native_loads(), loads);

    // Unload is refused as well
    manager.unload(&path, "test").await;
    assert!(manager.record(&path).await.is_some());
    assert_eq!(failures.try_recv().unwrap().file, path);
    assert!(!fixture.hooks_of(GREETER).contains(&"on_unloaded".to_string()));

    // Shutdown is not subject to the marker
    manager.shutdown().await;
    assert!(manager.record(&path).await.is_none());
    assert_eq!(fixture.hooks_of(GREETER).last().unwrap(), "on_unloaded");
}

#[tokio::test]
async fn test_rejected_image_never_reaches_loader() {
    let mut fixture = AddonTestFixture::new().unwrap();
    fixture.config.validation.deny_patterns = vec!["^Forbidden".to_string()];
    fixture.register(GREETER, Behavior::default());
    let manager = ModuleManager::new(fixture.engine());

    let image = simple_image("Greeter", ContractKind::Module, true)
        .with_reference("Forbidden.Net", "1.0.0");
    let path = write_image(&fixture.config.modules_dir, "greeter", &image);

    assert!(manager.load(&path, "test").await.is_none());
    assert_eq!(fixture.native_loads(), 0);
    assert!(manager.record(&path).await.is_none());
    assert!(fixture.hooks().is_empty());
    match manager.state(&path) {
        ModuleState::Failed(reason) => assert!(reason.contains("Forbidden.Net")),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_activation_failure_leaves_inert_record() {
    let (fixture, manager, path) = setup(false, Behavior::failing("on_loaded"));
    let (_, mut events) = manager
        .core()
        .engine()
        .events()
        .subscribe(&[LifecycleEventKind::ModuleLoadFailed, LifecycleEventKind::ModuleLoaded]);

    assert!(manager.load(&path, "test").await.is_none());
    let record = manager.record(&path).await.expect("inert record kept");
    assert!(record.is_inert());
    assert!(matches!(manager.state(&path), ModuleState::Failed(_)));
    assert!(manager.loaded().await.is_empty());
    assert_eq!(events.try_recv().unwrap().kind, LifecycleEventKind::ModuleLoadFailed);

    // An inert record never blocks a corrected load, hotloadable or not
    fixture.register(GREETER, Behavior::default());
    assert!(manager.load(&path, "test").await.is_some());
    assert!(!manager.record(&path).await.unwrap().is_inert());
    assert_eq!(events.try_recv().unwrap().kind, LifecycleEventKind::ModuleLoaded);
}

#[tokio::test]
async fn test_panicking_hook_is_contained() {
    let (_fixture, manager, path) = setup(true, Behavior::panicking("awake"));

    assert!(manager.load(&path, "test").await.is_none());
    match manager.state(&path) {
        ModuleState::Failed(reason) => assert!(reason.contains("panicked")),
        other => panic!("unexpected state {:?}", other),
    }
    assert!(manager.record(&path).await.unwrap().is_inert());
}

#[tokio::test]
async fn test_failed_replacement_keeps_previous_instance() {
    let (fixture, manager, path) = setup(true, Behavior::default());

    let first = manager.load(&path, "test").await.unwrap();
    let identity = manager.record(&path).await.unwrap().identity;

    std::fs::write(&path, b"definitely not an image").unwrap();
    assert!(manager.load(&path, "test").await.is_none());

    let record = manager.record(&path).await.unwrap();
    assert_eq!(record.identity, identity);
    assert!(record.addons[0].ptr_eq(&first));
    assert_eq!(manager.state(&path), ModuleState::Loaded);
    assert!(!fixture.hooks_of(GREETER).contains(&"on_unloaded".to_string()));
}

#[tokio::test]
async fn test_replacement_retires_previous_instance() {
    let (fixture, manager, path) = setup(true, Behavior::default());

    let first = manager.load(&path, "test").await.unwrap();
    let first_identity = manager.record(&path).await.unwrap().identity;
    let second = manager.load(&path, "test").await.unwrap();
    assert!(!first.ptr_eq(&second));

    // The old instance is retired before the new one activates
    assert_eq!(
        fixture.hooks_of(GREETER),
        vec![
            "hydrate", "awake", "on_loaded", "on_enable", "on_unloaded", "hydrate", "awake",
            "on_loaded", "on_enable",
        ]
    );
    let retired = format!("{}:on_unloaded:{}", GREETER, first_identity);
    assert!(fixture.hooks().contains(&retired));
}

#[tokio::test]
async fn test_every_load_gets_a_fresh_identity() {
    let (_fixture, manager, path) = setup(true, Behavior::default());

    let mut identities = HashSet::new();
    for _ in 0..5 {
        manager.load(&path, "test").await.unwrap();
        identities.insert(manager.record(&path).await.unwrap().identity);
    }
    assert_eq!(identities.len(), 5);
    assert!(identities.iter().all(|id| id.starts_with("Greeter_")));
}

#[tokio::test]
async fn test_concurrent_reloads_are_serialized() {
    let (fixture, manager, path) = setup(true, Behavior::default());
    let manager = Arc::new(manager);
    manager.load(&path, "test").await.unwrap();

    let a = {
        let manager = Arc::clone(&manager);
        let path = path.clone();
        tokio::spawn(async move { manager.reload(&path, "watcher").await })
    };
    let b = {
        let manager = Arc::clone(&manager);
        let path = path.clone();
        tokio::spawn(async move { manager.reload(&path, "watcher").await })
    };
    assert!(a.await.unwrap().is_some());
    assert!(b.await.unwrap().is_some());

    // Never two live instances at once
    let mut live = 0i32;
    for hook in fixture.hooks_of(GREETER) {
        match hook.as_str() {
            "on_loaded" => live += 1,
            "on_unloaded" => live -= 1,
            _ => {}
        }
        assert!((0..=1).contains(&live), "overlapping instances");
    }
    assert_eq!(live, 1);
    assert_eq!(manager.state(&path), ModuleState::Loaded);
}

#[tokio::test]
async fn test_unload_publishes_and_forgets_reference() {
    let (fixture, manager, path) = setup(true, Behavior::default());
    let engine = Arc::clone(manager.core().engine());
    let (_, mut unloaded) = engine.events().subscribe(&[LifecycleEventKind::ModuleUnloaded]);

    manager.load(&path, "test").await.unwrap();
    assert!(engine.resolver().cached("Greeter").is_some());

    manager.unload(&path, "test").await;
    let event = unloaded.try_recv().unwrap();
    assert_eq!(event.addon.unwrap().type_name(), GREETER);
    assert!(event.shared_types.contains(&GREETER.to_string()));

    assert!(manager.record(&path).await.is_none());
    assert!(engine.resolver().cached("Greeter").is_none());
    assert_eq!(manager.state(&path), ModuleState::Removed);
    assert_eq!(fixture.hooks_of(GREETER).last().unwrap(), "on_unloaded");
}

#[tokio::test]
async fn test_unload_of_untracked_file_is_a_noop() {
    let (fixture, manager, path) = setup(true, Behavior::default());
    manager.unload(&path, "test").await;
    assert_eq!(manager.state(&path), ModuleState::Unloaded);
    assert!(fixture.hooks().is_empty());
}

#[tokio::test]
async fn test_module_unload_hook_failure_is_logged_only() {
    let (_fixture, manager, path) = setup(true, Behavior::failing("on_unloaded"));
    let (_, mut failures) = manager
        .core()
        .engine()
        .events()
        .subscribe(&[LifecycleEventKind::ModuleUnloadFailed]);

    manager.load(&path, "test").await.unwrap();
    manager.unload(&path, "test").await;

    assert!(failures.try_recv().is_err());
    assert!(manager.record(&path).await.is_none());
}

#[tokio::test]
async fn test_unsupported_and_missing_files() {
    let (fixture, manager, _path) = setup(true, Behavior::default());

    let text = fixture.config.modules_dir.join("notes.txt");
    std::fs::write(&text, b"hello").unwrap();
    assert!(manager.load(&text, "test").await.is_none());
    assert!(matches!(manager.state(&text), ModuleState::Failed(ref r) if r.contains("Unsupported")));

    let missing = fixture.config.modules_dir.join("ghost.amod");
    assert!(manager.load(&missing, "test").await.is_none());
    assert!(matches!(manager.state(&missing), ModuleState::Failed(ref r) if r.contains("not found")));
    assert_eq!(fixture.native_loads(), 0);
}

#[tokio::test]
async fn test_unregistered_type_fails_before_activation() {
    let fixture = AddonTestFixture::new().unwrap();
    let manager = ModuleManager::new(fixture.engine());
    let image = ModuleImage::new("Orphan", "1.0.0").with_type("Orphan.Entry", ContractKind::Module, true);
    let path = write_image(&fixture.config.modules_dir, "orphan", &image);

    assert!(manager.load(&path, "test").await.is_none());
    assert!(manager.record(&path).await.is_none());
    assert!(manager.core().engine().resolver().cached("Orphan").is_none());
}

#[tokio::test]
async fn test_identical_bytes_load_natively_once() {
    let (fixture, manager, _path) = setup(true, Behavior::default());
    let engine = manager.core().engine();
    let bytes = simple_image("Greeter", ContractKind::Module, true).to_bytes().unwrap();

    let a = engine.cache().get_or_load("Greeter", &bytes).unwrap();
    let b = engine.cache().get_or_load("Greeter", &bytes).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(fixture.native_loads(), 1);
    assert_eq!(engine.read("Greeter"), Some(bytes));
}

#[tokio::test]
async fn test_failed_reload_keeps_running_module() {
    let (fixture, manager, path) = setup(true, Behavior::default());

    let first = manager.load(&path, "test").await.unwrap();
    let identity = manager.record(&path).await.unwrap().identity;

    std::fs::write(&path, b"half-written image").unwrap();
    assert!(manager.reload(&path, "watcher").await.is_none());

    let record = manager.record(&path).await.expect("previous record kept");
    assert_eq!(record.identity, identity);
    assert!(record.addons[0].ptr_eq(&first));
    assert_eq!(manager.state(&path), ModuleState::Loaded);
    assert!(!fixture.hooks_of(GREETER).contains(&"on_unloaded".to_string()));
    assert_eq!(manager.loaded().await.len(), 1);
}

#[tokio::test]
async fn test_reload_of_non_hotloadable_module_is_refused() {
    let (fixture, manager, path) = setup(false, Behavior::default());
    let (_, mut failures) = manager
        .core()
        .engine()
        .events()
        .subscribe(&[LifecycleEventKind::ModuleUnloadFailed]);

    manager.load(&path, "test").await.unwrap();
    let identity = manager.record(&path).await.unwrap().identity;
    let loads = fixture.native_loads();

    assert!(manager.reload(&path, "watcher").await.is_none());
    assert_eq!(manager.record(&path).await.unwrap().identity, identity);
    assert_eq!(fixture.native_loads(), loads);
    assert_eq!(failures.try_recv().unwrap().file, path);
}

/// Accepts whatever it was shown, then replaces the file on disk
struct SwappingValidator {
    replacement: Vec<u8>,
}

#[async_trait]
impl ModuleValidator for SwappingValidator {
    async fn inspect_bytes(&self, path: &Path, bytes: &[u8], policy: &ValidationPolicy) -> Verdict {
        let verdict = InProcessValidator.inspect_bytes(path, bytes, policy).await;
        std::fs::write(path, &self.replacement).unwrap();
        verdict
    }
}

#[tokio::test]
async fn test_file_swapped_after_validation_is_not_loaded() {
    let mut fixture = AddonTestFixture::new().unwrap();
    fixture.config.validation.deny_patterns = vec!["^Forbidden".to_string()];
    fixture.register(GREETER, Behavior::default());

    let forbidden = simple_image("Greeter", ContractKind::Module, true)
        .with_reference("Forbidden.Net", "1.0.0")
        .to_bytes()
        .unwrap();
    let manager = ModuleManager::new(fixture.engine_with_validator(Arc::new(SwappingValidator {
        replacement: forbidden,
    })));
    let path = write_image(
        &fixture.config.modules_dir,
        "greeter",
        &simple_image("Greeter", ContractKind::Module, true),
    );

    manager.load(&path, "test").await.expect("validated image loads");
    let record = manager.record(&path).await.unwrap();
    assert!(record
        .module
        .image()
        .references
        .iter()
        .all(|r| r.name != "Forbidden.Net"));

    // The swapped file is rejected once it is what gets read
    assert!(manager.load(&path, "test").await.is_none());
    assert_eq!(manager.record(&path).await.unwrap().identity, record.identity);
}

#[tokio::test]
async fn test_references_are_resolved_at_load() {
    let fixture = AddonTestFixture::new().unwrap();
    fixture.register("Core.Entry", Behavior::default());
    fixture.register("App.Entry", Behavior::default());
    let manager = ModuleManager::new(fixture.engine());

    let core: PathBuf = write_image(
        &fixture.config.modules_dir,
        "Core",
        &simple_image("Core", ContractKind::Module, true),
    );
    let app = write_image(
        &fixture.config.modules_dir,
        "App",
        &simple_image("App", ContractKind::Module, true)
            .with_reference("Core", "1.0.0")
            .with_reference("Missing", "1.0.0"),
    );

    manager.load(&core, "test").await.unwrap();
    let core_identity = manager.record(&core).await.unwrap().identity;

    // A missing reference is reported, not fatal
    manager.load(&app, "test").await.expect("loads without Missing");
    let record = manager.record(&app).await.unwrap();
    assert_eq!(record.unresolved_references, vec!["Missing".to_string()]);

    let names: Vec<_> = record
        .module
        .image()
        .references
        .iter()
        .map(|r| r.name.clone())
        .collect();
    assert_eq!(names, vec![core_identity, "Missing".to_string()]);
}
