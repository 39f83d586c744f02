//! Integration tests for extension activation.
//!
//! Covers the memoized record behavior: at-most-once execution under
//! concurrent requests, dependency ordering and isolation, empty and
//! host-delegated extensions, and case-insensitive identifier joins.

use std::sync::Arc;
use std::time::Duration;

use innesto_kernel::activation::ActivationReason;
use innesto_kernel::config::Config;
use innesto_kernel::error::KernelError;
use innesto_kernel::extension::{ExtensionDescriptor, ExtensionId};
use innesto_kernel::service::ExtensionService;
use innesto_test_utils::{
    ModuleScript, ScriptedLoader, ScriptedRemote, StaticProbe, descriptor, host_services,
    host_with_loader, owned_catalog,
};
use serde_json::json;

fn reason() -> ActivationReason {
    ActivationReason::on_demand("onCommand:test")
}

async fn started(
    descriptors: Vec<ExtensionDescriptor>,
    loader: &Arc<ScriptedLoader>,
) -> ExtensionService {
    let service = ExtensionService::new(
        Config::default(),
        owned_catalog(descriptors),
        host_with_loader(Arc::clone(loader)),
        Vec::new(),
    );
    service.start().await.expect("startup failed");
    service
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_activation() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.script(
        "a.ext",
        ModuleScript::with_exports(json!({"api": 1})).activate_delay(Duration::from_millis(10)),
    );
    let service = started(vec![descriptor("a.ext").build()], &loader).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .activate_by_id(&ExtensionId::new("a.ext"), reason())
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(loader.activate_calls("a.ext"), 1);
    let ext = service
        .get_activated_extension(&ExtensionId::new("a.ext"))
        .unwrap();
    assert_eq!(
        ext.exports
            .as_ref()
            .unwrap()
            .downcast_ref::<serde_json::Value>(),
        Some(&json!({"api": 1}))
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_failure() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.script(
        "a.ext",
        ModuleScript::failing("boom").activate_delay(Duration::from_millis(10)),
    );
    let service = started(vec![descriptor("a.ext").build()], &loader).await;

    let first = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .activate_by_id(&ExtensionId::new("a.ext"), reason())
                .await
        })
    };
    let second = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await;
    let first = first.await.unwrap();

    let first_err = first.unwrap_err().to_string();
    let second_err = second.unwrap_err().to_string();
    assert_eq!(first_err, second_err);
    assert!(first_err.contains("boom"));
    assert_eq!(loader.activate_calls("a.ext"), 1);

    // The failure stays on the record; it is not retried.
    let again = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await;
    assert!(again.is_err());
    assert_eq!(loader.activate_calls("a.ext"), 1);
    assert!(matches!(
        service.get_activated_extension(&ExtensionId::new("a.ext")),
        Err(KernelError::NotActivated { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn dependencies_activate_before_the_dependent() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(
        vec![
            descriptor("a.ext").depends_on("b.ext").build(),
            descriptor("b.ext").depends_on("c.ext").build(),
            descriptor("c.ext").build(),
        ],
        &loader,
    )
    .await;

    service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap();

    let order = loader.activation_order();
    assert_eq!(
        order,
        vec![
            ExtensionId::new("c.ext"),
            ExtensionId::new("b.ext"),
            ExtensionId::new("a.ext"),
        ]
    );
    assert!(service.is_activated(&ExtensionId::new("b.ext")));
    assert!(service.is_activated(&ExtensionId::new("c.ext")));
}

#[tokio::test(start_paused = true)]
async fn missing_dependency_fails_only_the_dependent() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(
        vec![
            descriptor("a.ext").depends_on("ghost.ext").build(),
            descriptor("c.ext").build(),
        ],
        &loader,
    )
    .await;

    let err = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap_err();
    assert_eq!(
        err.missing_dependency(),
        Some(&ExtensionId::new("ghost.ext"))
    );
    // The module never loaded.
    assert_eq!(loader.activate_calls("a.ext"), 0);

    // An unrelated extension in the same batch is unaffected.
    service
        .activate_by_id(&ExtensionId::new("c.ext"), reason())
        .await
        .unwrap();
    assert!(service.is_activated(&ExtensionId::new("c.ext")));
}

#[tokio::test(start_paused = true)]
async fn dependency_cycles_are_unresolvable() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(
        vec![
            descriptor("a.ext").depends_on("b.ext").build(),
            descriptor("b.ext").depends_on("a.ext").build(),
        ],
        &loader,
    )
    .await;

    let err = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::MissingExtensionDependency { .. }
    ));
    assert_eq!(loader.activate_calls("a.ext"), 0);
    assert_eq!(loader.activate_calls("b.ext"), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_dependency_fails_the_dependent_with_the_cause() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.script("b.ext", ModuleScript::failing("dependency exploded"));
    let service = started(
        vec![
            descriptor("a.ext").depends_on("b.ext").build(),
            descriptor("b.ext").build(),
        ],
        &loader,
    )
    .await;

    let err = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap_err();

    // The dependency exists, so this is a captured failure, not a missing
    // dependency.
    assert!(err.missing_dependency().is_none());
    assert!(matches!(err, KernelError::ActivationFailed { .. }));
    assert!(err.to_string().contains("b.ext"));

    // The dependency's own record holds its own failure.
    let dep_err = service
        .activate_by_id(&ExtensionId::new("b.ext"), reason())
        .await
        .unwrap_err();
    assert!(dep_err.to_string().contains("dependency exploded"));
}

#[tokio::test(start_paused = true)]
async fn unknown_ids_are_ignored_at_the_public_boundary() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(vec![descriptor("a.ext").build()], &loader).await;

    service
        .activate_by_id(&ExtensionId::new("ghost.ext"), reason())
        .await
        .unwrap();
    assert!(!service.is_activated(&ExtensionId::new("ghost.ext")));
}

#[tokio::test(start_paused = true)]
async fn empty_extensions_activate_without_loading_code() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(vec![descriptor("a.ext").empty().build()], &loader).await;

    service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap();

    let ext = service
        .get_activated_extension(&ExtensionId::new("a.ext"))
        .unwrap();
    assert!(ext.exports.is_none());
    assert!(loader.activation_order().is_empty());
}

#[tokio::test(start_paused = true)]
async fn host_delegated_extensions_install_a_placeholder() {
    let loader = Arc::new(ScriptedLoader::new());
    let remote = Arc::new(ScriptedRemote::new());
    let service = ExtensionService::new(
        Config::default(),
        owned_catalog(vec![descriptor("a.ext").remote().build()]),
        host_services(
            Arc::clone(&loader),
            Arc::new(StaticProbe::new()),
            Arc::clone(&remote),
        ),
        Vec::new(),
    );
    service.start().await.unwrap();

    service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap();

    assert_eq!(remote.calls(), vec![ExtensionId::new("a.ext")]);
    let ext = service
        .get_activated_extension(&ExtensionId::new("a.ext"))
        .unwrap();
    assert!(ext.exports.is_none());
    assert_eq!(ext.subscription_count(), 0);
    // The local module-load path never ran.
    assert!(loader.activation_order().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delegated_failure_is_captured_on_the_record() {
    let loader = Arc::new(ScriptedLoader::new());
    let remote = Arc::new(ScriptedRemote::new().failing_for("a.ext"));
    let service = ExtensionService::new(
        Config::default(),
        owned_catalog(vec![descriptor("a.ext").remote().build()]),
        host_services(
            Arc::clone(&loader),
            Arc::new(StaticProbe::new()),
            remote,
        ),
        Vec::new(),
    );
    service.start().await.unwrap();

    let err = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::ActivationFailed { .. }));
    assert!(!service.is_activated(&ExtensionId::new("a.ext")));
}

#[tokio::test(start_paused = true)]
async fn identifiers_join_case_insensitively() {
    let loader = Arc::new(ScriptedLoader::new());
    let service = started(vec![descriptor("Publisher.Ext").build()], &loader).await;

    service
        .activate_by_id(&ExtensionId::new("publisher.ext"), reason())
        .await
        .unwrap();
    service
        .activate_by_id(&ExtensionId::new("PUBLISHER.EXT"), reason())
        .await
        .unwrap();

    assert_eq!(loader.activate_calls("Publisher.Ext"), 1);
    assert!(service.is_activated(&ExtensionId::new("publisher.EXT")));
}

#[tokio::test(start_paused = true)]
async fn bare_modules_export_their_loaded_value() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.script("a.ext", ModuleScript::bare(Some(json!("surface"))));
    let service = started(vec![descriptor("a.ext").build()], &loader).await;

    service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap();

    let ext = service
        .get_activated_extension(&ExtensionId::new("a.ext"))
        .unwrap();
    assert_eq!(
        ext.exports
            .as_ref()
            .unwrap()
            .downcast_ref::<serde_json::Value>(),
        Some(&json!("surface"))
    );
    // There is no activate hook to run.
    assert!(loader.activation_order().is_empty());
}

#[tokio::test(start_paused = true)]
async fn load_failures_are_activation_failures() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.script("a.ext", ModuleScript::load_failing("corrupt entry point"));
    let service = started(vec![descriptor("a.ext").build()], &loader).await;

    let err = service
        .activate_by_id(&ExtensionId::new("a.ext"), reason())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("corrupt entry point"));
}
