use crate::{CancellationToken, DeferredLoader, JsonContext, JsonPathEngine, LoadError, Loader};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Notify;

/// Stores a fixed outcome under `name`, counting executions.
struct TestLoader {
    name: &'static str,
    outcome: Result<Value, &'static str>,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
}

#[async_trait::async_trait]
impl Loader for TestLoader {
    async fn load_data(&self, context: &JsonContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.as_ref() {
            gate.notified().await;
        }
        let value = self.outcome.clone().map_err(anyhow::Error::msg)?;
        context.add_entry(self.name, value);
        Ok(())
    }
}

/// Reads another entry, copying its value.
struct CopyLoader {
    name: &'static str,
    from: &'static str,
}

#[async_trait::async_trait]
impl Loader for CopyLoader {
    async fn load_data(&self, context: &JsonContext) -> anyhow::Result<()> {
        let value = context
            .get(self.from)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{} is undefined", self.from))?;
        context.add_entry(self.name, value);
        Ok(())
    }
}

fn test_loader(
    name: &'static str,
    outcome: Result<Value, &'static str>,
) -> (TestLoader, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = TestLoader {
        name,
        outcome,
        calls: calls.clone(),
        gate: None,
    };
    (loader, calls)
}

fn deferred(
    context: &JsonContext,
    name: &'static str,
    loader: impl Loader + 'static,
    token: &CancellationToken,
) -> Arc<DeferredLoader> {
    let loader = DeferredLoader::new(
        name,
        loader,
        context,
        token.clone(),
        tracing::info_span!("entry", %name),
    );
    context.add_deferred_loader(loader.clone());
    loader
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

#[tokio::test]
async fn deferred_entry_loads_on_first_read() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let (loader, calls) = test_loader("cm", Ok(json!({"data": {"k": "v"}})));
    deferred(&context, "cm", loader, &token);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(context.is_deferred("cm"));
    assert!(!context.contains("cm"));

    let value = context.get("cm").await.expect("load must succeed");
    assert_eq!(value, Some(json!({"data": {"k": "v"}})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!context.is_deferred("cm"), "resolved loaders are discarded");

    context.get("cm").await.expect("load must succeed");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn direct_reload_is_memoized() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let (loader, calls) = test_loader("v", Ok(json!(1)));
    let loader = DeferredLoader::new("v", loader, &context, token, tracing::Span::none());

    loader.load_data().await.expect("first load must succeed");
    loader.load_data().await.expect("second load must succeed");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(context.snapshot(), json!({"v": 1}));
}

#[tokio::test]
async fn failure_is_memoized() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let (loader, calls) = test_loader("api", Err("connection refused"));
    deferred(&context, "api", loader, &token);

    let first = context.get("api").await.expect_err("load must fail");
    let second = context.get("api").await.expect_err("load must fail");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(
        first.to_string(),
        "failed to load context entry api: connection refused"
    );
    assert!(!context.contains("api"), "failed loads must not write");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_readers_share_one_execution() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    deferred(
        &context,
        "image",
        TestLoader {
            name: "image",
            outcome: Ok(json!("sha256:abc")),
            calls: calls.clone(),
            gate: Some(gate.clone()),
        },
        &token,
    );

    let readers = (0..4)
        .map(|_| {
            let context = context.clone();
            tokio::spawn(async move { context.get("image").await })
        })
        .collect::<Vec<_>>();

    // Wait for the first reader to start the load before releasing it.
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    gate.notify_one();

    for reader in readers {
        let value = reader.await.expect("task must not panic");
        assert_eq!(value.expect("load must succeed"), Some(json!("sha256:abc")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_read() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let (loader, calls) = test_loader("cm", Ok(json!({})));
    deferred(&context, "cm", loader, &token);

    token.cancel();
    let err = context.get("cm").await.expect_err("load must be cancelled");
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(context.is_deferred("cm"), "cancellation is not memoized");
    assert!(!context.contains("cm"));
}

#[tokio::test]
async fn cancelled_during_load() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    deferred(
        &context,
        "api",
        TestLoader {
            name: "api",
            outcome: Ok(json!({})),
            calls: calls.clone(),
            // Never notified.
            gate: Some(Arc::new(Notify::new())),
        },
        &token,
    );

    let read = {
        let context = context.clone();
        tokio::spawn(async move { context.get("api").await })
    };
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    token.cancel();

    let err = read
        .await
        .expect("task must not panic")
        .expect_err("load must be cancelled");
    assert!(matches!(err, LoadError::Cancelled { ref name } if name == "api"));
    assert!(context.is_deferred("api"));
    assert!(!context.contains("api"));

    // Subsequent reads fail fast without re-running the fetch.
    context.get("api").await.expect_err("load must be cancelled");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn self_reference_is_a_cycle() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    deferred(
        &context,
        "a",
        CopyLoader {
            name: "a",
            from: "a",
        },
        &token,
    );

    let err = context.get("a").await.expect_err("cycle must fail");
    assert!(
        err.to_string().contains("depends on its own value"),
        "{err}"
    );
}

#[tokio::test]
async fn loaders_may_read_other_deferred_entries() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    deferred(&context, "a", CopyLoader { name: "a", from: "b" }, &token);
    let (loader, calls) = test_loader("b", Ok(json!("bee")));
    deferred(&context, "b", loader, &token);

    assert_eq!(context.get("a").await.unwrap(), Some(json!("bee")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(context.deferred_names().is_empty());
}

#[tokio::test]
async fn query_loads_only_referenced_entries() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    let (cm, cm_calls) = test_loader("cm", Ok(json!({"data": {"team": "web"}})));
    let (api, api_calls) = test_loader("api", Ok(json!([])));
    deferred(&context, "cm", cm, &token);
    deferred(&context, "api", api, &token);

    let team = context
        .query(&JsonPathEngine::new(), "cm.data.team")
        .await
        .expect("query must succeed");
    assert_eq!(team, Some(json!("web")));
    assert_eq!(cm_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api_calls.load(Ordering::SeqCst), 0);
    assert_eq!(context.deferred_names(), vec!["api".to_string()]);
}

#[tokio::test]
async fn nested_fields_do_not_load_entries() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    context.add_entry("request", json!({"object": {"metadata": {"name": "web"}}}));
    let (loader, calls) = test_loader("name", Err("connection refused"));
    deferred(&context, "name", loader, &token);

    let name = context
        .query(&JsonPathEngine::new(), "request.object.metadata.name")
        .await
        .expect("query must not load the name entry");
    assert_eq!(name, Some(json!("web")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(context.is_deferred("name"));
}

#[tokio::test]
async fn deferred_loader_shadows_value() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    context.add_entry("v", json!("seeded"));
    let (loader, _) = test_loader("v", Ok(json!("loaded")));
    deferred(&context, "v", loader, &token);

    assert!(!context.contains("v"));
    assert_eq!(context.get("v").await.unwrap(), Some(json!("loaded")));
}

#[tokio::test]
async fn load_all_preserves_declaration_order() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let token = CancellationToken::new();
    context.add_entry("request", json!({"operation": "CREATE"}));
    for name in ["z", "a", "m"] {
        let (loader, _) = test_loader(name, Ok(json!(name)));
        deferred(&context, name, loader, &token);
    }

    let values = context.load_all().await.expect("loads must succeed");
    let keys = values
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(keys, ["request", "z", "a", "m"]);
}

#[tokio::test]
async fn dropped_context() {
    let _tracing = init_tracing();
    let context = JsonContext::new();
    let (loader, calls) = test_loader("cm", Ok(json!({})));
    let loader = DeferredLoader::new(
        "cm",
        loader,
        &context,
        CancellationToken::new(),
        tracing::Span::none(),
    );
    drop(context);

    let err = loader.load_data().await.expect_err("context is gone");
    assert!(matches!(err, LoadError::ContextDropped { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
