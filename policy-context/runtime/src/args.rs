use crate::{
    core::{
        client::{ConfigMapResolver, RawClient},
        CallContext, CancellationToken, JsonContext, JsonPathEngine, QueryEngine, Toggles,
    },
    k8s::{ContextEntry, Rule},
    loaders::{
        k8s::{KubeConfigMapResolver, KubeRawClient},
        Clients, DefaultContextLoaderFactory,
    },
    registry::{
        HttpConnector, KeychainClientFactory, Platform, RegistryClientFactory, RegistryKeychain,
    },
};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::Duration;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "policy-context", about = "Resolves a policy rule's context")]
pub struct Args {
    #[clap(
        long,
        default_value = "policy_context=info,warn",
        env = "POLICY_CONTEXT_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// A YAML or JSON file holding a rule or a list of context entries.
    #[clap(long)]
    entries: PathBuf,

    /// A JSON file holding the admission request, stored as `request`.
    #[clap(long)]
    request: Option<PathBuf>,

    #[clap(long, default_value = "policy")]
    policy: String,

    /// Overrides `FLAG_ENABLE_DEFERRED_LOADING`.
    #[clap(long)]
    deferred_loading: Option<bool>,

    /// Resolves ConfigMap and API call entries with a Kubernetes client.
    ///
    /// Without it, those entries are skipped.
    #[clap(long)]
    kube: bool,

    /// Disables image registry entries.
    #[clap(long)]
    registry_disabled: bool,

    /// The platform selected from multi-platform images.
    #[clap(long, default_value = "linux/amd64")]
    image_platform: Platform,

    /// Prints only the value of this expression.
    #[clap(long)]
    query: Option<String>,

    #[clap(long, default_value = "30000")]
    timeout_ms: u64,
}

/// The contents of an `--entries` file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntriesFile {
    Rule(Rule),
    Entries(Vec<ContextEntry>),
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            entries,
            request,
            policy,
            deferred_loading,
            kube,
            registry_disabled,
            image_platform,
            query,
            timeout_ms,
        } = self;

        log_format.try_init(log_level)?;

        let rule = read_rule(&entries)?;
        let request = match request {
            Some(path) => {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_slice::<Value>(&bytes)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => Value::Object(Default::default()),
        };

        let mut toggles = Toggles::from_env();
        if let Some(enabled) = deferred_loading {
            toggles = toggles.with_deferred_loading(enabled);
        }

        let mut clients = Clients::default();
        let mut config_maps = None;
        if kube {
            let client = client.try_client().await?;
            config_maps = Some(
                Arc::new(KubeConfigMapResolver::new(client.clone())) as Arc<dyn ConfigMapResolver>
            );
            clients.raw = Some(Arc::new(KubeRawClient::new(client)) as Arc<dyn RawClient>);
        }
        if !registry_disabled {
            let connector = HttpConnector::new(image_platform)?;
            clients.registry = Some(Arc::new(KeychainClientFactory::new(
                RegistryKeychain::new(),
                connector,
            )) as Arc<dyn RegistryClientFactory>);
        }

        let factory = DefaultContextLoaderFactory::new(config_maps)
            .with_span(info_span!("policy_context"))
            .with_initializer(move |context| {
                context.add_entry("request", request.clone());
                Ok(())
            });

        let token = CancellationToken::new();
        let cx = CallContext::new(token.clone(), toggles);
        let timeout = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                info!(timeout_ms, "Deadline exceeded");
                token.cancel();
            }
        });

        let engine: Arc<dyn QueryEngine> = Arc::new(JsonPathEngine::new());
        let context = JsonContext::new();
        let res = async {
            factory
                .loader(&policy, &rule)
                .load(&cx, &engine, &clients, &rule.context, &context)
                .await?;
            debug!(deferred = ?context.deferred_names(), "Context loaded");

            let output = match query.as_deref() {
                Some(expr) => context.query(&*engine, expr).await?.unwrap_or(Value::Null),
                None => context.load_all().await?,
            };
            Ok::<_, anyhow::Error>(output)
        }
        .instrument(info_span!("rule", rule = %rule.name))
        .await;
        timeout.abort();

        println!("{}", serde_json::to_string_pretty(&res?)?);
        Ok(())
    }
}

fn read_rule(path: &Path) -> Result<Rule> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file = serde_yaml::from_slice::<EntriesFile>(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(match file {
        EntriesFile::Rule(rule) => rule,
        EntriesFile::Entries(context) => Rule {
            name: "rule".to_string(),
            context,
        },
    })
}
