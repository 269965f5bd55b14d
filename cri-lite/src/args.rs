use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use cri_lite_core::{
    ContainerLookup, ImageManagement, PodScoped, Policy, ReadOnly, SandboxResolver,
};
use cri_lite_grpc::{channel, CriProxy, RuntimeLookup};
use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{info, info_span, Instrument};

use crate::config::{Config, Endpoint, PolicyKind};

#[derive(Debug, Parser)]
#[clap(name = "cri-lite", about = "A policy-enforcing CRI proxy", version)]
pub struct Args {
    /// Path to the configuration file.
    #[clap(long, short = 'c', default_value = "config.yaml")]
    config: PathBuf,

    /// Endpoint of the CRI runtime service, overriding the configuration.
    #[clap(long, short = 'r')]
    runtime_endpoint: Option<String>,

    /// Endpoint of the CRI image service, overriding the configuration.
    #[clap(long, short = 'i')]
    image_endpoint: Option<String>,

    /// Log filter directives; overrides the configuration's debug flag.
    #[clap(long, env = "CRI_LITE_LOG")]
    log_level: Option<String>,
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            runtime_endpoint,
            image_endpoint,
            log_level,
        } = self;

        let cfg = Config::load(&config)?;
        init_logging(log_level, cfg.debug)?;
        info!(config = %config.display(), "configuration loaded");

        // Flags override the configured endpoints; the image endpoint falls
        // back to the runtime endpoint.
        let runtime_endpoint = runtime_endpoint.unwrap_or_else(|| cfg.runtime_endpoint.clone());
        let image_endpoint = image_endpoint
            .or_else(|| cfg.image_endpoint.clone())
            .unwrap_or_else(|| runtime_endpoint.clone());
        let timeout = Duration::from_secs(cfg.timeout);

        info!(endpoint = %runtime_endpoint, "connecting to runtime endpoint");
        let runtime = channel(&runtime_endpoint, timeout)
            .context("failed to connect to runtime endpoint")?;
        info!(endpoint = %image_endpoint, "connecting to image endpoint");
        let image =
            channel(&image_endpoint, timeout).context("failed to connect to image endpoint")?;
        let lookup: Arc<dyn ContainerLookup> = Arc::new(RuntimeLookup::new(runtime.clone()));

        if cfg.endpoints.is_empty() {
            bail!("no endpoints configured");
        }

        let (drain_tx, drain_rx) = drain::channel();
        let mut servers = FuturesUnordered::new();
        for endpoint in &cfg.endpoints {
            let policy = build_policy(endpoint, &lookup)?;
            let proxy = CriProxy::new(runtime.clone(), image.clone(), Some(policy));
            let socket = endpoint.endpoint.clone();
            let span = info_span!("listener", socket = %socket.display());
            servers.push(tokio::spawn(
                proxy.serve(socket, drain_rx.clone()).instrument(span),
            ));
        }
        drop(drain_rx);

        tokio::select! {
            res = shutdown_signal() => {
                res?;
                info!("shutting down");
                drain_tx.drain().await;
                Ok(())
            }
            failed = servers.next() => match failed {
                Some(Ok(Ok(()))) => bail!("listener exited unexpectedly"),
                Some(Ok(Err(error))) => Err(error),
                Some(Err(error)) => Err(error.into()),
                None => bail!("no listeners running"),
            },
        }
    }
}

fn init_logging(log_level: Option<String>, debug: bool) -> Result<()> {
    let directives = log_level.unwrap_or_else(|| {
        if debug {
            "cri_lite=debug,info".to_string()
        } else {
            "cri_lite=info,warn".to_string()
        }
    });
    let filter =
        tracing_subscriber::EnvFilter::try_new(directives).context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_policy(endpoint: &Endpoint, lookup: &Arc<dyn ContainerLookup>) -> Result<Arc<dyn Policy>> {
    let policy: Arc<dyn Policy> = match endpoint.policy {
        PolicyKind::ReadOnly => Arc::new(ReadOnly::new()),
        PolicyKind::ImageManagement => Arc::new(ImageManagement::new()),
        PolicyKind::PodScoped => {
            let resolver = SandboxResolver::new(lookup.clone());
            match (&endpoint.pod_sandbox_id, endpoint.pod_sandbox_from_caller_pid) {
                (Some(id), false) if !id.is_empty() => {
                    Arc::new(PodScoped::new(id.clone(), resolver))
                }
                (None, true) => Arc::new(PodScoped::from_caller_pid(resolver)),
                _ => bail!(
                    "PodScoped endpoint {} must set exactly one of pod-sandbox-id and \
                     pod-sandbox-from-caller-pid",
                    endpoint.endpoint.display()
                ),
            }
        }
    };
    Ok(policy)
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install signal handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c"),
        _ = terminate.recv() => Ok(()),
    }
}
