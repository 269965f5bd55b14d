//! The policy-enforcing proxy server.
//!
//! Every CRI method forwards mechanically: accept the call, let the policy
//! admit (and possibly rewrite) the request, forward it upstream with
//! forwarded metadata, let the policy filter the response. Upstream errors are
//! returned to the caller with their status untouched, so a proxied client
//! observes the same behavior as a direct one wherever the policy does not
//! intervene.

mod image;
mod runtime;

use std::{path::Path, sync::Arc};

use anyhow::{Context as _, Result};
use cri_lite_api::v1::{
    image_service_client::ImageServiceClient, image_service_server::ImageServiceServer,
    runtime_service_client::RuntimeServiceClient, runtime_service_server::RuntimeServiceServer,
};
use cri_lite_core::{self as core, CallContext, PeerIdentity, Policy, Scope};
use futures::prelude::*;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{
    metadata::MetadataMap,
    transport::{server::UdsConnectInfo, Channel, Server},
    Status,
};
use tracing::{info, warn};

/// The CRI proxy served on one listener, bound to at most one policy.
#[derive(Clone, Debug)]
pub struct CriProxy {
    runtime: RuntimeServiceClient<Channel>,
    image: ImageServiceClient<Channel>,
    policy: Option<Arc<dyn Policy>>,
}

// === impl CriProxy ===

impl CriProxy {
    pub fn new(runtime: Channel, image: Channel, policy: Option<Arc<dyn Policy>>) -> Self {
        Self {
            runtime: RuntimeServiceClient::new(runtime),
            image: ImageServiceClient::new(image),
            policy,
        }
    }

    /// Serves RuntimeService and ImageService on `socket_path` until drained.
    pub async fn serve(self, socket_path: impl AsRef<Path>, drain: drain::Watch) -> Result<()> {
        let socket_path = socket_path.as_ref();

        // Replace any stale socket left behind by a previous run.
        match tokio::fs::remove_file(socket_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).context("failed to remove existing socket"),
        }

        let listener = UnixListener::bind(socket_path).context("failed to listen on socket")?;
        let incoming = UnixListenerStream::new(listener);
        info!(socket = %socket_path.display(), policy = %self.policy_name(), "serving CRI proxy");

        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        tokio::pin! {
            let srv = Server::builder()
                .add_service(RuntimeServiceServer::new(self.clone()))
                .add_service(ImageServiceServer::new(self))
                .serve_with_incoming_shutdown(incoming, close_rx.map(|_| {}));
        }

        tokio::select! {
            res = (&mut srv) => res.context("failed to serve grpc server"),
            handle = drain.signaled() => {
                let _ = close_tx.send(());
                handle.release_after(srv).await.context("failed to serve grpc server")
            }
        }
    }

    fn policy_name(&self) -> &str {
        self.policy.as_deref().map(Policy::name).unwrap_or_default()
    }

    fn runtime(&self) -> RuntimeServiceClient<Channel> {
        self.runtime.clone()
    }

    fn image(&self) -> ImageServiceClient<Channel> {
        self.image.clone()
    }

    /// Splits an accepted request into the call context, the caller's
    /// metadata, and the decoded message. The peer identity comes from the
    /// credentials the transport captured at accept time.
    fn accept<T>(&self, request: tonic::Request<T>) -> (CallContext, MetadataMap, T) {
        let peer = request
            .extensions()
            .get::<UdsConnectInfo>()
            .and_then(|info| info.peer_cred)
            .and_then(PeerIdentity::from_ucred);
        let (metadata, _extensions, message) = request.into_parts();
        (CallContext::new(peer), metadata, message)
    }

    async fn admit(
        &self,
        ctx: &CallContext,
        method: &'static str,
        request: core::Request<'_>,
    ) -> Result<Scope, Status> {
        match &self.policy {
            Some(policy) => policy.admit(ctx, method, request).await.map_err(|err| {
                info!(method, error = %err, "call rejected by policy");
                Status::from(err)
            }),
            None => Ok(Scope::Unrestricted),
        }
    }

    fn filter_response(&self, scope: &Scope, response: core::Response<'_>) {
        if let Some(policy) = &self.policy {
            policy.filter_response(scope, response);
        }
    }
}

/// Builds the upstream request, forwarding selected caller metadata.
fn forwarded<T>(metadata: &MetadataMap, message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    if let Some(user_agent) = metadata.get("user-agent") {
        request
            .metadata_mut()
            .insert("x-forwarded-user-agent", user_agent.clone());
    }
    request
}

/// Logs an upstream failure; the status itself is passed through untouched.
fn upstream_error(method: &'static str, status: Status) -> Status {
    warn!(method, code = ?status.code(), "upstream call failed");
    status
}
