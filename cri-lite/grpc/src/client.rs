//! Upstream CRI client plumbing.

use std::time::Duration;

use cri_lite_api::v1::{self, runtime_service_client::RuntimeServiceClient};
use cri_lite_core::ContainerLookup;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Builds a lazily-connected channel to a CRI endpoint.
///
/// CRI endpoints are UNIX sockets in practice: `unix://` URIs and bare socket
/// paths dial the socket directly; anything else is dialed as an ordinary URI.
/// A zero timeout leaves calls without a default deadline.
pub fn channel(endpoint: &str, timeout: Duration) -> Result<Channel, tonic::transport::Error> {
    let socket_path = endpoint
        .strip_prefix("unix://")
        .map(str::to_owned)
        .or_else(|| (!endpoint.contains("://")).then(|| endpoint.to_owned()));

    // The builder URI is a placeholder when a connector dials the socket.
    let mut builder = match &socket_path {
        Some(_) => Endpoint::from_static("http://[::]:50051"),
        None => Endpoint::try_from(endpoint.to_owned())?,
    }
    .user_agent(format!("cri-lite/{}", crate::VERSION))?;

    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }

    let channel = match socket_path {
        Some(path) => builder.connect_with_connector_lazy(service_fn(move |_: Uri| {
            UnixStream::connect(path.clone())
        })),
        None => builder.connect_lazy(),
    };

    Ok(channel)
}

/// Container lookups over the shared runtime channel, used by the PodScoped
/// policy for sandbox resolution and container verification.
#[derive(Clone, Debug)]
pub struct RuntimeLookup {
    client: RuntimeServiceClient<Channel>,
}

impl RuntimeLookup {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: RuntimeServiceClient::new(channel),
        }
    }
}

#[async_trait::async_trait]
impl ContainerLookup for RuntimeLookup {
    async fn list_containers(
        &self,
        filter: v1::ContainerFilter,
    ) -> Result<Vec<v1::Container>, tonic::Status> {
        let request = v1::ListContainersRequest {
            filter: Some(filter),
        };
        let response = self.client.clone().list_containers(request).await?;
        Ok(response.into_inner().containers)
    }
}
