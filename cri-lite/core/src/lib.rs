//! Access policies for the Kubernetes Container Runtime Interface.
//!
//! A [`Policy`] decides, per call, whether a CRI method may reach the upstream
//! runtime, optionally rewriting the request before it is forwarded and
//! filtering the response before it is returned. Three policies are provided:
//! [`ReadOnly`], [`ImageManagement`], and [`PodScoped`].

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod identity;
pub mod methods;
pub mod resolver;

mod image;
mod pod_scoped;
mod readonly;

pub use self::{
    error::Error,
    identity::PeerIdentity,
    image::ImageManagement,
    pod_scoped::PodScoped,
    readonly::ReadOnly,
    resolver::{ContainerLookup, SandboxResolver},
};

use cri_lite_api::v1;

/// Per-call information derived from the accepted connection.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    /// Kernel-reported identity of the peer process, when the connection
    /// carries one. Captured once at accept time.
    pub peer: Option<PeerIdentity>,
}

impl CallContext {
    pub fn new(peer: Option<PeerIdentity>) -> Self {
        Self { peer }
    }
}

/// The containment scope established when a call is admitted.
///
/// Response filtering consumes the scope, so that list responses and event
/// streams only ever name objects the caller is allowed to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// The admitted call is not confined to a sandbox.
    Unrestricted,
    /// Every object named by the response must belong to this sandbox.
    Sandbox(String),
}

/// A borrowed view of a decoded request, covering the shapes a policy may
/// inspect or rewrite before the call is forwarded.
#[derive(Debug)]
pub enum Request<'a> {
    ListContainers(&'a mut v1::ListContainersRequest),
    ListContainerStats(&'a mut v1::ListContainerStatsRequest),
    ListPodSandboxStats(&'a mut v1::ListPodSandboxStatsRequest),
    CreateContainer(&'a v1::CreateContainerRequest),
    StartContainer(&'a v1::StartContainerRequest),
    StopContainer(&'a v1::StopContainerRequest),
    RemoveContainer(&'a v1::RemoveContainerRequest),
    StopPodSandbox(&'a v1::StopPodSandboxRequest),
    RemovePodSandbox(&'a v1::RemovePodSandboxRequest),
    PodSandboxStatus(&'a v1::PodSandboxStatusRequest),
    ContainerStatus(&'a v1::ContainerStatusRequest),
    ExecSync(&'a v1::ExecSyncRequest),
    Exec(&'a v1::ExecRequest),
    Attach(&'a v1::AttachRequest),
    PortForward(&'a v1::PortForwardRequest),
    ContainerStats(&'a v1::ContainerStatsRequest),
    UpdateContainerResources(&'a v1::UpdateContainerResourcesRequest),
    PodSandboxStats(&'a v1::PodSandboxStatsRequest),
    UpdatePodSandboxResources(&'a v1::UpdatePodSandboxResourcesRequest),
    /// Requests that carry no sandbox or container identity.
    Opaque,
}

/// A borrowed view of a decoded response, covering the shapes a policy may
/// filter before it is returned to the caller.
#[derive(Debug)]
pub enum Response<'a> {
    ListContainers(&'a mut v1::ListContainersResponse),
    ListContainerStats(&'a mut v1::ListContainerStatsResponse),
    ListPodSandboxStats(&'a mut v1::ListPodSandboxStatsResponse),
    Opaque,
}

/// A CRI access policy.
///
/// One policy value serves every in-flight call on its listener, so
/// implementations must be safe for concurrent use and must keep per-call
/// state on the call itself.
#[async_trait::async_trait]
pub trait Policy: std::fmt::Debug + Send + Sync {
    /// A stable, human-readable name, surfaced in annotated `Version`
    /// responses.
    fn name(&self) -> &'static str;

    /// Admits or rejects a call before it is forwarded, possibly mutating the
    /// request in place. `method` is the full gRPC method name.
    async fn admit(
        &self,
        ctx: &CallContext,
        method: &str,
        request: Request<'_>,
    ) -> Result<Scope, Error>;

    /// Filters an admitted call's response in place before it is returned.
    fn filter_response(&self, scope: &Scope, response: Response<'_>) {
        let _ = (scope, response);
    }

    /// Whether a container event from an admitted stream may be relayed.
    fn admits_event(&self, scope: &Scope, event: &v1::ContainerEventResponse) -> bool {
        let _ = (scope, event);
        true
    }
}
