use crate::{
    methods, resolver::SandboxResolver, CallContext, Error, Policy, Request, Response, Scope,
};
use cri_lite_api::v1;

/// How the policy's sandbox is established.
#[derive(Clone, Debug)]
enum Mode {
    /// A fixed sandbox id from configuration.
    Static(String),
    /// Derived from the caller's process identity on every call.
    FromCallerPid,
}

/// Restricts every admitted RuntimeService call to a single pod sandbox.
///
/// ImageService calls are denied outright. Requests that identify a sandbox
/// must identify this policy's sandbox; requests that identify a container are
/// verified against the runtime's record of which sandbox owns the container;
/// list requests have their filters tightened to the sandbox and their
/// responses filtered to it.
#[derive(Clone, Debug)]
pub struct PodScoped {
    mode: Mode,
    resolver: SandboxResolver,
}

impl PodScoped {
    /// A policy confined to a fixed sandbox id.
    pub fn new(pod_sandbox_id: impl Into<String>, resolver: SandboxResolver) -> Self {
        Self {
            mode: Mode::Static(pod_sandbox_id.into()),
            resolver,
        }
    }

    /// A policy that derives the sandbox from the caller's pid on every call.
    pub fn from_caller_pid(resolver: SandboxResolver) -> Self {
        Self {
            mode: Mode::FromCallerPid,
            resolver,
        }
    }

    async fn resolve_sandbox(&self, ctx: &CallContext) -> Result<String, Error> {
        match &self.mode {
            Mode::Static(id) => Ok(id.clone()),
            Mode::FromCallerPid => {
                let peer = ctx.peer.as_ref().ok_or(Error::NoPeerIdentity)?;
                tracing::debug!(peer.pid = peer.pid, "resolving sandbox for caller");
                Ok(self.resolver.sandbox_for_pid(peer.pid).await?)
            }
        }
    }

    /// Checks that `container_id` belongs to `sandbox`, per the upstream
    /// runtime.
    async fn verify_container(&self, container_id: &str, sandbox: &str) -> Result<(), Error> {
        let owner = self
            .resolver
            .sandbox_of_container(container_id)
            .await
            .map_err(|err| {
                Error::ScopeViolation(format!(
                    "failed to get pod sandbox ID from container ID: {err}"
                ))
            })?;

        if owner != sandbox {
            return Err(Error::ScopeViolation(format!(
                "container {container_id} does not belong to pod sandbox {sandbox}"
            )));
        }

        Ok(())
    }

    async fn verify_request(&self, request: Request<'_>, sandbox: &str) -> Result<(), Error> {
        match request {
            Request::ListContainers(req) => {
                let filter = req.filter.get_or_insert_with(Default::default);
                if !filter.pod_sandbox_id.is_empty() && filter.pod_sandbox_id != sandbox {
                    return Err(Error::ScopeViolation(
                        "ListContainersRequest.Filter.PodSandboxId does not match".to_string(),
                    ));
                }
                filter.pod_sandbox_id = sandbox.to_string();
            }

            Request::ListContainerStats(req) => {
                let filter = req.filter.get_or_insert_with(Default::default);
                if !filter.pod_sandbox_id.is_empty() && filter.pod_sandbox_id != sandbox {
                    return Err(Error::ScopeViolation(
                        "ListContainerStatsRequest.Filter.PodSandboxId does not match".to_string(),
                    ));
                }
                filter.pod_sandbox_id = sandbox.to_string();
            }

            Request::ListPodSandboxStats(req) => {
                let filter = req.filter.get_or_insert_with(Default::default);
                if !filter.id.is_empty() && filter.id != sandbox {
                    return Err(Error::ScopeViolation(
                        "ListPodSandboxStatsRequest.Filter.Id does not match".to_string(),
                    ));
                }
                filter.id = sandbox.to_string();
            }

            Request::CreateContainer(req) => {
                require_sandbox(&req.pod_sandbox_id, sandbox, "CreateContainerRequest.PodSandboxId")?
            }
            Request::StopPodSandbox(req) => {
                require_sandbox(&req.pod_sandbox_id, sandbox, "StopPodSandboxRequest.PodSandboxId")?
            }
            Request::RemovePodSandbox(req) => require_sandbox(
                &req.pod_sandbox_id,
                sandbox,
                "RemovePodSandboxRequest.PodSandboxId",
            )?,
            Request::PodSandboxStatus(req) => require_sandbox(
                &req.pod_sandbox_id,
                sandbox,
                "PodSandboxStatusRequest.PodSandboxId",
            )?,
            Request::PodSandboxStats(req) => require_sandbox(
                &req.pod_sandbox_id,
                sandbox,
                "PodSandboxStatsRequest.PodSandboxId",
            )?,
            Request::UpdatePodSandboxResources(req) => require_sandbox(
                &req.pod_sandbox_id,
                sandbox,
                "UpdatePodSandboxResourcesRequest.PodSandboxId",
            )?,
            Request::PortForward(req) => {
                require_sandbox(&req.pod_sandbox_id, sandbox, "PortForwardRequest.PodSandboxId")?
            }

            Request::StartContainer(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }
            Request::StopContainer(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }
            Request::RemoveContainer(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }
            Request::ContainerStatus(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }
            Request::ExecSync(req) => self.verify_container(&req.container_id, sandbox).await?,
            Request::Exec(req) => self.verify_container(&req.container_id, sandbox).await?,
            Request::Attach(req) => self.verify_container(&req.container_id, sandbox).await?,
            Request::ContainerStats(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }
            Request::UpdateContainerResources(req) => {
                self.verify_container(&req.container_id, sandbox).await?
            }

            Request::Opaque => {}
        }

        Ok(())
    }
}

fn require_sandbox(id: &str, sandbox: &str, field: &str) -> Result<(), Error> {
    // An empty id never matches: the policy's sandbox is non-empty.
    if id != sandbox {
        return Err(Error::ScopeViolation(format!("{field} does not match")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Policy for PodScoped {
    fn name(&self) -> &'static str {
        "podscoped"
    }

    async fn admit(
        &self,
        ctx: &CallContext,
        method: &str,
        request: Request<'_>,
    ) -> Result<Scope, Error> {
        if method.starts_with(methods::IMAGE_SERVICE)
            || !method.starts_with(methods::RUNTIME_SERVICE)
        {
            return Err(Error::MethodNotAllowed(method.to_string()));
        }

        let sandbox = self.resolve_sandbox(ctx).await?;
        self.verify_request(request, &sandbox).await?;

        Ok(Scope::Sandbox(sandbox))
    }

    fn filter_response(&self, scope: &Scope, response: Response<'_>) {
        let Scope::Sandbox(sandbox) = scope else {
            return;
        };

        match response {
            Response::ListContainers(resp) => {
                // Belt and braces for runtimes that ignore the tightened
                // filter; retained order is preserved.
                resp.containers.retain(|c| c.pod_sandbox_id == *sandbox);
            }
            Response::ListPodSandboxStats(resp) => {
                resp.stats
                    .retain(|s| s.attributes.as_ref().map_or(false, |a| a.id == *sandbox));
            }
            // Container stats carry no sandbox id; containment is guaranteed
            // by the tightened request filter.
            Response::ListContainerStats(_) => {}
            Response::Opaque => {}
        }
    }

    fn admits_event(&self, scope: &Scope, event: &v1::ContainerEventResponse) -> bool {
        match scope {
            Scope::Unrestricted => true,
            // Events that do not establish their sandbox are dropped.
            Scope::Sandbox(sandbox) => event
                .pod_sandbox_status
                .as_ref()
                .map_or(false, |s| s.id == *sandbox),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resolver::ContainerLookup, PeerIdentity};
    use std::sync::Arc;

    const SANDBOX: &str = "test-sandbox-id";
    const OTHER_SANDBOX: &str = "other-sandbox-id";
    const CONTAINER_IN_POD: &str = "c1";
    const CONTAINER_ELSEWHERE: &str = "c2";
    const CALLER_CONTAINER: &str =
        "4a5b362bcf3c8e3dcd3e07e0b1b3ba6e7fefe1a1b1f3062bd4ba1f4b5ae505c6";

    #[derive(Debug, Default)]
    struct Containers(Vec<v1::Container>);

    #[async_trait::async_trait]
    impl ContainerLookup for Containers {
        async fn list_containers(
            &self,
            filter: v1::ContainerFilter,
        ) -> Result<Vec<v1::Container>, tonic::Status> {
            Ok(self
                .0
                .iter()
                .filter(|c| filter.id.is_empty() || c.id == filter.id)
                .filter(|c| {
                    filter.pod_sandbox_id.is_empty() || c.pod_sandbox_id == filter.pod_sandbox_id
                })
                .cloned()
                .collect())
        }
    }

    fn container(id: &str, pod: &str) -> v1::Container {
        v1::Container {
            id: id.to_string(),
            pod_sandbox_id: pod.to_string(),
            ..Default::default()
        }
    }

    fn lookup() -> Arc<Containers> {
        Arc::new(Containers(vec![
            container(CONTAINER_IN_POD, SANDBOX),
            container(CONTAINER_ELSEWHERE, OTHER_SANDBOX),
            container(CALLER_CONTAINER, SANDBOX),
        ]))
    }

    fn policy() -> PodScoped {
        PodScoped::new(SANDBOX, SandboxResolver::new(lookup()))
    }

    async fn admit(policy: &PodScoped, method: &str, request: Request<'_>) -> Result<Scope, Error> {
        policy.admit(&CallContext::default(), method, request).await
    }

    #[tokio::test]
    async fn denies_image_service_methods() {
        for method in [methods::LIST_IMAGES, methods::PULL_IMAGE, methods::REMOVE_IMAGE] {
            let err = admit(&policy(), method, Request::Opaque)
                .await
                .expect_err(method);
            assert!(matches!(err, Error::MethodNotAllowed(_)));
        }
    }

    #[tokio::test]
    async fn denies_methods_outside_both_services() {
        let err = admit(&policy(), "/grpc.health.v1.Health/Check", Request::Opaque)
            .await
            .expect_err("foreign service");
        assert!(matches!(err, Error::MethodNotAllowed(_)));
    }

    #[tokio::test]
    async fn admits_runtime_methods_without_identifiers() {
        let scope = admit(&policy(), methods::VERSION, Request::Opaque)
            .await
            .expect("version");
        assert_eq!(scope, Scope::Sandbox(SANDBOX.to_string()));
    }

    #[tokio::test]
    async fn requires_matching_sandbox_on_sandbox_methods() {
        let ok = v1::PodSandboxStatusRequest {
            pod_sandbox_id: SANDBOX.to_string(),
            ..Default::default()
        };
        admit(&policy(), methods::POD_SANDBOX_STATUS, Request::PodSandboxStatus(&ok))
            .await
            .expect("matching sandbox");

        let bad = v1::PodSandboxStatusRequest {
            pod_sandbox_id: OTHER_SANDBOX.to_string(),
            ..Default::default()
        };
        let err = admit(&policy(), methods::POD_SANDBOX_STATUS, Request::PodSandboxStatus(&bad))
            .await
            .expect_err("foreign sandbox");
        assert_eq!(
            err.to_string(),
            "method not allowed by policy: PodSandboxStatusRequest.PodSandboxId does not match"
        );
    }

    #[tokio::test]
    async fn rejects_empty_sandbox_ids() {
        let req = v1::StopPodSandboxRequest::default();
        let err = admit(&policy(), methods::STOP_POD_SANDBOX, Request::StopPodSandbox(&req))
            .await
            .expect_err("empty never matches");
        assert!(matches!(err, Error::ScopeViolation(_)));
    }

    #[tokio::test]
    async fn port_forward_checks_the_sandbox_id() {
        let bad = v1::PortForwardRequest {
            pod_sandbox_id: OTHER_SANDBOX.to_string(),
            ..Default::default()
        };
        let err = admit(&policy(), methods::PORT_FORWARD, Request::PortForward(&bad))
            .await
            .expect_err("foreign sandbox");
        assert!(err.to_string().starts_with("method not allowed by policy"));
    }

    #[tokio::test]
    async fn verifies_container_membership_through_the_runtime() {
        let ok = v1::StartContainerRequest {
            container_id: CONTAINER_IN_POD.to_string(),
        };
        admit(&policy(), methods::START_CONTAINER, Request::StartContainer(&ok))
            .await
            .expect("container in pod");

        let bad = v1::StopContainerRequest {
            container_id: CONTAINER_ELSEWHERE.to_string(),
            ..Default::default()
        };
        let err = admit(&policy(), methods::STOP_CONTAINER, Request::StopContainer(&bad))
            .await
            .expect_err("container elsewhere");
        assert_eq!(
            err.to_string(),
            format!(
                "method not allowed by policy: container {CONTAINER_ELSEWHERE} does not belong \
                 to pod sandbox {SANDBOX}"
            )
        );
    }

    #[tokio::test]
    async fn unknown_container_is_rejected() {
        let req = v1::ContainerStatusRequest {
            container_id: "no-such-container".to_string(),
            ..Default::default()
        };
        let err = admit(&policy(), methods::CONTAINER_STATUS, Request::ContainerStatus(&req))
            .await
            .expect_err("unknown container");
        assert!(matches!(err, Error::ScopeViolation(_)));
    }

    #[tokio::test]
    async fn absent_list_filter_is_tightened() {
        let mut req = v1::ListContainersRequest::default();
        admit(&policy(), methods::LIST_CONTAINERS, Request::ListContainers(&mut req))
            .await
            .expect("no filter");
        assert_eq!(req.filter.expect("filter set").pod_sandbox_id, SANDBOX);
    }

    #[tokio::test]
    async fn unrelated_list_filter_fields_are_kept() {
        let mut req = v1::ListContainersRequest {
            filter: Some(v1::ContainerFilter {
                id: CONTAINER_IN_POD.to_string(),
                ..Default::default()
            }),
        };
        admit(&policy(), methods::LIST_CONTAINERS, Request::ListContainers(&mut req))
            .await
            .expect("filter on id");
        let filter = req.filter.expect("filter");
        assert_eq!(filter.id, CONTAINER_IN_POD);
        assert_eq!(filter.pod_sandbox_id, SANDBOX);
    }

    #[tokio::test]
    async fn foreign_list_filter_is_rejected_not_rewritten() {
        let mut req = v1::ListContainersRequest {
            filter: Some(v1::ContainerFilter {
                pod_sandbox_id: OTHER_SANDBOX.to_string(),
                ..Default::default()
            }),
        };
        let err = admit(&policy(), methods::LIST_CONTAINERS, Request::ListContainers(&mut req))
            .await
            .expect_err("foreign filter");
        assert_eq!(
            err.to_string(),
            "method not allowed by policy: ListContainersRequest.Filter.PodSandboxId does not match"
        );
    }

    #[tokio::test]
    async fn filter_tightening_is_idempotent() {
        let mut req = v1::ListContainersRequest::default();
        let policy = policy();
        for _ in 0..2 {
            admit(&policy, methods::LIST_CONTAINERS, Request::ListContainers(&mut req))
                .await
                .expect("tighten");
        }
        assert_eq!(req.filter.expect("filter").pod_sandbox_id, SANDBOX);
    }

    #[tokio::test]
    async fn stats_filters_are_tightened_like_container_filters() {
        let mut req = v1::ListContainerStatsRequest::default();
        admit(
            &policy(),
            methods::LIST_CONTAINER_STATS,
            Request::ListContainerStats(&mut req),
        )
        .await
        .expect("stats");
        assert_eq!(req.filter.expect("filter").pod_sandbox_id, SANDBOX);

        let mut req = v1::ListPodSandboxStatsRequest {
            filter: Some(v1::PodSandboxStatsFilter {
                id: OTHER_SANDBOX.to_string(),
                ..Default::default()
            }),
        };
        let err = admit(
            &policy(),
            methods::LIST_POD_SANDBOX_STATS,
            Request::ListPodSandboxStats(&mut req),
        )
        .await
        .expect_err("foreign sandbox stats");
        assert_eq!(
            err.to_string(),
            "method not allowed by policy: ListPodSandboxStatsRequest.Filter.Id does not match"
        );
    }

    #[tokio::test]
    async fn list_containers_responses_are_filtered() {
        let scope = Scope::Sandbox(SANDBOX.to_string());
        let mut resp = v1::ListContainersResponse {
            containers: vec![
                container(CONTAINER_IN_POD, SANDBOX),
                container(CONTAINER_ELSEWHERE, OTHER_SANDBOX),
            ],
        };

        let policy = policy();
        policy.filter_response(&scope, Response::ListContainers(&mut resp));
        assert_eq!(resp.containers.len(), 1);
        assert_eq!(resp.containers[0].id, CONTAINER_IN_POD);

        // Filtering an already-filtered response is a no-op.
        policy.filter_response(&scope, Response::ListContainers(&mut resp));
        assert_eq!(resp.containers.len(), 1);
    }

    #[tokio::test]
    async fn pod_sandbox_stats_responses_are_filtered() {
        let scope = Scope::Sandbox(SANDBOX.to_string());
        let stats = |id: &str| v1::PodSandboxStats {
            attributes: Some(v1::PodSandboxAttributes {
                id: id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut resp = v1::ListPodSandboxStatsResponse {
            stats: vec![stats(SANDBOX), stats(OTHER_SANDBOX)],
        };

        policy().filter_response(&scope, Response::ListPodSandboxStats(&mut resp));
        assert_eq!(resp.stats.len(), 1);
        assert_eq!(resp.stats[0].attributes.as_ref().expect("attributes").id, SANDBOX);
    }

    #[tokio::test]
    async fn events_outside_the_sandbox_are_dropped() {
        let scope = Scope::Sandbox(SANDBOX.to_string());
        let policy = policy();

        let event = |sandbox: Option<&str>| v1::ContainerEventResponse {
            container_id: CONTAINER_IN_POD.to_string(),
            pod_sandbox_status: sandbox.map(|id| v1::PodSandboxStatus {
                id: id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(policy.admits_event(&scope, &event(Some(SANDBOX))));
        assert!(!policy.admits_event(&scope, &event(Some(OTHER_SANDBOX))));
        // An event that cannot establish its sandbox fails closed.
        assert!(!policy.admits_event(&scope, &event(None)));
    }

    #[tokio::test]
    async fn dynamic_mode_requires_peer_credentials() {
        let policy = PodScoped::from_caller_pid(SandboxResolver::new(lookup()));
        let err = policy
            .admit(&CallContext::default(), methods::LIST_CONTAINERS, Request::Opaque)
            .await
            .expect_err("no peer");
        assert!(matches!(err, Error::NoPeerIdentity));
    }

    #[tokio::test]
    async fn dynamic_mode_resolves_the_caller_sandbox() {
        let dir = tempfile::tempdir().expect("tempdir");
        let proc_dir = dir.path().join("4242");
        std::fs::create_dir_all(&proc_dir).expect("proc dir");
        std::fs::write(
            proc_dir.join("cgroup"),
            format!("0::/kubepods/burstable/pod1234/{CALLER_CONTAINER}\n"),
        )
        .expect("cgroup");

        let resolver = SandboxResolver::new(lookup()).with_proc_root(dir.path());
        let policy = PodScoped::from_caller_pid(resolver);
        let ctx = CallContext::new(Some(PeerIdentity {
            pid: 4242,
            uid: 0,
            gid: 0,
        }));

        // Once resolved, verification behaves as though the sandbox were
        // statically configured.
        let ok = v1::ContainerStatusRequest {
            container_id: CONTAINER_IN_POD.to_string(),
            ..Default::default()
        };
        let scope = policy
            .admit(&ctx, methods::CONTAINER_STATUS, Request::ContainerStatus(&ok))
            .await
            .expect("container in caller's pod");
        assert_eq!(scope, Scope::Sandbox(SANDBOX.to_string()));

        let bad = v1::StopContainerRequest {
            container_id: CONTAINER_ELSEWHERE.to_string(),
            ..Default::default()
        };
        policy
            .admit(&ctx, methods::STOP_CONTAINER, Request::StopContainer(&bad))
            .await
            .expect_err("container outside caller's pod");
    }
}
