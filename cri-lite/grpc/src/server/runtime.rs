use std::pin::Pin;

use cri_lite_api::v1::{self, runtime_service_server::RuntimeService};
use cri_lite_core::{self as core, methods};
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::warn;

use super::{forwarded, upstream_error, CriProxy};

#[tonic::async_trait]
impl RuntimeService for CriProxy {
    async fn version(
        &self,
        request: Request<v1::VersionRequest>,
    ) -> Result<Response<v1::VersionResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::VERSION, core::Request::Opaque)
            .await?;
        let mut reply = self
            .runtime()
            .version(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::VERSION, status))?
            .into_inner();

        // Annotate the upstream's identity so clients can tell they are
        // talking to the proxy, and under which policy.
        reply.runtime_version = format!("{} via cri-lite ({})", reply.runtime_version, crate::VERSION);
        reply.runtime_name = format!("{} with policy {}", reply.runtime_name, self.policy_name());

        Ok(Response::new(reply))
    }

    /// RunPodSandbox allows a major escalation of privilege and is refused
    /// before any policy runs, so that a misconfigured or bypassed policy
    /// cannot open it. It must never be proxied to the upstream runtime.
    async fn run_pod_sandbox(
        &self,
        _request: Request<v1::RunPodSandboxRequest>,
    ) -> Result<Response<v1::RunPodSandboxResponse>, Status> {
        warn!("RunPodSandbox call was blocked");
        Err(Status::permission_denied(
            "RunPodSandbox is disabled by cri-lite for security reasons",
        ))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<v1::StopPodSandboxRequest>,
    ) -> Result<Response<v1::StopPodSandboxResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::STOP_POD_SANDBOX,
            core::Request::StopPodSandbox(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .stop_pod_sandbox(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::STOP_POD_SANDBOX, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<v1::RemovePodSandboxRequest>,
    ) -> Result<Response<v1::RemovePodSandboxResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::REMOVE_POD_SANDBOX,
            core::Request::RemovePodSandbox(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .remove_pod_sandbox(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::REMOVE_POD_SANDBOX, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<v1::PodSandboxStatusRequest>,
    ) -> Result<Response<v1::PodSandboxStatusResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::POD_SANDBOX_STATUS,
            core::Request::PodSandboxStatus(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .pod_sandbox_status(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::POD_SANDBOX_STATUS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<v1::ListPodSandboxRequest>,
    ) -> Result<Response<v1::ListPodSandboxResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::LIST_POD_SANDBOX, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .list_pod_sandbox(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_POD_SANDBOX, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn create_container(
        &self,
        request: Request<v1::CreateContainerRequest>,
    ) -> Result<Response<v1::CreateContainerResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::CREATE_CONTAINER,
            core::Request::CreateContainer(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .create_container(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::CREATE_CONTAINER, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn start_container(
        &self,
        request: Request<v1::StartContainerRequest>,
    ) -> Result<Response<v1::StartContainerResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::START_CONTAINER,
            core::Request::StartContainer(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .start_container(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::START_CONTAINER, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn stop_container(
        &self,
        request: Request<v1::StopContainerRequest>,
    ) -> Result<Response<v1::StopContainerResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::STOP_CONTAINER,
            core::Request::StopContainer(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .stop_container(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::STOP_CONTAINER, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn remove_container(
        &self,
        request: Request<v1::RemoveContainerRequest>,
    ) -> Result<Response<v1::RemoveContainerResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::REMOVE_CONTAINER,
            core::Request::RemoveContainer(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .remove_container(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::REMOVE_CONTAINER, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn list_containers(
        &self,
        request: Request<v1::ListContainersRequest>,
    ) -> Result<Response<v1::ListContainersResponse>, Status> {
        let (ctx, metadata, mut message) = self.accept(request);
        let scope = self
            .admit(
                &ctx,
                methods::LIST_CONTAINERS,
                core::Request::ListContainers(&mut message),
            )
            .await?;
        let mut reply = self
            .runtime()
            .list_containers(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_CONTAINERS, status))?
            .into_inner();
        self.filter_response(&scope, core::Response::ListContainers(&mut reply));
        Ok(Response::new(reply))
    }

    async fn container_status(
        &self,
        request: Request<v1::ContainerStatusRequest>,
    ) -> Result<Response<v1::ContainerStatusResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::CONTAINER_STATUS,
            core::Request::ContainerStatus(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .container_status(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::CONTAINER_STATUS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn update_container_resources(
        &self,
        request: Request<v1::UpdateContainerResourcesRequest>,
    ) -> Result<Response<v1::UpdateContainerResourcesResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::UPDATE_CONTAINER_RESOURCES,
            core::Request::UpdateContainerResources(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .update_container_resources(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::UPDATE_CONTAINER_RESOURCES, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn reopen_container_log(
        &self,
        request: Request<v1::ReopenContainerLogRequest>,
    ) -> Result<Response<v1::ReopenContainerLogResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::REOPEN_CONTAINER_LOG, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .reopen_container_log(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::REOPEN_CONTAINER_LOG, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn exec_sync(
        &self,
        request: Request<v1::ExecSyncRequest>,
    ) -> Result<Response<v1::ExecSyncResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::EXEC_SYNC, core::Request::ExecSync(&message))
            .await?;
        let reply = self
            .runtime()
            .exec_sync(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::EXEC_SYNC, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn exec(
        &self,
        request: Request<v1::ExecRequest>,
    ) -> Result<Response<v1::ExecResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::EXEC, core::Request::Exec(&message))
            .await?;
        let reply = self
            .runtime()
            .exec(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::EXEC, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn attach(
        &self,
        request: Request<v1::AttachRequest>,
    ) -> Result<Response<v1::AttachResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::ATTACH, core::Request::Attach(&message))
            .await?;
        let reply = self
            .runtime()
            .attach(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::ATTACH, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn port_forward(
        &self,
        request: Request<v1::PortForwardRequest>,
    ) -> Result<Response<v1::PortForwardResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::PORT_FORWARD,
            core::Request::PortForward(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .port_forward(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::PORT_FORWARD, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn container_stats(
        &self,
        request: Request<v1::ContainerStatsRequest>,
    ) -> Result<Response<v1::ContainerStatsResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::CONTAINER_STATS,
            core::Request::ContainerStats(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .container_stats(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::CONTAINER_STATS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn list_container_stats(
        &self,
        request: Request<v1::ListContainerStatsRequest>,
    ) -> Result<Response<v1::ListContainerStatsResponse>, Status> {
        let (ctx, metadata, mut message) = self.accept(request);
        let scope = self
            .admit(
                &ctx,
                methods::LIST_CONTAINER_STATS,
                core::Request::ListContainerStats(&mut message),
            )
            .await?;
        let mut reply = self
            .runtime()
            .list_container_stats(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_CONTAINER_STATS, status))?
            .into_inner();
        self.filter_response(&scope, core::Response::ListContainerStats(&mut reply));
        Ok(Response::new(reply))
    }

    async fn pod_sandbox_stats(
        &self,
        request: Request<v1::PodSandboxStatsRequest>,
    ) -> Result<Response<v1::PodSandboxStatsResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::POD_SANDBOX_STATS,
            core::Request::PodSandboxStats(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .pod_sandbox_stats(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::POD_SANDBOX_STATS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn list_pod_sandbox_stats(
        &self,
        request: Request<v1::ListPodSandboxStatsRequest>,
    ) -> Result<Response<v1::ListPodSandboxStatsResponse>, Status> {
        let (ctx, metadata, mut message) = self.accept(request);
        let scope = self
            .admit(
                &ctx,
                methods::LIST_POD_SANDBOX_STATS,
                core::Request::ListPodSandboxStats(&mut message),
            )
            .await?;
        let mut reply = self
            .runtime()
            .list_pod_sandbox_stats(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_POD_SANDBOX_STATS, status))?
            .into_inner();
        self.filter_response(&scope, core::Response::ListPodSandboxStats(&mut reply));
        Ok(Response::new(reply))
    }

    async fn update_runtime_config(
        &self,
        request: Request<v1::UpdateRuntimeConfigRequest>,
    ) -> Result<Response<v1::UpdateRuntimeConfigResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::UPDATE_RUNTIME_CONFIG, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .update_runtime_config(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::UPDATE_RUNTIME_CONFIG, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn status(
        &self,
        request: Request<v1::StatusRequest>,
    ) -> Result<Response<v1::StatusResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::STATUS, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .status(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::STATUS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn checkpoint_container(
        &self,
        request: Request<v1::CheckpointContainerRequest>,
    ) -> Result<Response<v1::CheckpointContainerResponse>, Status> {
        let (ctx, _metadata, _message) = self.accept(request);
        self.admit(&ctx, methods::CHECKPOINT_CONTAINER, core::Request::Opaque)
            .await?;
        // Admitted but not proxied; checkpointing is not part of the
        // attenuated surface.
        Err(Status::unimplemented(
            "method CheckpointContainer not implemented",
        ))
    }

    type GetContainerEventsStream =
        Pin<Box<dyn Stream<Item = Result<v1::ContainerEventResponse, Status>> + Send + 'static>>;

    async fn get_container_events(
        &self,
        request: Request<v1::GetEventsRequest>,
    ) -> Result<Response<Self::GetContainerEventsStream>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        let scope = self
            .admit(&ctx, methods::GET_CONTAINER_EVENTS, core::Request::Opaque)
            .await?;
        let mut upstream = self
            .runtime()
            .get_container_events(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::GET_CONTAINER_EVENTS, status))?
            .into_inner();

        // Events are relayed one at a time, filtered by the policy's scope;
        // nothing is buffered, so backpressure follows the caller's stream.
        let policy = self.policy.clone();
        let events = async_stream::try_stream! {
            while let Some(event) = upstream
                .message()
                .await
                .map_err(|status| upstream_error(methods::GET_CONTAINER_EVENTS, status))?
            {
                if policy.as_ref().map_or(true, |p| p.admits_event(&scope, &event)) {
                    yield event;
                }
            }
        };

        Ok(Response::new(Box::pin(events)))
    }

    async fn list_metric_descriptors(
        &self,
        request: Request<v1::ListMetricDescriptorsRequest>,
    ) -> Result<Response<v1::ListMetricDescriptorsResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::LIST_METRIC_DESCRIPTORS, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .list_metric_descriptors(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_METRIC_DESCRIPTORS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn list_pod_sandbox_metrics(
        &self,
        request: Request<v1::ListPodSandboxMetricsRequest>,
    ) -> Result<Response<v1::ListPodSandboxMetricsResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::LIST_POD_SANDBOX_METRICS,
            core::Request::Opaque,
        )
        .await?;
        let reply = self
            .runtime()
            .list_pod_sandbox_metrics(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_POD_SANDBOX_METRICS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn runtime_config(
        &self,
        request: Request<v1::RuntimeConfigRequest>,
    ) -> Result<Response<v1::RuntimeConfigResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::RUNTIME_CONFIG, core::Request::Opaque)
            .await?;
        let reply = self
            .runtime()
            .runtime_config(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::RUNTIME_CONFIG, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn update_pod_sandbox_resources(
        &self,
        request: Request<v1::UpdatePodSandboxResourcesRequest>,
    ) -> Result<Response<v1::UpdatePodSandboxResourcesResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(
            &ctx,
            methods::UPDATE_POD_SANDBOX_RESOURCES,
            core::Request::UpdatePodSandboxResources(&message),
        )
        .await?;
        let reply = self
            .runtime()
            .update_pod_sandbox_resources(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::UPDATE_POD_SANDBOX_RESOURCES, status))?
            .into_inner();
        Ok(Response::new(reply))
    }
}
