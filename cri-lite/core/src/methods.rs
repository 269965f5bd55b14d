//! Full gRPC method names for the CRI `runtime.v1` services.

pub const RUNTIME_SERVICE: &str = "/runtime.v1.RuntimeService/";
pub const IMAGE_SERVICE: &str = "/runtime.v1.ImageService/";

pub const VERSION: &str = "/runtime.v1.RuntimeService/Version";
pub const RUN_POD_SANDBOX: &str = "/runtime.v1.RuntimeService/RunPodSandbox";
pub const STOP_POD_SANDBOX: &str = "/runtime.v1.RuntimeService/StopPodSandbox";
pub const REMOVE_POD_SANDBOX: &str = "/runtime.v1.RuntimeService/RemovePodSandbox";
pub const POD_SANDBOX_STATUS: &str = "/runtime.v1.RuntimeService/PodSandboxStatus";
pub const LIST_POD_SANDBOX: &str = "/runtime.v1.RuntimeService/ListPodSandbox";
pub const CREATE_CONTAINER: &str = "/runtime.v1.RuntimeService/CreateContainer";
pub const START_CONTAINER: &str = "/runtime.v1.RuntimeService/StartContainer";
pub const STOP_CONTAINER: &str = "/runtime.v1.RuntimeService/StopContainer";
pub const REMOVE_CONTAINER: &str = "/runtime.v1.RuntimeService/RemoveContainer";
pub const LIST_CONTAINERS: &str = "/runtime.v1.RuntimeService/ListContainers";
pub const CONTAINER_STATUS: &str = "/runtime.v1.RuntimeService/ContainerStatus";
pub const UPDATE_CONTAINER_RESOURCES: &str =
    "/runtime.v1.RuntimeService/UpdateContainerResources";
pub const REOPEN_CONTAINER_LOG: &str = "/runtime.v1.RuntimeService/ReopenContainerLog";
pub const EXEC_SYNC: &str = "/runtime.v1.RuntimeService/ExecSync";
pub const EXEC: &str = "/runtime.v1.RuntimeService/Exec";
pub const ATTACH: &str = "/runtime.v1.RuntimeService/Attach";
pub const PORT_FORWARD: &str = "/runtime.v1.RuntimeService/PortForward";
pub const CONTAINER_STATS: &str = "/runtime.v1.RuntimeService/ContainerStats";
pub const LIST_CONTAINER_STATS: &str = "/runtime.v1.RuntimeService/ListContainerStats";
pub const POD_SANDBOX_STATS: &str = "/runtime.v1.RuntimeService/PodSandboxStats";
pub const LIST_POD_SANDBOX_STATS: &str = "/runtime.v1.RuntimeService/ListPodSandboxStats";
pub const UPDATE_RUNTIME_CONFIG: &str = "/runtime.v1.RuntimeService/UpdateRuntimeConfig";
pub const STATUS: &str = "/runtime.v1.RuntimeService/Status";
pub const CHECKPOINT_CONTAINER: &str = "/runtime.v1.RuntimeService/CheckpointContainer";
pub const GET_CONTAINER_EVENTS: &str = "/runtime.v1.RuntimeService/GetContainerEvents";
pub const LIST_METRIC_DESCRIPTORS: &str = "/runtime.v1.RuntimeService/ListMetricDescriptors";
pub const LIST_POD_SANDBOX_METRICS: &str = "/runtime.v1.RuntimeService/ListPodSandboxMetrics";
pub const RUNTIME_CONFIG: &str = "/runtime.v1.RuntimeService/RuntimeConfig";
pub const UPDATE_POD_SANDBOX_RESOURCES: &str =
    "/runtime.v1.RuntimeService/UpdatePodSandboxResources";

pub const LIST_IMAGES: &str = "/runtime.v1.ImageService/ListImages";
pub const IMAGE_STATUS: &str = "/runtime.v1.ImageService/ImageStatus";
pub const PULL_IMAGE: &str = "/runtime.v1.ImageService/PullImage";
pub const REMOVE_IMAGE: &str = "/runtime.v1.ImageService/RemoveImage";
pub const IMAGE_FS_INFO: &str = "/runtime.v1.ImageService/ImageFsInfo";
