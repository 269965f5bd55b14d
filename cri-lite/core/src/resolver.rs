//! Maps caller processes and container ids to the sandbox that owns them.
//!
//! Resolution is deliberately stateless: the sandbox is looked up against the
//! live runtime on every call, so the answer is always consistent with the
//! runtime's own view. A cache would need invalidation on container lifecycle
//! events to stay correct.

use std::{fmt, path::PathBuf, sync::Arc};

use cri_lite_api::v1;
use once_cell::sync::Lazy;
use regex::Regex;

/// Container ids embedded in cgroup paths are 64 hex characters, whatever the
/// cgroup driver puts around them.
static CONTAINER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new("[0-9a-f]{64}").expect("container id pattern"));

/// Lists containers known to the upstream runtime.
///
/// The transport layer implements this over the shared runtime client; tests
/// implement it in memory.
#[async_trait::async_trait]
pub trait ContainerLookup: fmt::Debug + Send + Sync {
    async fn list_containers(
        &self,
        filter: v1::ContainerFilter,
    ) -> Result<Vec<v1::Container>, tonic::Status>;
}

/// Why a sandbox could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to read cgroup file: {0}")]
    ReadCgroup(#[source] std::io::Error),

    #[error("failed to find container ID for pid {0}")]
    ContainerIdNotFound(i32),

    #[error("failed to list containers: {0}")]
    Upstream(#[source] tonic::Status),

    #[error("unexpected number of containers: expected 1, got {0}")]
    ContainerCount(usize),
}

/// Resolves the sandbox a caller belongs to from node-private state.
#[derive(Clone, Debug)]
pub struct SandboxResolver {
    containers: Arc<dyn ContainerLookup>,
    proc_root: PathBuf,
}

impl SandboxResolver {
    pub fn new(containers: Arc<dyn ContainerLookup>) -> Self {
        Self {
            containers,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Overrides the procfs root. Tests use this to supply canned cgroup
    /// membership files.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Resolves the sandbox the process `pid` belongs to: scan its cgroup
    /// membership for a container id, then ask the runtime which sandbox that
    /// container is part of.
    pub async fn sandbox_for_pid(&self, pid: i32) -> Result<String, ResolveError> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        let cgroups = tokio::fs::read_to_string(&path)
            .await
            .map_err(ResolveError::ReadCgroup)?;

        // Lines are scanned in file order; the first container id wins.
        let container_id = cgroups
            .lines()
            .find_map(|line| CONTAINER_ID.find(line))
            .map(|m| m.as_str())
            .ok_or(ResolveError::ContainerIdNotFound(pid))?;
        tracing::debug!(pid, container.id = %container_id, "found container id in cgroup");

        self.sandbox_of_container(container_id).await
    }

    /// Returns the sandbox that owns `container_id`, per the upstream runtime.
    pub async fn sandbox_of_container(&self, container_id: &str) -> Result<String, ResolveError> {
        let filter = v1::ContainerFilter {
            id: container_id.to_string(),
            ..Default::default()
        };
        let containers = self
            .containers
            .list_containers(filter)
            .await
            .map_err(ResolveError::Upstream)?;

        match &*containers {
            [container] => Ok(container.pod_sandbox_id.clone()),
            rest => Err(ResolveError::ContainerCount(rest.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = "4a5b362bcf3c8e3dcd3e07e0b1b3ba6e7fefe1a1b1f3062bd4ba1f4b5ae505c6";
    const OTHER: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

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

    fn resolver_with(containers: Vec<v1::Container>, proc_root: &std::path::Path) -> SandboxResolver {
        SandboxResolver::new(Arc::new(Containers(containers))).with_proc_root(proc_root)
    }

    fn write_cgroup(dir: &std::path::Path, pid: i32, contents: &str) {
        let proc_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&proc_dir).expect("create proc dir");
        std::fs::write(proc_dir.join("cgroup"), contents).expect("write cgroup");
    }

    #[tokio::test]
    async fn resolves_from_cgroup_v1_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cgroup(
            dir.path(),
            101,
            &format!(
                "12:memory:/kubepods/burstable/pod1234/{CONTAINER}\n\
                 11:cpu,cpuacct:/kubepods/burstable/pod1234/{CONTAINER}\n"
            ),
        );

        let resolver = resolver_with(vec![container(CONTAINER, "sandbox-a")], dir.path());
        let sandbox = resolver.sandbox_for_pid(101).await.expect("resolve");
        assert_eq!(sandbox, "sandbox-a");
    }

    #[tokio::test]
    async fn resolves_from_cgroup_v2_scope_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cgroup(
            dir.path(),
            102,
            &format!("0::/system.slice/docker-{CONTAINER}.scope\n"),
        );

        let resolver = resolver_with(vec![container(CONTAINER, "sandbox-b")], dir.path());
        let sandbox = resolver.sandbox_for_pid(102).await.expect("resolve");
        assert_eq!(sandbox, "sandbox-b");
    }

    #[tokio::test]
    async fn first_container_id_in_file_order_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cgroup(
            dir.path(),
            103,
            &format!(
                "2:memory:/kubepods/pod1/{CONTAINER}\n\
                 1:cpu:/kubepods/pod2/{OTHER}\n"
            ),
        );

        let resolver = resolver_with(
            vec![container(CONTAINER, "sandbox-a"), container(OTHER, "sandbox-b")],
            dir.path(),
        );
        let sandbox = resolver.sandbox_for_pid(103).await.expect("resolve");
        assert_eq!(sandbox, "sandbox-a");
    }

    #[tokio::test]
    async fn missing_cgroup_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with(vec![], dir.path());
        let err = resolver.sandbox_for_pid(104).await.expect_err("no file");
        assert!(matches!(err, ResolveError::ReadCgroup(_)));
    }

    #[tokio::test]
    async fn no_container_id_in_cgroups_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cgroup(dir.path(), 105, "0::/user.slice/user-1000.slice/session-2.scope\n");

        let resolver = resolver_with(vec![], dir.path());
        let err = resolver.sandbox_for_pid(105).await.expect_err("no id");
        assert!(matches!(err, ResolveError::ContainerIdNotFound(105)));
        assert_eq!(err.to_string(), "failed to find container ID for pid 105");
    }

    #[tokio::test]
    async fn unknown_container_id_fails_with_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cgroup(dir.path(), 106, &format!("0::/docker-{CONTAINER}.scope\n"));

        let resolver = resolver_with(vec![], dir.path());
        let err = resolver.sandbox_for_pid(106).await.expect_err("no match");
        assert!(matches!(err, ResolveError::ContainerCount(0)));
    }

    #[tokio::test]
    async fn empty_container_id_never_matches_one_container() {
        let resolver = SandboxResolver::new(Arc::new(Containers(vec![
            container(CONTAINER, "sandbox-a"),
            container(OTHER, "sandbox-b"),
        ])));
        let err = resolver
            .sandbox_of_container("")
            .await
            .expect_err("empty id matches everything");
        assert!(matches!(err, ResolveError::ContainerCount(2)));
    }
}
