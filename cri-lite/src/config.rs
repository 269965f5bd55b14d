//! YAML configuration for the proxy and its listeners.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Endpoint of the upstream CRI runtime service.
    pub runtime_endpoint: String,

    /// Endpoint of the upstream CRI image service; defaults to the runtime
    /// endpoint.
    #[serde(default)]
    pub image_endpoint: Option<String>,

    /// Default per-call deadline, in seconds. Zero leaves calls without one.
    #[serde(default)]
    pub timeout: u64,

    /// Raises the default log filter to debug.
    #[serde(default)]
    pub debug: bool,

    /// The listeners to serve.
    pub endpoints: Vec<Endpoint>,
}

/// One listener: a socket path and the policy bound to it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Endpoint {
    /// Path of the UNIX socket to serve on.
    pub endpoint: PathBuf,

    /// The policy enforced on every call to this listener.
    pub policy: PolicyKind,

    /// For PodScoped: the sandbox the listener is confined to.
    #[serde(default)]
    pub pod_sandbox_id: Option<String>,

    /// For PodScoped: derive the sandbox from the caller's pid instead.
    #[serde(default)]
    pub pod_sandbox_from_caller_pid: bool,
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
pub enum PolicyKind {
    ReadOnly,
    ImageManagement,
    PodScoped,
}

impl Config {
    /// Reads and parses the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_shape() {
        let config: Config = serde_yaml::from_str(
            r#"
runtime-endpoint: unix:///run/containerd/containerd.sock
image-endpoint: unix:///run/containerd/containerd.sock
timeout: 10
debug: true
endpoints:
  - endpoint: /run/cri-lite/readonly.sock
    policy: ReadOnly
  - endpoint: /run/cri-lite/images.sock
    policy: ImageManagement
  - endpoint: /run/cri-lite/pod.sock
    policy: PodScoped
    pod-sandbox-id: test-sandbox-id
  - endpoint: /run/cri-lite/caller.sock
    policy: PodScoped
    pod-sandbox-from-caller-pid: true
"#,
        )
        .expect("parse");

        assert_eq!(config.timeout, 10);
        assert!(config.debug);
        assert_eq!(config.endpoints.len(), 4);
        assert_eq!(config.endpoints[0].policy, PolicyKind::ReadOnly);
        assert_eq!(config.endpoints[1].policy, PolicyKind::ImageManagement);
        assert_eq!(
            config.endpoints[2].pod_sandbox_id.as_deref(),
            Some("test-sandbox-id")
        );
        assert!(config.endpoints[3].pod_sandbox_from_caller_pid);
    }

    #[test]
    fn optional_fields_default() {
        let config: Config = serde_yaml::from_str(
            r#"
runtime-endpoint: /run/containerd/containerd.sock
endpoints:
  - endpoint: /run/cri-lite/readonly.sock
    policy: ReadOnly
"#,
        )
        .expect("parse");

        assert_eq!(config.image_endpoint, None);
        assert_eq!(config.timeout, 0);
        assert!(!config.debug);
    }

    #[test]
    fn unknown_policies_are_rejected() {
        let err = serde_yaml::from_str::<Config>(
            r#"
runtime-endpoint: /run/containerd/containerd.sock
endpoints:
  - endpoint: /run/cri-lite/full.sock
    policy: FullAccess
"#,
        )
        .expect_err("unknown policy");
        assert!(err.to_string().contains("FullAccess"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        serde_yaml::from_str::<Config>(
            r#"
runtime-endpoint: /run/containerd/containerd.sock
listeners: []
"#,
        )
        .expect_err("unknown key");
    }
}
