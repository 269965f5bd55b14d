use crate::resolver::ResolveError;

/// Why a policy refused a call.
///
/// Every variant is terminal for the call; the proxy performs no retries.
/// Client-visible messages name the offending method or field, not internal
/// state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The method is outside the policy's admitted set.
    #[error("method not allowed by policy: {0}")]
    MethodNotAllowed(String),

    /// The request names a sandbox or container outside the policy's scope.
    #[error("method not allowed by policy: {0}")]
    ScopeViolation(String),

    /// Dynamic sandbox resolution was requested but the connection carries no
    /// peer credentials.
    #[error("failed to get peer identity from connection")]
    NoPeerIdentity,

    /// The caller's pid could not be mapped to a sandbox.
    #[error("failed to get pod sandbox ID from PID: {0}")]
    Resolve(#[from] ResolveError),
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::MethodNotAllowed(_) | Error::ScopeViolation(_) => {
                tonic::Status::permission_denied(message)
            }
            Error::NoPeerIdentity => tonic::Status::invalid_argument(message),
            Error::Resolve(_) => tonic::Status::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_carry_the_policy_prefix() {
        let status = tonic::Status::from(Error::MethodNotAllowed(
            "/runtime.v1.RuntimeService/RunPodSandbox".to_string(),
        ));
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(
            status.message(),
            "method not allowed by policy: /runtime.v1.RuntimeService/RunPodSandbox"
        );
    }

    #[test]
    fn resolver_failures_are_internal() {
        let status = tonic::Status::from(Error::Resolve(ResolveError::ContainerIdNotFound(42)));
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(
            status.message(),
            "failed to get pod sandbox ID from PID: failed to find container ID for pid 42"
        );
    }

    #[test]
    fn missing_identity_is_invalid_argument() {
        let status = tonic::Status::from(Error::NoPeerIdentity);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
