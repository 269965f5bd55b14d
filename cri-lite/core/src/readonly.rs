use crate::{methods, CallContext, Error, Policy, Request, Scope};

/// Read-only methods, across both CRI services.
const ALLOWED_METHODS: &[&str] = &[
    methods::VERSION,
    methods::STATUS,
    methods::LIST_CONTAINERS,
    methods::CONTAINER_STATUS,
    methods::LIST_POD_SANDBOX,
    methods::POD_SANDBOX_STATUS,
    methods::CONTAINER_STATS,
    methods::LIST_CONTAINER_STATS,
    methods::POD_SANDBOX_STATS,
    methods::LIST_POD_SANDBOX_STATS,
    methods::LIST_IMAGES,
    methods::IMAGE_STATUS,
    methods::IMAGE_FS_INFO,
];

/// Admits only read-only CRI calls; requests are forwarded unmodified.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOnly(());

impl ReadOnly {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait::async_trait]
impl Policy for ReadOnly {
    fn name(&self) -> &'static str {
        "readonly"
    }

    async fn admit(
        &self,
        _ctx: &CallContext,
        method: &str,
        _request: Request<'_>,
    ) -> Result<Scope, Error> {
        if !ALLOWED_METHODS.contains(&method) {
            return Err(Error::MethodNotAllowed(method.to_string()));
        }

        Ok(Scope::Unrestricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn admit(method: &str) -> Result<Scope, Error> {
        ReadOnly::new()
            .admit(&CallContext::default(), method, Request::Opaque)
            .await
    }

    #[tokio::test]
    async fn admits_every_read_method() {
        for method in ALLOWED_METHODS {
            let scope = admit(method).await.expect(method);
            assert_eq!(scope, Scope::Unrestricted);
        }
    }

    #[tokio::test]
    async fn rejects_writes_naming_the_method() {
        for method in [
            methods::RUN_POD_SANDBOX,
            methods::CREATE_CONTAINER,
            methods::STOP_CONTAINER,
            methods::REMOVE_POD_SANDBOX,
            methods::EXEC,
            methods::PULL_IMAGE,
            methods::REMOVE_IMAGE,
            methods::UPDATE_RUNTIME_CONFIG,
            methods::GET_CONTAINER_EVENTS,
        ] {
            let err = admit(method).await.expect_err(method);
            assert!(matches!(err, Error::MethodNotAllowed(_)));
            assert_eq!(err.to_string(), format!("method not allowed by policy: {method}"));
        }
    }
}
