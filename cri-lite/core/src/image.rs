use crate::{methods, CallContext, Error, Policy, Request, Scope};

/// Admits every ImageService call, plus `Version` so that standard CRI
/// clients can complete their handshake. Requests are forwarded unmodified.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageManagement(());

impl ImageManagement {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait::async_trait]
impl Policy for ImageManagement {
    fn name(&self) -> &'static str {
        "imageManagement"
    }

    async fn admit(
        &self,
        _ctx: &CallContext,
        method: &str,
        _request: Request<'_>,
    ) -> Result<Scope, Error> {
        if method == methods::VERSION {
            return Ok(Scope::Unrestricted);
        }

        if !method.starts_with(methods::IMAGE_SERVICE) {
            return Err(Error::MethodNotAllowed(method.to_string()));
        }

        Ok(Scope::Unrestricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn admit(method: &str) -> Result<Scope, Error> {
        ImageManagement::new()
            .admit(&CallContext::default(), method, Request::Opaque)
            .await
    }

    #[tokio::test]
    async fn admits_all_image_service_methods() {
        for method in [
            methods::LIST_IMAGES,
            methods::IMAGE_STATUS,
            methods::PULL_IMAGE,
            methods::REMOVE_IMAGE,
            methods::IMAGE_FS_INFO,
        ] {
            admit(method).await.expect(method);
        }
    }

    #[tokio::test]
    async fn admits_version_for_handshake() {
        admit(methods::VERSION).await.expect("version");
    }

    #[tokio::test]
    async fn rejects_runtime_methods() {
        for method in [
            methods::LIST_CONTAINERS,
            methods::CREATE_CONTAINER,
            methods::RUN_POD_SANDBOX,
            methods::STATUS,
        ] {
            let err = admit(method).await.expect_err(method);
            assert!(matches!(err, Error::MethodNotAllowed(_)));
        }
    }
}
