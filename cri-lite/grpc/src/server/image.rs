use cri_lite_api::v1::{self, image_service_server::ImageService};
use cri_lite_core::{self as core, methods};
use tonic::{Request, Response, Status};

use super::{forwarded, upstream_error, CriProxy};

#[tonic::async_trait]
impl ImageService for CriProxy {
    async fn list_images(
        &self,
        request: Request<v1::ListImagesRequest>,
    ) -> Result<Response<v1::ListImagesResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::LIST_IMAGES, core::Request::Opaque)
            .await?;
        let reply = self
            .image()
            .list_images(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::LIST_IMAGES, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn image_status(
        &self,
        request: Request<v1::ImageStatusRequest>,
    ) -> Result<Response<v1::ImageStatusResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::IMAGE_STATUS, core::Request::Opaque)
            .await?;
        let reply = self
            .image()
            .image_status(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::IMAGE_STATUS, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn pull_image(
        &self,
        request: Request<v1::PullImageRequest>,
    ) -> Result<Response<v1::PullImageResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::PULL_IMAGE, core::Request::Opaque)
            .await?;
        let reply = self
            .image()
            .pull_image(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::PULL_IMAGE, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn remove_image(
        &self,
        request: Request<v1::RemoveImageRequest>,
    ) -> Result<Response<v1::RemoveImageResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::REMOVE_IMAGE, core::Request::Opaque)
            .await?;
        let reply = self
            .image()
            .remove_image(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::REMOVE_IMAGE, status))?
            .into_inner();
        Ok(Response::new(reply))
    }

    async fn image_fs_info(
        &self,
        request: Request<v1::ImageFsInfoRequest>,
    ) -> Result<Response<v1::ImageFsInfoResponse>, Status> {
        let (ctx, metadata, message) = self.accept(request);
        self.admit(&ctx, methods::IMAGE_FS_INFO, core::Request::Opaque)
            .await?;
        let reply = self
            .image()
            .image_fs_info(forwarded(&metadata, message))
            .await
            .map_err(|status| upstream_error(methods::IMAGE_FS_INFO, status))?
            .into_inner();
        Ok(Response::new(reply))
    }
}
