//! gRPC front end.
//!
//! One unary method over the same engine the HTTP front uses. The
//! server-side concurrency cap bounds how many RPC calls are in flight
//! at once; all of them still serialize inside the executor.

use std::future::Future;
use std::net::SocketAddr;

use tonic::{transport::Server, Request, Response, Status};
use tracing::info;

use crate::error::into_status;
use crate::state::AppState;

pub mod proto {
    tonic::include_proto!("video");
}

use proto::video_generator_server::{VideoGenerator, VideoGeneratorServer};
use proto::{VideoMetadata, VideoRequest, VideoResponse};

pub struct VideoGeneratorService {
    state: AppState,
}

impl VideoGeneratorService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl VideoGenerator for VideoGeneratorService {
    async fn generate_video(
        &self,
        request: Request<VideoRequest>,
    ) -> Result<Response<VideoResponse>, Status> {
        let request = request.into_inner();
        info!(
            image_bytes = request.image.len(),
            fps = request.fps,
            frames = request.frames,
            motion = request.motion,
            "rpc generation request"
        );

        let validated =
            kinema_core::validate(request.image.into(), request.fps, request.frames, request.motion)
                .map_err(into_status)?;
        let result = self
            .state
            .executor
            .submit(validated)
            .await
            .map_err(into_status)?;

        Ok(Response::new(VideoResponse {
            video: result.video,
            metadata: Some(VideoMetadata {
                model_version: result.model_version,
                duration: result.duration_secs,
                processing_time: result.processing_secs,
            }),
        }))
    }
}

/// Serve the RPC front until the shutdown future resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    workers: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, workers, "rpc server listening");

    Server::builder()
        .concurrency_limit_per_connection(workers)
        .add_service(VideoGeneratorServer::new(VideoGeneratorService::new(state)))
        .serve_with_shutdown(addr, shutdown)
        .await
}
