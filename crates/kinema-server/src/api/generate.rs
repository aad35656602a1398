//! Video generation endpoint.

use axum::extract::{multipart::Field, Multipart, State};
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_FPS: u32 = 6;
const DEFAULT_FRAMES: u32 = 14;
const DEFAULT_MOTION: f32 = 0.5;

/// Generation response: encoded video plus job metadata.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Base64-encoded video bytes
    pub video: String,
    pub metadata: GenerateMetadata,
}

#[derive(Debug, Serialize)]
pub struct GenerateMetadata {
    pub model: String,
    /// Clip duration in seconds (frames / fps)
    pub duration: f32,
    pub device: String,
}

/// Generate a video clip from a source image.
///
/// Multipart fields: `image` (file, required), `fps`, `frames`,
/// `motion` (optional, with the pipeline defaults). Validation runs
/// here on the transport task; only valid jobs reach the executor.
pub async fn generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let form = parse_generate_request(multipart).await?;
    info!(
        image_bytes = form.image.len(),
        fps = form.fps,
        frames = form.frames,
        motion = form.motion,
        "generation request"
    );

    let request = kinema_core::validate(form.image, form.fps, form.frames, form.motion)?;
    let result = state.executor.submit(request).await?;

    Ok(Json(GenerateResponse {
        video: base64::engine::general_purpose::STANDARD.encode(&result.video),
        metadata: GenerateMetadata {
            model: result.model_version,
            duration: result.duration_secs,
            device: result.device.to_string(),
        },
    }))
}

struct GenerateForm {
    image: Bytes,
    fps: u32,
    frames: u32,
    motion: f32,
}

async fn parse_generate_request(mut multipart: Multipart) -> Result<GenerateForm, ApiError> {
    let mut image: Option<Bytes> = None;
    let mut fps = DEFAULT_FPS;
    let mut frames = DEFAULT_FRAMES;
    let mut motion = DEFAULT_MOTION;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed reading multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("failed reading multipart 'image' field: {e}"))
                })?;
                if bytes.is_empty() {
                    return Err(ApiError::bad_request("multipart 'image' field is empty"));
                }
                image = Some(bytes);
            }
            "fps" => fps = parse_text_field(field, "fps").await?,
            "frames" => frames = parse_text_field(field, "frames").await?,
            "motion" => motion = parse_text_field(field, "motion").await?,
            _ => {}
        }
    }

    let image = image.ok_or_else(|| {
        ApiError::bad_request("missing image in multipart request (expected 'image' file field)")
    })?;

    Ok(GenerateForm {
        image,
        fps,
        frames,
        motion,
    })
}

async fn parse_text_field<T>(field: Field<'_>, name: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text = field.text().await.map_err(|e| {
        ApiError::bad_request(format!("failed reading multipart '{name}' field: {e}"))
    })?;
    let trimmed = text.trim();
    trimmed
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid '{name}' value '{trimmed}': {e}")))
}
