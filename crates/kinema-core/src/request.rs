//! Request validation: raw transport input to a validated generation job.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A validated generation job.
///
/// Only the validator constructs these, so any request reaching the
/// executor already satisfies the parameter invariants.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Raw source image bytes, forwarded to the pipeline as-is
    pub image: Bytes,
    /// Decoded image width in pixels
    pub width: u32,
    /// Decoded image height in pixels
    pub height: u32,
    /// Output frame rate, > 0
    pub fps: u32,
    /// Number of frames to generate, > 0
    pub frames: u32,
    /// Motion conditioning, clamped to [0, 1]
    pub motion: f32,
    /// Motion discretized to the pipeline's [0, 255] control signal
    pub motion_bucket_id: u8,
}

impl InferenceRequest {
    /// Clip duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.frames as f32 / self.fps as f32
    }
}

/// Validate raw transport input into an [`InferenceRequest`].
///
/// Pure and synchronous; called on the transport task so malformed
/// input never occupies the serialized execution slot. The image is
/// decoded once here purely as a validity check, the pipeline receives
/// the original bytes.
pub fn validate(image: Bytes, fps: u32, frames: u32, motion: f32) -> Result<InferenceRequest> {
    let decoded = image::load_from_memory(&image)
        .map_err(|e| Error::InvalidImage(format!("failed to decode image: {e}")))?;

    if fps == 0 {
        return Err(Error::InvalidParameter("fps must be positive".into()));
    }
    if frames == 0 {
        return Err(Error::InvalidParameter("frames must be positive".into()));
    }
    if !motion.is_finite() {
        return Err(Error::InvalidParameter(format!(
            "motion must be a finite number, got {motion}"
        )));
    }

    let motion = motion.clamp(0.0, 1.0);

    Ok(InferenceRequest {
        width: decoded.width(),
        height: decoded.height(),
        image,
        fps,
        frames,
        motion,
        motion_bucket_id: motion_bucket_id(motion),
    })
}

/// Map motion in [0, 1] to the pipeline's bucket id in [0, 255].
///
/// Rounds half away from zero, so 0.5 lands on bucket 128.
fn motion_bucket_id(motion: f32) -> u8 {
    (motion * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    // 1x1 RGBA PNG
    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    fn png_bytes() -> Bytes {
        Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(PNG_1X1)
                .unwrap(),
        )
    }

    #[test]
    fn accepts_valid_input() {
        let request = validate(png_bytes(), 6, 14, 0.5).unwrap();
        assert_eq!(request.width, 1);
        assert_eq!(request.height, 1);
        assert_eq!(request.fps, 6);
        assert_eq!(request.frames, 14);
        assert!((request.duration_secs() - 14.0 / 6.0).abs() < f32::EPSILON);
    }

    #[test]
    fn motion_bucket_endpoints_and_midpoint() {
        assert_eq!(validate(png_bytes(), 6, 14, 0.0).unwrap().motion_bucket_id, 0);
        assert_eq!(
            validate(png_bytes(), 6, 14, 0.5).unwrap().motion_bucket_id,
            128
        );
        assert_eq!(
            validate(png_bytes(), 6, 14, 1.0).unwrap().motion_bucket_id,
            255
        );
    }

    #[test]
    fn motion_is_clamped_into_unit_interval() {
        assert_eq!(validate(png_bytes(), 6, 14, -0.3).unwrap().motion_bucket_id, 0);
        assert_eq!(
            validate(png_bytes(), 6, 14, 1.7).unwrap().motion_bucket_id,
            255
        );
    }

    #[test]
    fn non_finite_motion_is_rejected() {
        assert!(matches!(
            validate(png_bytes(), 6, 14, f32::NAN),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn zero_fps_and_zero_frames_are_rejected() {
        assert!(matches!(
            validate(png_bytes(), 0, 14, 0.5),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            validate(png_bytes(), 6, 0, 0.5),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_rejected_as_invalid_image() {
        let garbage = Bytes::from_static(b"definitely not an image");
        assert!(matches!(
            validate(garbage, 6, 14, 0.5),
            Err(Error::InvalidImage(_))
        ));
    }
}
