//! Frame acquisition: single decoded stills and live camera streams.

mod replay;
mod synthetic;

use futures::future::BoxFuture;
use image::DynamicImage;
use std::path::Path;
use std::time::SystemTime;

pub use replay::ReplayCamera;
pub use synthetic::SyntheticCamera;

const LOG_TARGET: &str = "frame";

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: SystemTime,
    pub image: DynamicImage,
}

impl Frame {
    pub fn new(sequence: u64, image: DynamicImage) -> Self {
        Self {
            sequence,
            captured_at: SystemTime::now(),
            image,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Decodes one uploaded photo.
pub fn load_still(path: impl AsRef<Path>) -> Result<Frame, FrameError> {
    let path = path.as_ref();
    let image = image::open(path)?;
    tracing::debug!(
        target: LOG_TARGET,
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "decoded still image"
    );
    Ok(Frame::new(0, image))
}

/// An open capture stream.
///
/// `latest_frame` hands out the newest frame only; frames the caller did not
/// read in time are dropped rather than queued.
pub trait FrameStream: Send {
    fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    fn release(&mut self);
}

pub trait Camera: Send + Sync {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameStream>, CameraError>>;
}

/// Exclusive owner of an open stream. Releases it exactly once, on
/// [`StreamGuard::release`] or on drop.
pub struct StreamGuard {
    stream: Option<Box<dyn FrameStream>>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn FrameStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.stream.as_mut() {
            Some(stream) => stream.latest_frame(),
            None => Ok(None),
        }
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::info!(target: LOG_TARGET, "camera stream released");
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard")
            .field("released", &self.is_released())
            .finish()
    }
}
