use crate::frame::{Camera, CameraError, Frame, FrameStream, LOG_TARGET};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::ImageFormat;
use std::path::{Path, PathBuf};

/// Plays the images of a directory back as a looping live feed.
#[derive(Clone, Debug)]
pub struct ReplayCamera {
    dir: PathBuf,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn collect_images(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Unavailable(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        Ok(paths)
    }
}

impl Camera for ReplayCamera {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameStream>, CameraError>> {
        async move {
            let paths = Self::collect_images(&self.dir)?;
            tracing::info!(
                target: LOG_TARGET,
                dir = %self.dir.display(),
                frames = paths.len(),
                "replay camera opened"
            );
            Ok(Box::new(ReplayStream {
                paths,
                cursor: 0,
                sequence: 0,
                released: false,
            }) as Box<dyn FrameStream>)
        }
        .boxed()
    }
}

struct ReplayStream {
    paths: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
    released: bool,
}

impl FrameStream for ReplayStream {
    fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released {
            return Ok(None);
        }
        let path = &self.paths[self.cursor];
        self.cursor = (self.cursor + 1) % self.paths.len();

        let image = image::open(path)
            .map_err(|e| CameraError::Capture(format!("{}: {e}", path.display())))?;
        self.sequence += 1;
        Ok(Some(Frame::new(self.sequence, image)))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
