use crate::frame::{Camera, CameraError, Frame, FrameStream, LOG_TARGET};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Emits seeded RGB noise frames. Useful without a capture device.
#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    seed: u64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        Self {
            width,
            height,
            seed,
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(640, 480, 7)
    }
}

impl Camera for SyntheticCamera {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameStream>, CameraError>> {
        async move {
            if self.width == 0 || self.height == 0 {
                return Err(CameraError::Unavailable(format!(
                    "invalid synthetic resolution {}x{}",
                    self.width, self.height
                )));
            }
            tracing::info!(
                target: LOG_TARGET,
                width = self.width,
                height = self.height,
                "synthetic camera opened"
            );
            Ok(Box::new(SyntheticStream {
                width: self.width,
                height: self.height,
                rng: StdRng::seed_from_u64(self.seed),
                sequence: 0,
                released: false,
            }) as Box<dyn FrameStream>)
        }
        .boxed()
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    rng: StdRng,
    sequence: u64,
    released: bool,
}

impl FrameStream for SyntheticStream {
    fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        self.rng.fill(&mut buf[..]);
        let image = RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| CameraError::Capture("noise buffer size mismatch".to_owned()))?;

        self.sequence += 1;
        Ok(Some(Frame::new(self.sequence, DynamicImage::ImageRgb8(image))))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
