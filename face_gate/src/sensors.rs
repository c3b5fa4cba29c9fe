//! Sensors module.
//!
//! Frame acquisition from a video device. The device is opened once; streaming is started for
//! each gate evaluation and stopped again through a [`CaptureGuard`].
use image::RgbImage;
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::{CaptureError, InitError};

type Error = Box<dyn std::error::Error + Send + Sync>;

/// A single captured image.
pub type Frame = RgbImage;

/// Source of successive frames.
pub trait FrameSource {
    /// Start streaming.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Stop streaming and release the stream buffers.
    fn stop(&mut self);
}

/// Stops the stream of a [`FrameSource`] when dropped.
pub struct CaptureGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> CaptureGuard<'a, S> {
    /// Start streaming on `source`. The stream is stopped when the guard goes out of scope.
    pub fn start(source: &'a mut S) -> Result<Self, CaptureError> {
        source.start()?;
        Ok(Self { source })
    }

    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.source.next_frame()
    }
}

impl<S: FrameSource + ?Sized> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        self.source.stop();
    }
}

/// Video4Linux camera delivering MJPG frames.
pub struct V4lCamera {
    cam: Camera,
    device_name: String,
    format: [u8; 4],
    resolution: (u32, u32),
    frame_rate: (u32, u32),
    streaming: bool,
}

impl V4lCamera {
    /// Open a video device on a Linux machine.
    ///
    /// Resolution and frame rate default to the highest values the device supports for the
    /// given format.
    pub fn open(
        device_name: &str,
        format: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Self, InitError> {
        Self::negotiate(device_name, format, resolution, frame_rate).map_err(|source| {
            InitError::Camera {
                device: device_name.to_owned(),
                source,
            }
        })
    }

    fn negotiate(
        device_name: &str,
        format: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Self, Error> {
        let cam = Camera::new(device_name)?;
        log_supported_formats(&cam, format);
        let format: [u8; 4] = format
            .as_bytes()
            .try_into()
            .map_err(|_| simple_error!("Format must be a FourCC code, got {:?}", format))?;

        log::info!("Using camera {}", device_name);

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, &format))?;

        let frame_rate = frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, &format, resolution))?;

        log::debug!(
            "Camera {} configured for {}x{} at {}/{} s",
            device_name,
            resolution.0,
            resolution.1,
            frame_rate.0,
            frame_rate.1
        );

        Ok(Self {
            cam,
            device_name: device_name.to_owned(),
            format,
            resolution,
            frame_rate,
            streaming: false,
        })
    }
}

impl FrameSource for V4lCamera {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.streaming {
            return Ok(());
        }
        self.cam
            .start(&Config {
                interval: self.frame_rate,
                resolution: self.resolution,
                format: &self.format,
                ..Default::default()
            })
            .map_err(|err| CaptureError::Start(err.to_string()))?;
        self.streaming = true;
        log::debug!("Streaming from {}", self.device_name);

        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let frame = self.cam.capture().map_err(CaptureError::Read)?;
        let image = image::load_from_memory_with_format(&frame[..], image::ImageFormat::Jpeg)
            .map_err(CaptureError::Decode)?;

        Ok(image.to_rgb8())
    }

    fn stop(&mut self) {
        if !self.streaming {
            return;
        }
        if let Err(err) = self.cam.stop() {
            log::warn!("Error stopping stream on {}: {}", self.device_name, err);
        }
        self.streaming = false;
        log::debug!("Released stream of {}", self.device_name);
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract width and height values
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are (numerator, denominator) seconds per frame, the shortest one wins
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(_, denominator)| *denominator > 0)
            .min_by(|a, b| (a.0 as u64 * b.1 as u64).cmp(&(b.0 as u64 * a.1 as u64)))
            .copied(),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
