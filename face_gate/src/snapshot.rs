//! Snapshots of classified frames, for checking what the gate saw.
//!
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{nn::resize_area, Prediction};

const GRANTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const DENIED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BORDER_WIDTH: u32 = 3;

/// Writes the model-sized frame as JPEG, framed green if granted and red otherwise.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    size: u32,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, size: u32) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, size })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(
        &self,
        frame: &RgbImage,
        prediction: &Prediction,
        granted: bool,
    ) -> Result<PathBuf, image::ImageError> {
        let mut image = resize_area(frame, self.size, self.size);
        let color = if granted { GRANTED_COLOR } else { DENIED_COLOR };
        draw_border(&mut image, color);

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = self.dir.join(format!(
            "{millis}-{}-{:.0}.jpg",
            sanitize(&prediction.label),
            prediction.confidence * 100.0
        ));
        image.save_with_format(&path, image::ImageFormat::Jpeg)?;
        log::debug!("Saved snapshot {}", path.display());

        Ok(path)
    }
}

fn draw_border(image: &mut RgbImage, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for inset in 0..BORDER_WIDTH.min(width / 2).min(height / 2) {
        let rect = Rect::at(inset as i32, inset as i32).of_size(width - 2 * inset, height - 2 * inset);
        draw_hollow_rect_mut(image, rect, color);
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
