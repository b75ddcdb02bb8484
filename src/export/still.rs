//! Still-image clip synthesis.
//!
//! Photo stories and the text-mode canvas start as a single image; the
//! engine turns that image into a short video-only clip file so the rest of
//! the pipeline can treat it like any other source. The call returns once
//! the container is finalized.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use cgmath::SquareMatrix;
use image::imageops;
use image::RgbaImage;
use tracing::info;

use crate::core::asset::{MediaAsset, Size};
use crate::core::time::Seconds;
use crate::export::pipeline::{ContainerWriter, ExportError, RenderSettings};
use crate::media::decoder::VideoFrame;
use crate::media::writer::Mp4Writer;

/// Encode `image` as a video-only clip of the given length at the target
/// path, returning the asset handle for it. The image is fitted to the
/// canvas width and centered on black.
pub fn synthesize_still_clip(
    image: &RgbaImage,
    seconds: Seconds,
    settings: &RenderSettings,
    path: &Path,
) -> Result<MediaAsset, ExportError> {
    let width = settings.canvas.pixel_width();
    let height = settings.canvas.pixel_height();
    let frame = letterbox(image, width, height);

    if let Err(err) = fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            return Err(err.into());
        }
    }

    let mut writer = Mp4Writer::video_only(settings.clone(), path);
    writer.start().map_err(ExportError::WriterStart)?;
    let mut sink = writer.video_input();

    let total_frames = ((seconds * settings.fps).ceil() as usize).max(1);
    let data = frame.into_raw();
    for index in 0..total_frames {
        sink.append(VideoFrame {
            data: data.clone(),
            width,
            height,
            pts: index as f64 / settings.fps,
        })
        .map_err(ExportError::Write)?;
    }
    sink.mark_finished();
    let written = writer.finish().map_err(ExportError::Finalize)?;
    info!(path = %written.display(), frames = total_frames, "still clip synthesized");

    Ok(MediaAsset::video_file(
        written,
        seconds,
        Size::new(width as f64, height as f64),
        cgmath::Matrix3::identity(),
        false,
    ))
}

/// Fit the image to the canvas width and center it vertically on black.
fn letterbox(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
    let (source_width, source_height) = image.dimensions();
    if source_width == 0 || source_height == 0 {
        return canvas;
    }
    let scale = width as f64 / source_width as f64;
    let scaled_height = ((source_height as f64 * scale).round() as u32).max(1);
    let resized = imageops::resize(image, width, scaled_height, imageops::FilterType::Triangle);
    let top = (height as i64 - scaled_height as i64) / 2;
    imageops::overlay(&mut canvas, &resized, 0, top);
    canvas
}
