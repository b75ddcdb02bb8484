//! Opaque handles to decodable media sources.
//!
//! An asset only describes a source; it never decodes. Identity is by
//! reference: two handles are equal when they point at the same underlying
//! source object, never when their metadata happens to match.

use std::path::PathBuf;
use std::sync::Arc;

use cgmath::{Matrix3, SquareMatrix};

use crate::core::time::Seconds;

/// Pixel dimensions of a video frame or canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Where an asset's samples come from.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetSource {
    /// A decodable container on disk (or a downloaded temp file).
    File(PathBuf),
    /// A synthetic full-canvas blank surface used as the text-story canvas.
    BlankCanvas(Size),
}

#[derive(Debug)]
struct AssetInner {
    source: AssetSource,
    duration: Seconds,
    /// Untransformed frame size; `None` for audio-only sources.
    natural_size: Option<Size>,
    /// Orientation stored by the container for its video track.
    orientation: Matrix3<f64>,
    has_audio: bool,
}

/// Reference-identity handle to a decodable audio/video source.
#[derive(Debug, Clone)]
pub struct MediaAsset(Arc<AssetInner>);

/// How long a synthetic blank canvas runs when seeded as a text-story clip.
pub const BLANK_CANVAS_SECONDS: Seconds = 15.0;

impl MediaAsset {
    /// A video source from collaborator-supplied metadata (capture, gallery
    /// import, or a probed file).
    pub fn video_file(
        path: PathBuf,
        duration: Seconds,
        natural_size: Size,
        orientation: Matrix3<f64>,
        has_audio: bool,
    ) -> Self {
        Self(Arc::new(AssetInner {
            source: AssetSource::File(path),
            duration,
            natural_size: Some(natural_size),
            orientation,
            has_audio,
        }))
    }

    /// An audio-only source, e.g. a downloaded background song described by
    /// its `{id, url, duration}` descriptor.
    pub fn audio_file(path: PathBuf, duration: Seconds) -> Self {
        Self(Arc::new(AssetInner {
            source: AssetSource::File(path),
            duration,
            natural_size: None,
            orientation: Matrix3::identity(),
            has_audio: true,
        }))
    }

    /// The synthetic canvas clip seeded for text-mode stories.
    pub fn blank_canvas(size: Size) -> Self {
        Self(Arc::new(AssetInner {
            source: AssetSource::BlankCanvas(size),
            duration: BLANK_CANVAS_SECONDS,
            natural_size: Some(size),
            orientation: Matrix3::identity(),
            has_audio: false,
        }))
    }

    pub fn source(&self) -> &AssetSource {
        &self.0.source
    }

    pub fn duration(&self) -> Seconds {
        self.0.duration
    }

    pub fn natural_size(&self) -> Option<Size> {
        self.0.natural_size
    }

    pub fn orientation(&self) -> Matrix3<f64> {
        self.0.orientation
    }

    pub fn has_audio(&self) -> bool {
        self.0.has_audio
    }

    pub fn has_video(&self) -> bool {
        self.0.natural_size.is_some()
    }

    /// Stable key for decoder pools and per-asset caches.
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for MediaAsset {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MediaAsset {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_by_reference() {
        let a = MediaAsset::audio_file(PathBuf::from("song.m4a"), 7.0);
        let b = MediaAsset::audio_file(PathBuf::from("song.m4a"), 7.0);

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.key(), a.clone().key());
    }

    #[test]
    fn test_blank_canvas() {
        let canvas = MediaAsset::blank_canvas(Size::new(1080.0, 1920.0));
        assert_eq!(canvas.duration(), BLANK_CANVAS_SECONDS);
        assert!(canvas.has_video());
        assert!(!canvas.has_audio());
    }

    #[test]
    fn test_audio_file_has_no_video() {
        let song = MediaAsset::audio_file(PathBuf::from("song.m4a"), 30.0);
        assert!(!song.has_video());
        assert!(song.has_audio());
        assert_eq!(song.natural_size(), None);
    }
}
