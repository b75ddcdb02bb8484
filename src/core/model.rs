//! Editable story state: clips, overlays, the background song, and the
//! snapshot aggregate.
//!
//! These are value types; the invariants between them (output-window length,
//! edit-session discipline) are enforced by [`crate::core::session`], not
//! here.

use cgmath::Matrix3;
use uuid::Uuid;

use crate::core::asset::MediaAsset;
use crate::core::time::{round2, Seconds, TimeRange, MAX_STORY_SECONDS};

/// A 2D point in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 8-bit RGBA color.
pub type Rgba = [u8; 4];

/// Vertical two-stop background gradient for text stories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gradient {
    pub top: Rgba,
    pub bottom: Rgba,
}

/// What a text overlay says and how it is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpec {
    pub text: String,
    pub font_size: f32,
    pub color: Rgba,
}

/// A timed text overlay burned in at export time.
///
/// Identity is the `id`; editing a field means removing the overlay and
/// reinserting a replacement carrying the same `id`.
#[derive(Debug, Clone)]
pub struct TextOverlay {
    pub id: Uuid,
    pub content: TextSpec,
    pub position: Point,
    pub transform: Matrix3<f64>,
    /// `None` means visible for the clip's entire duration.
    pub visible_range: Option<TimeRange>,
}

impl TextOverlay {
    pub fn new(content: TextSpec, position: Point, transform: Matrix3<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            position,
            transform,
            visible_range: None,
        }
    }

    pub fn with_visible_range(mut self, range: TimeRange) -> Self {
        self.visible_range = Some(range);
        self
    }
}

impl PartialEq for TextOverlay {
    /// Two overlays are the same entity when their ids match, regardless of
    /// the other fields.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TextOverlay {}

/// One segment of source video placed on the story timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoClip {
    pub asset: MediaAsset,
    /// `None` until the user explicitly trims.
    pub trim_range: Option<TimeRange>,
    pub source_duration: Seconds,
}

impl VideoClip {
    pub fn new(asset: MediaAsset) -> Self {
        let source_duration = asset.duration();
        Self {
            asset,
            trim_range: None,
            source_duration,
        }
    }

    /// Trimmed length, or the full source capped at the story maximum.
    ///
    /// The cap here is a per-clip safety clamp; the aggregate cap lives on
    /// the snapshot's output window.
    pub fn effective_duration(&self) -> Seconds {
        match self.trim_range {
            Some(range) => range.duration,
            None => self.source_duration.min(MAX_STORY_SECONDS),
        }
    }

    /// The slice of the source this clip plays, whether or not trimmed.
    pub fn source_range(&self) -> TimeRange {
        self.trim_range
            .unwrap_or_else(|| TimeRange::new(0.0, self.effective_duration()))
    }
}

/// The story's single background song.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSong {
    pub asset: MediaAsset,
    pub start_offset: Seconds,
}

impl BackgroundSong {
    pub fn new(asset: MediaAsset, start_offset: Seconds) -> Self {
        Self {
            asset,
            start_offset,
        }
    }

    /// Playable length from the chosen offset; must be positive to take
    /// part in a composition.
    pub fn duration(&self) -> Seconds {
        self.asset.duration() - self.start_offset
    }
}

/// The complete editable story state at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSnapshot {
    pub clips: Vec<VideoClip>,
    pub background_song: Option<BackgroundSong>,
    /// The trimmed range of the concatenated timeline that gets exported.
    pub output_window: TimeRange,
}

impl MediaSnapshot {
    pub fn empty() -> Self {
        Self {
            clips: Vec::new(),
            background_song: None,
            output_window: TimeRange::new(0.0, 0.0),
        }
    }

    /// Sum of the clips' effective durations.
    pub fn total_duration(&self) -> Seconds {
        self.clips.iter().map(|c| c.effective_duration()).sum()
    }

    /// Recompute the output window after a structural mutation.
    ///
    /// The window always covers the front of the concatenation, capped at
    /// the story maximum. Any user-chosen window is reset; trimming happens
    /// after the structure settles.
    pub fn refresh_output_window(&mut self) {
        let length = self.total_duration().min(MAX_STORY_SECONDS);
        self.output_window = TimeRange::new(0.0, length);
    }

    /// Replace the output window with a caller-chosen one, clamped so it
    /// stays inside the concatenated timeline and under the story cap.
    pub fn set_output_window(&mut self, window: TimeRange) {
        let total = self.total_duration();
        let clamped = window.clamped_to(0.0..=total);
        let length = clamped.duration.min(MAX_STORY_SECONDS);
        self.output_window = TimeRange::new(clamped.start, length);
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty() || round2(self.total_duration()) <= 0.0
    }
}

impl Default for MediaSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// How the story is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionMode {
    #[default]
    Recorded,
    Gallery,
    Text,
    Duet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;
    use std::path::PathBuf;

    use crate::core::asset::Size;

    fn clip(seconds: Seconds) -> VideoClip {
        VideoClip::new(MediaAsset::video_file(
            PathBuf::from("clip.mp4"),
            seconds,
            Size::new(1080.0, 1920.0),
            Matrix3::identity(),
            true,
        ))
    }

    #[test]
    fn test_effective_duration_untrimmed() {
        assert_eq!(clip(12.0).effective_duration(), 12.0);
        // Per-clip safety clamp at the story cap.
        assert_eq!(clip(90.0).effective_duration(), 60.0);
    }

    #[test]
    fn test_effective_duration_trimmed() {
        let mut c = clip(12.0);
        c.trim_range = Some(TimeRange::new(2.0, 4.0));
        assert_eq!(c.effective_duration(), 4.0);
        assert_eq!(c.source_range(), TimeRange::new(2.0, 4.0));
    }

    #[test]
    fn test_output_window_invariant() {
        let mut snapshot = MediaSnapshot::empty();
        for seconds in [10.0, 25.0, 40.0] {
            snapshot.clips.push(clip(seconds));
            snapshot.refresh_output_window();
            let expected = snapshot.total_duration().min(MAX_STORY_SECONDS);
            assert_eq!(snapshot.output_window.duration, expected);
        }
        // 75s of content, window capped at 60.
        assert_eq!(snapshot.output_window.duration, 60.0);

        snapshot.clips.remove(2);
        snapshot.refresh_output_window();
        assert_eq!(snapshot.output_window.duration, 35.0);
    }

    #[test]
    fn test_set_output_window_clamps() {
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(clip(30.0));
        snapshot.refresh_output_window();

        snapshot.set_output_window(TimeRange::new(5.0, 60.0));
        assert_eq!(snapshot.output_window, TimeRange::new(5.0, 25.0));

        // Negative start intersects with the timeline bounds.
        snapshot.set_output_window(TimeRange::new(-3.0, 10.0));
        assert_eq!(snapshot.output_window, TimeRange::new(0.0, 7.0));
    }

    #[test]
    fn test_overlay_equality_is_by_id() {
        let spec = TextSpec {
            text: "hi".to_string(),
            font_size: 32.0,
            color: [255, 255, 255, 255],
        };
        let a = TextOverlay::new(spec.clone(), Point::new(0.0, 0.0), Matrix3::identity());
        let mut b = a.clone();
        b.content.text = "edited".to_string();
        b.visible_range = Some(TimeRange::new(1.0, 2.0));

        assert_eq!(a, b);
        let c = TextOverlay::new(spec, Point::new(0.0, 0.0), Matrix3::identity());
        assert_ne!(a, c);
    }

    #[test]
    fn test_song_duration() {
        let song = BackgroundSong::new(
            MediaAsset::audio_file(PathBuf::from("song.m4a"), 30.0),
            12.0,
        );
        assert_eq!(song.duration(), 18.0);
    }
}
