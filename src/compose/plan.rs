//! Composition descriptors: multi-track timelines, layer instructions, and
//! audio mix envelopes.
//!
//! These types describe what the renderer should do without decoding
//! anything. Tracks own time-range insertions at explicit positions; layer
//! instructions carry the per-track transform/crop and keyframed opacity the
//! compositor samples at render time.

use cgmath::Matrix3;
use image::RgbaImage;

use crate::compose::transform::{CanvasSize, CropRect};
use crate::core::asset::MediaAsset;
use crate::core::model::{Gradient, Point};
use crate::core::time::{Seconds, TimeRange};

/// Identifier of a track within one composition.
pub type TrackId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Error type for descriptor construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComposeError {
    #[error("insertion of {duration}s at {at}s has no length")]
    EmptyInsertion { at: Seconds, duration: Seconds },
    #[error("source range {start}s..{end}s escapes the asset ({asset_duration}s)")]
    SourceOutOfBounds {
        start: Seconds,
        end: Seconds,
        asset_duration: Seconds,
    },
    #[error("unknown track {0}")]
    UnknownTrack(TrackId),
    #[error("font could not be parsed: {0}")]
    BadFont(String),
}

/// One time-range insertion: `source` from the track's asset, placed so it
/// starts at `at` on the composition timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub source: TimeRange,
    pub at: Seconds,
}

impl Segment {
    pub fn end(&self) -> Seconds {
        self.at + self.source.duration
    }

    pub fn covers(&self, at: Seconds) -> bool {
        at >= self.at && at < self.end()
    }

    /// Map a composition time inside this segment to its source time.
    pub fn source_time(&self, at: Seconds) -> Seconds {
        self.source.start + (at - self.at)
    }
}

/// A single video or audio track holding ordered insertions from one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub asset: MediaAsset,
    pub segments: Vec<Segment>,
}

impl CompositionTrack {
    pub fn segment_at(&self, at: Seconds) -> Option<&Segment> {
        self.segments.iter().find(|s| s.covers(at))
    }
}

/// An editable multi-track timeline built from time-range insertions.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub tracks: Vec<CompositionTrack>,
    pub duration: Seconds,
    next_id: TrackId,
}

impl Composition {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            duration: 0.0,
            next_id: 0,
        }
    }

    pub fn add_track(&mut self, kind: TrackKind, asset: MediaAsset) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.push(CompositionTrack {
            id,
            kind,
            asset,
            segments: Vec::new(),
        });
        id
    }

    /// Insert a source range at a timeline position, growing the
    /// composition's duration as needed.
    pub fn insert(
        &mut self,
        track: TrackId,
        source: TimeRange,
        at: Seconds,
    ) -> Result<(), ComposeError> {
        if source.is_empty() || at < 0.0 {
            return Err(ComposeError::EmptyInsertion {
                at,
                duration: source.duration,
            });
        }
        let entry = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track)
            .ok_or(ComposeError::UnknownTrack(track))?;
        let asset_duration = entry.asset.duration();
        // Half a frame of slack; trims land on frame boundaries of sources
        // whose metadata duration was rounded.
        if source.start < 0.0 || source.end() > asset_duration + 1.0 / 60.0 {
            return Err(ComposeError::SourceOutOfBounds {
                start: source.start,
                end: source.end(),
                asset_duration,
            });
        }
        entry.segments.push(Segment { source, at });
        self.duration = self.duration.max(at + source.duration);
        Ok(())
    }

    /// Drop a track entirely. Used when an insertion fails and the track
    /// should be omitted rather than left dangling.
    pub fn remove_track(&mut self, track: TrackId) {
        self.tracks.retain(|t| t.id != track);
    }

    pub fn track(&self, track: TrackId) -> Option<&CompositionTrack> {
        self.tracks.iter().find(|t| t.id == track)
    }
}

impl Default for Composition {
    fn default() -> Self {
        Self::new()
    }
}

/// Opacity set to `value` at time `at`, holding until the next keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityKeyframe {
    pub at: Seconds,
    pub value: f32,
}

/// Time-scoped transform/crop/opacity description for one video track.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInstruction {
    pub track: TrackId,
    pub transform: Matrix3<f64>,
    pub crop: Option<CropRect>,
    /// Step keyframes; empty means fully visible for the whole timeline.
    pub opacity: Vec<OpacityKeyframe>,
}

impl LayerInstruction {
    /// Sample the step-keyframed opacity. Before the first keyframe a layer
    /// is hidden; with no keyframes it is always shown.
    pub fn opacity_at(&self, at: Seconds) -> f32 {
        if self.opacity.is_empty() {
            return 1.0;
        }
        self.opacity
            .iter()
            .filter(|k| k.at <= at)
            .last()
            .map(|k| k.value)
            .unwrap_or(0.0)
    }
}

/// The single timeline-spanning video instruction: every layer stays alive
/// for the whole timeline and concatenation happens purely through opacity.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInstruction {
    pub time_range: TimeRange,
    /// First layer is topmost.
    pub layers: Vec<LayerInstruction>,
}

/// Per-track volume envelope entry of the audio mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMixInput {
    pub track: TrackId,
    pub volume: f32,
}

/// Visibility animation of an overlay still: four step-in/step-out keyframes
/// inset 1% from the range bounds so the cut is unambiguous on a continuous
/// animation clock.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityRamp {
    pub begin: Seconds,
    /// Keyframe times local to `begin`.
    pub times: [Seconds; 4],
    pub values: [f32; 4],
}

/// Fraction of the visible range reserved for the hidden->shown ramp.
const RAMP_INSET: f64 = 0.01;

impl VisibilityRamp {
    pub fn for_range(range: TimeRange) -> Self {
        let len = range.duration;
        Self {
            begin: range.start,
            times: [0.0, RAMP_INSET * len, len - RAMP_INSET * len, len],
            values: [0.0, 1.0, 1.0, 0.0],
        }
    }

    /// Sample the ramp at a composition time; hidden outside the range.
    pub fn value_at(&self, at: Seconds) -> f32 {
        let local = at - self.begin;
        if local < self.times[0] || local > self.times[3] {
            return 0.0;
        }
        for window in [(0, 1), (1, 2), (2, 3)] {
            let (a, b) = window;
            if local <= self.times[b] {
                let span = self.times[b] - self.times[a];
                if span <= 0.0 {
                    return self.values[b];
                }
                let t = ((local - self.times[a]) / span) as f32;
                return self.values[a] + (self.values[b] - self.values[a]) * t;
            }
        }
        0.0
    }
}

/// A rasterized overlay placed over the video at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStill {
    pub image: RgbaImage,
    /// Canvas point the image is centered on before `transform` applies.
    pub center: Point,
    pub transform: Matrix3<f64>,
    /// `None` means visible for the entire timeline.
    pub visibility: Option<VisibilityRamp>,
}

/// Secondary render graph composited over the plain timeline: the text-mode
/// gradient canvas and any rasterized overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayGraph {
    pub gradient: Option<Gradient>,
    pub stills: Vec<OverlayStill>,
}

impl OverlayGraph {
    pub fn is_empty(&self) -> bool {
        self.gradient.is_none() && self.stills.is_empty()
    }
}

/// Live-preview output of the composition builder.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingComposition {
    pub composition: Composition,
    pub instruction: VideoInstruction,
    pub audio_mix: Vec<AudioMixInput>,
    pub canvas: CanvasSize,
    pub overlay: Option<OverlayGraph>,
}

/// Trimmed, render-ready output of the export composer. Where an overlay
/// graph is present it must be used in place of the plain timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportComposition {
    pub composition: Composition,
    pub instruction: VideoInstruction,
    pub audio_mix: Vec<AudioMixInput>,
    pub canvas: CanvasSize,
    pub overlay: Option<OverlayGraph>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;
    use std::path::PathBuf;

    use crate::core::asset::Size;

    fn asset(seconds: Seconds) -> MediaAsset {
        MediaAsset::video_file(
            PathBuf::from("clip.mp4"),
            seconds,
            Size::new(1080.0, 1920.0),
            Matrix3::identity(),
            true,
        )
    }

    #[test]
    fn test_insert_tracks_duration() {
        let mut comp = Composition::new();
        let track = comp.add_track(TrackKind::Video, asset(30.0));
        comp.insert(track, TimeRange::new(0.0, 10.0), 0.0).unwrap();
        comp.insert(track, TimeRange::new(10.0, 5.0), 10.0).unwrap();
        assert_eq!(comp.duration, 15.0);

        let segment = comp.track(track).unwrap().segment_at(12.0).unwrap();
        assert_eq!(segment.source_time(12.0), 12.0);
    }

    #[test]
    fn test_insert_rejects_bad_ranges() {
        let mut comp = Composition::new();
        let track = comp.add_track(TrackKind::Video, asset(10.0));

        assert!(matches!(
            comp.insert(track, TimeRange::new(0.0, 0.0), 0.0),
            Err(ComposeError::EmptyInsertion { .. })
        ));
        assert!(matches!(
            comp.insert(track, TimeRange::new(5.0, 10.0), 0.0),
            Err(ComposeError::SourceOutOfBounds { .. })
        ));
        assert!(matches!(
            comp.insert(99, TimeRange::new(0.0, 1.0), 0.0),
            Err(ComposeError::UnknownTrack(99))
        ));
    }

    #[test]
    fn test_remove_track_keeps_other_ids_valid() {
        let mut comp = Composition::new();
        let a = comp.add_track(TrackKind::Video, asset(10.0));
        let b = comp.add_track(TrackKind::Audio, asset(10.0));
        comp.remove_track(a);
        assert!(comp.track(a).is_none());
        assert!(comp.track(b).is_some());
    }

    #[test]
    fn test_opacity_step_sampling() {
        let layer = LayerInstruction {
            track: 0,
            transform: Matrix3::identity(),
            crop: None,
            opacity: vec![
                OpacityKeyframe { at: 5.0, value: 1.0 },
                OpacityKeyframe {
                    at: 15.0,
                    value: 0.0,
                },
            ],
        };
        assert_eq!(layer.opacity_at(0.0), 0.0);
        assert_eq!(layer.opacity_at(5.0), 1.0);
        assert_eq!(layer.opacity_at(14.9), 1.0);
        assert_eq!(layer.opacity_at(15.0), 0.0);

        let bare = LayerInstruction {
            opacity: vec![],
            ..layer
        };
        assert_eq!(bare.opacity_at(0.0), 1.0);
    }

    #[test]
    fn test_visibility_ramp_keyframes() {
        // A [2, 5] visible range: 1% of the 3s span is 0.03.
        let ramp = VisibilityRamp::for_range(TimeRange::new(2.0, 3.0));
        assert_eq!(ramp.begin, 2.0);
        assert_eq!(ramp.times, [0.0, 0.03, 2.97, 3.0]);
        assert_eq!(ramp.values, [0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_visibility_ramp_sampling() {
        let ramp = VisibilityRamp::for_range(TimeRange::new(2.0, 3.0));
        assert_eq!(ramp.value_at(1.9), 0.0);
        assert_eq!(ramp.value_at(2.0), 0.0);
        assert_eq!(ramp.value_at(3.5), 1.0);
        assert_eq!(ramp.value_at(5.0), 0.0);
        assert_eq!(ramp.value_at(5.1), 0.0);
    }
}
