//! Per-mode composition behavior.
//!
//! Each creation mode contributes the same three decisions to a rebuild:
//! how clip layers are placed, whether concatenation fades apply, and which
//! extra layers or overlay surfaces lead the timeline. One strategy object
//! per mode keeps those decisions in one place instead of scattering mode
//! checks across the builder and the export composer.

use crate::compose::plan::OverlayGraph;
use crate::compose::transform::{self, CanvasSize, LayerRole, Placement};
use crate::core::asset::MediaAsset;
use crate::core::model::{CompositionMode, Gradient};
use crate::core::time::{round2, Seconds, TimeRange};

/// Rebuild-time facts a strategy may consult.
pub struct LayoutContext<'a> {
    pub canvas: &'a CanvasSize,
    pub duet_origin: Option<&'a MediaAsset>,
    /// Total length of the timeline being built.
    pub total: Seconds,
}

/// A pinned layer inserted ahead of the story clips.
pub struct LeadingTrack {
    pub asset: MediaAsset,
    pub range: TimeRange,
    pub placement: Placement,
}

/// Mode-specific composition behavior, selected once per mode change.
pub trait ModeLayout: Sync {
    /// Canvas slot for the story's own clips.
    fn clip_role(&self) -> LayerRole {
        LayerRole::Standard
    }

    /// Whether clip layers get the opacity toggles that implement
    /// concatenation.
    fn fades_enabled(&self) -> bool {
        true
    }

    /// Layer inserted before any clip, if the mode has one.
    fn leading_track(&self, _ctx: &LayoutContext) -> Option<LeadingTrack> {
        None
    }

    /// Base overlay surface composited over the timeline, if the mode has
    /// one.
    fn base_overlay(&self, _gradient: Option<Gradient>) -> Option<OverlayGraph> {
        None
    }
}

/// Camera-captured stories: plain full-canvas concatenation.
pub struct RecordedLayout;

impl ModeLayout for RecordedLayout {}

/// Gallery imports behave like recordings once on the timeline.
pub struct GalleryLayout;

impl ModeLayout for GalleryLayout {}

/// Text stories: one blank canvas clip under a gradient surface, no fades.
pub struct TextLayout;

impl ModeLayout for TextLayout {
    fn fades_enabled(&self) -> bool {
        false
    }

    fn base_overlay(&self, gradient: Option<Gradient>) -> Option<OverlayGraph> {
        Some(OverlayGraph {
            gradient,
            stills: Vec::new(),
        })
    }
}

/// Duet: the origin story pinned to the upper half, recordings below.
pub struct DuetLayout;

impl ModeLayout for DuetLayout {
    fn clip_role(&self) -> LayerRole {
        LayerRole::DuetRecording
    }

    fn leading_track(&self, ctx: &LayoutContext) -> Option<LeadingTrack> {
        let origin = ctx.duet_origin?;
        let natural = origin.natural_size()?;
        // The pinned layer never outlives the story being built.
        let scope = origin.duration().min(ctx.total);
        if round2(scope) <= 0.0 {
            return None;
        }
        Some(LeadingTrack {
            asset: origin.clone(),
            range: TimeRange::new(0.0, scope),
            placement: transform::resolve(
                natural,
                origin.orientation(),
                ctx.canvas,
                LayerRole::DuetOrigin,
            ),
        })
    }
}

/// The strategy object for a mode.
pub fn layout_for(mode: CompositionMode) -> &'static dyn ModeLayout {
    match mode {
        CompositionMode::Recorded => &RecordedLayout,
        CompositionMode::Gallery => &GalleryLayout,
        CompositionMode::Text => &TextLayout,
        CompositionMode::Duet => &DuetLayout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix3, SquareMatrix};
    use std::path::PathBuf;

    use crate::core::asset::Size;

    #[test]
    fn test_duet_leading_scope_is_bounded_by_total() {
        let canvas = CanvasSize::new(1080.0, 1920.0);
        let origin = MediaAsset::video_file(
            PathBuf::from("origin.mp4"),
            8.0,
            Size::new(1080.0, 1920.0),
            Matrix3::identity(),
            true,
        );
        let ctx = LayoutContext {
            canvas: &canvas,
            duet_origin: Some(&origin),
            total: 5.0,
        };
        let leading = DuetLayout.leading_track(&ctx).unwrap();
        assert_eq!(leading.range, TimeRange::new(0.0, 5.0));
    }

    #[test]
    fn test_duet_without_origin_has_no_leading_track() {
        let canvas = CanvasSize::new(1080.0, 1920.0);
        let ctx = LayoutContext {
            canvas: &canvas,
            duet_origin: None,
            total: 5.0,
        };
        assert!(DuetLayout.leading_track(&ctx).is_none());
    }

    #[test]
    fn test_text_layout_disables_fades() {
        assert!(!TextLayout.fades_enabled());
        assert!(RecordedLayout.fades_enabled());
        let overlay = TextLayout.base_overlay(None).unwrap();
        assert!(overlay.is_empty());
    }
}
