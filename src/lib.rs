//! storycut - timeline-based story composition and export engine.
//!
//! The crate assembles user-supplied video clips, still images, background
//! audio, and timed text overlays into a single rendered short-form story.
//! Composition is pure descriptor arithmetic (`core`, `compose`); decoding
//! and encoding happen only behind the media seams (`media`, `export`).

pub mod compose;
pub mod core;
pub mod export;
pub mod media;

pub use crate::compose::builder::{rebuild_working, BuildInputs};
pub use crate::compose::export::build_export;
pub use crate::compose::plan::{ExportComposition, WorkingComposition};
pub use crate::compose::text::{FontOverlayRenderer, OverlayRenderer};
pub use crate::compose::transform::CanvasSize;
pub use crate::core::asset::MediaAsset;
pub use crate::core::model::{
    BackgroundSong, CompositionMode, MediaSnapshot, TextOverlay, VideoClip,
};
pub use crate::core::session::CompositionSession;
pub use crate::core::time::{Seconds, TimeRange};
pub use crate::export::exporter::{export_story, RenderExporter};
pub use crate::export::pipeline::{ExportError, RenderSettings};
pub use crate::export::still::synthesize_still_clip;
pub use crate::export::thumbnail::{capture_frame, capture_story_frame};
