//! Composition building: placement math, descriptor types, and the
//! working/export rebuild passes.

pub mod builder;
pub mod export;
pub mod layout;
pub mod plan;
pub mod text;
pub mod transform;

pub use builder::{rebuild_working, BuildInputs};
pub use export::build_export;
pub use plan::{
    AudioMixInput, ComposeError, Composition, ExportComposition, LayerInstruction, OverlayGraph,
    OverlayStill, TrackId, TrackKind, VideoInstruction, VisibilityRamp, WorkingComposition,
};
pub use text::{FontOverlayRenderer, OverlayRenderer};
pub use transform::{CanvasSize, CropRect, LayerRole, Placement};
