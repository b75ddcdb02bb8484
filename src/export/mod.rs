//! Export pipeline: target parameters, the reader/writer seams, the
//! two-lane render exporter, thumbnail capture, and still-clip synthesis.

pub mod exporter;
pub mod pipeline;
pub mod still;
pub mod thumbnail;

pub use exporter::{export_story, ExportPhase, RenderExporter};
pub use pipeline::{
    ChunkSink, ChunkSource, CompositionReader, ContainerWriter, ExportError, FrameSink,
    FrameSource, RenderSettings,
};
pub use still::synthesize_still_clip;
pub use thumbnail::{capture_frame, capture_story_frame};
