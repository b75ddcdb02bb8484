//! Export target parameters and the reader/writer seams the render
//! exporter drives.
//!
//! The traits model the underlying media framework: a reader decodes
//! composed video frames and mixed audio chunks out of an export
//! composition, a writer encodes them into a container. The exporter only
//! ever talks to these traits; the ffmpeg-backed implementations live in
//! [`crate::media`].

use std::env;
use std::path::PathBuf;

use crate::compose::plan::ComposeError;
use crate::compose::transform::CanvasSize;
use crate::media::decoder::{AudioChunk, MediaError, VideoFrame};

/// Deterministic output file name; each export overwrites the previous one.
const OUTPUT_FILE_NAME: &str = "temp_video_data.mp4";

/// Fixed encode parameters for the exported story.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub canvas: CanvasSize,
    pub fps: f64,
    pub video_bitrate: usize,
    pub audio_bitrate: usize,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            canvas: CanvasSize::new(1080.0, 1920.0),
            fps: 30.0,
            video_bitrate: 5_000_000,
            audio_bitrate: 192_000,
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl RenderSettings {
    /// Interleaved samples covering one video frame's duration.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as f64 / self.fps).round() as usize * self.channels as usize
    }

    /// The deterministic temp path exports are written to.
    pub fn output_path() -> PathBuf {
        env::temp_dir().join(OUTPUT_FILE_NAME)
    }
}

/// Error type for the export pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("reader failed to start: {0}")]
    ReaderStart(#[source] MediaError),
    #[error("writer failed to start: {0}")]
    WriterStart(#[source] MediaError),
    #[error("reading samples failed: {0}")]
    Read(#[source] MediaError),
    #[error("writing samples failed: {0}")]
    Write(#[source] MediaError),
    #[error("writer failed to finalize: {0}")]
    Finalize(#[source] MediaError),
    #[error("composition error: {0}")]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pull source of composed, decoded video frames.
pub trait FrameSource: Send {
    /// The next frame, or `None` when the composition is exhausted.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, MediaError>;
}

/// Pull source of mixed, decoded audio chunks.
pub trait ChunkSource: Send {
    fn next_chunk(&mut self) -> Result<Option<AudioChunk>, MediaError>;
}

/// Reader bound to one export composition.
pub trait CompositionReader {
    /// Open decoders and validate the composition's sources.
    fn start(&mut self) -> Result<(), MediaError>;
    /// Take the video output. Each output is taken at most once; the lanes
    /// own disjoint objects.
    fn video_output(&mut self) -> Result<Box<dyn FrameSource>, MediaError>;
    /// Take the audio output, absent when the composition carries no audio.
    fn audio_output(&mut self) -> Option<Box<dyn ChunkSource>>;
}

/// Sink for encoded video frames; appends apply backpressure through the
/// writer's bounded buffer.
pub trait FrameSink: Send {
    /// Whether the input can accept another sample without blocking.
    fn is_ready(&self) -> bool;
    /// Append one frame, blocking while the writer's buffer is full.
    fn append(&mut self, frame: VideoFrame) -> Result<(), MediaError>;
    /// Signal that no more frames are coming.
    fn mark_finished(&mut self);
}

/// Sink for encoded audio chunks.
pub trait ChunkSink: Send {
    fn is_ready(&self) -> bool;
    fn append(&mut self, chunk: AudioChunk) -> Result<(), MediaError>;
    fn mark_finished(&mut self);
}

/// Writer producing the output container.
pub trait ContainerWriter {
    fn start(&mut self) -> Result<(), MediaError>;
    fn video_input(&mut self) -> Box<dyn FrameSink>;
    fn audio_input(&mut self) -> Box<dyn ChunkSink>;
    /// Finalize the container and return the written file's path.
    fn finish(&mut self) -> Result<PathBuf, MediaError>;
}
