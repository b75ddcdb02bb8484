//! Media backend: safe decoding, software compositing, and the
//! ffmpeg-backed reader/writer implementations.

pub mod compositor;
pub mod decoder;
pub mod reader;
pub mod writer;

pub use compositor::FrameCompositor;
pub use decoder::{AssetDecoder, AudioChunk, DecoderPool, FrameProvider, MediaError, VideoFrame};
pub use reader::TimelineReader;
pub use writer::Mp4Writer;
