//! Composition reader: pulls composed frames and mixed audio out of an
//! export composition.
//!
//! The two outputs own disjoint decoder pools, so the exporter's lanes can
//! drain them concurrently without any shared state. Video steps frame by
//! frame through the compositor; audio steps in frame-length chunks, mixing
//! every envelope entry's overlapping segments.

use tracing::debug;

use crate::compose::plan::{ExportComposition, TrackKind};
use crate::core::time::{from_frame_index, round2, Seconds, TimeRange};
use crate::export::pipeline::{ChunkSource, CompositionReader, FrameSource, RenderSettings};
use crate::media::compositor::FrameCompositor;
use crate::media::decoder::{AudioChunk, DecoderPool, MediaError, VideoFrame};

/// Reader bound to one export composition and its render settings.
pub struct TimelineReader {
    plan: ExportComposition,
    settings: RenderSettings,
    video_pool: Option<DecoderPool>,
    audio_pool: Option<DecoderPool>,
}

impl TimelineReader {
    pub fn new(plan: ExportComposition, settings: RenderSettings) -> Self {
        Self {
            plan,
            settings,
            video_pool: None,
            audio_pool: None,
        }
    }
}

impl CompositionReader for TimelineReader {
    /// Open one decoder pool per lane. Any source that fails to open fails
    /// the whole start.
    fn start(&mut self) -> Result<(), MediaError> {
        let mut video_pool = DecoderPool::new();
        let mut audio_pool = DecoderPool::new();
        for track in &self.plan.composition.tracks {
            match track.kind {
                TrackKind::Video => video_pool.open(&track.asset)?,
                TrackKind::Audio => audio_pool.open(&track.asset)?,
            }
        }
        debug!(
            tracks = self.plan.composition.tracks.len(),
            duration = self.plan.composition.duration,
            "composition reader started"
        );
        self.video_pool = Some(video_pool);
        self.audio_pool = Some(audio_pool);
        Ok(())
    }

    fn video_output(&mut self) -> Result<Box<dyn FrameSource>, MediaError> {
        let pool = self.video_pool.take().ok_or(MediaError::OutputUnavailable)?;
        let duration = self.plan.composition.duration;
        let fps = self.settings.fps;
        let total_frames = (duration * fps).ceil().max(0.0) as usize;
        Ok(Box::new(VideoLane {
            compositor: FrameCompositor::new(
                self.plan.clone(),
                self.settings.canvas.pixel_width(),
                self.settings.canvas.pixel_height(),
                pool,
            ),
            fps,
            frame: 0,
            total_frames,
        }))
    }

    fn audio_output(&mut self) -> Option<Box<dyn ChunkSource>> {
        if self.plan.audio_mix.is_empty() {
            return None;
        }
        let pool = self.audio_pool.take()?;
        Some(Box::new(AudioLane {
            plan: self.plan.clone(),
            pool,
            rate: self.settings.sample_rate,
            channels: self.settings.channels,
            chunk: 1.0 / self.settings.fps,
            cursor: 0.0,
        }))
    }
}

struct VideoLane {
    compositor: FrameCompositor<DecoderPool>,
    fps: f64,
    frame: usize,
    total_frames: usize,
}

// The lane exclusively owns its decoder pool and compositor; nothing in it
// is shared with any other thread.
unsafe impl Send for VideoLane {}

impl FrameSource for VideoLane {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, MediaError> {
        if self.frame >= self.total_frames {
            return Ok(None);
        }
        let at = from_frame_index(self.frame, self.fps);
        let frame = self.compositor.composite(at)?;
        self.frame += 1;
        Ok(Some(frame))
    }
}

struct AudioLane {
    plan: ExportComposition,
    pool: DecoderPool,
    rate: u32,
    channels: u32,
    /// Chunk length in seconds; one video frame's worth.
    chunk: Seconds,
    cursor: Seconds,
}

// Same exclusive-ownership argument as VideoLane.
unsafe impl Send for AudioLane {}

impl ChunkSource for AudioLane {
    fn next_chunk(&mut self) -> Result<Option<AudioChunk>, MediaError> {
        let duration = self.plan.composition.duration;
        // round2 guard: float residue from chunk stepping must not produce
        // a trailing empty chunk.
        if round2(duration - self.cursor) <= 0.0 {
            return Ok(None);
        }
        let span = self.chunk.min(duration - self.cursor);
        let window = TimeRange::new(self.cursor, span);
        let len = (span * self.rate as f64).round() as usize * self.channels as usize;
        let mut samples = vec![0f32; len];

        for input in &self.plan.audio_mix {
            let Some(track) = self.plan.composition.track(input.track) else {
                continue;
            };
            for segment in &track.segments {
                let placed = TimeRange::new(segment.at, segment.source.duration);
                let Some(overlap) = placed.intersection(&window) else {
                    continue;
                };
                let source = TimeRange::new(segment.source_time(overlap.start), overlap.duration);
                let decoded = self.pool.samples(&track.asset, source, self.rate, self.channels)?;
                let base =
                    ((overlap.start - window.start) * self.rate as f64).round() as usize
                        * self.channels as usize;
                for (i, sample) in decoded.iter().enumerate() {
                    if let Some(slot) = samples.get_mut(base + i) {
                        *slot += sample * input.volume;
                    }
                }
            }
        }

        let chunk = AudioChunk {
            samples,
            sample_rate: self.rate,
            channels: self.channels,
            pts: self.cursor,
        };
        self.cursor += span;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix3, SquareMatrix};
    use std::path::PathBuf;

    use crate::compose::builder::BuildInputs;
    use crate::compose::export::build_export;
    use crate::compose::text::OverlayRenderer;
    use crate::compose::transform::CanvasSize;
    use crate::core::asset::{MediaAsset, Size};
    use crate::core::model::{CompositionMode, MediaSnapshot, TextSpec, VideoClip};

    struct NoText;

    impl OverlayRenderer for NoText {
        fn rasterize(&self, spec: &TextSpec) -> image::RgbaImage {
            image::RgbaImage::from_pixel(1, 1, image::Rgba(spec.color))
        }
    }

    fn blank_plan(seconds: f64) -> ExportComposition {
        // Blank-canvas clips keep the reader free of real file decoding.
        let mut clip = VideoClip::new(MediaAsset::blank_canvas(Size::new(4.0, 8.0)));
        clip.trim_range = Some(crate::core::time::TimeRange::new(0.0, seconds));
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(clip);
        snapshot.refresh_output_window();
        let inputs = BuildInputs {
            snapshot: &snapshot,
            mode: CompositionMode::Recorded,
            canvas: CanvasSize::new(4.0, 8.0),
            duet_origin: None,
            original_volume: 1.0,
            added_volume: 1.0,
            gradient: None,
        };
        build_export(&inputs, &[], &NoText)
    }

    fn settings() -> RenderSettings {
        RenderSettings {
            canvas: CanvasSize::new(4.0, 8.0),
            fps: 10.0,
            sample_rate: 100,
            channels: 2,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn test_video_lane_steps_the_frame_grid() {
        let mut reader = TimelineReader::new(blank_plan(1.0), settings());
        reader.start().unwrap();
        let mut lane = reader.video_output().unwrap();

        let mut frames = 0;
        while let Some(frame) = lane.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (4, 8));
            frames += 1;
        }
        // 1s at 10 fps.
        assert_eq!(frames, 10);
    }

    #[test]
    fn test_outputs_are_taken_once() {
        let mut reader = TimelineReader::new(blank_plan(1.0), settings());
        reader.start().unwrap();
        assert!(reader.video_output().is_ok());
        assert!(matches!(
            reader.video_output(),
            Err(MediaError::OutputUnavailable)
        ));
    }

    #[test]
    fn test_unstarted_reader_has_no_outputs() {
        let mut reader = TimelineReader::new(blank_plan(1.0), settings());
        assert!(matches!(
            reader.video_output(),
            Err(MediaError::OutputUnavailable)
        ));
    }

    #[test]
    fn test_silent_composition_has_no_audio_output() {
        // Blank canvases carry no audio, so the mix is empty.
        let mut reader = TimelineReader::new(blank_plan(1.0), settings());
        reader.start().unwrap();
        assert!(reader.audio_output().is_none());
    }

    #[test]
    fn test_audio_lane_chunks_cover_the_duration() {
        let mut plan = blank_plan(1.0);
        // Splice a synthetic silent envelope entry onto the blank track so
        // the audio lane has something to mix.
        let track = plan
            .composition
            .tracks
            .first()
            .map(|t| t.id)
            .unwrap();
        plan.audio_mix.push(crate::compose::plan::AudioMixInput {
            track,
            volume: 1.0,
        });

        let mut reader = TimelineReader::new(plan, settings());
        reader.start().unwrap();
        let mut lane = reader.audio_output().unwrap();

        let mut total_samples = 0;
        while let Some(chunk) = lane.next_chunk().unwrap() {
            assert_eq!(chunk.channels, 2);
            total_samples += chunk.samples.len();
        }
        // 1s at 100 Hz stereo.
        assert_eq!(total_samples, 200);
    }
}
