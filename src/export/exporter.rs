//! Render exporter: drives a composition reader into a container writer.
//!
//! Two pull loops run concurrently, one per lane, each owning a disjoint
//! reader output and writer input; a completion barrier holds finalization
//! until both lanes have signaled finished. The audio lane only exists (and
//! only joins the barrier) when the reader actually has audio.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crossbeam::channel::unbounded;
use crossbeam::sync::WaitGroup;
use tracing::{debug, info};

use crate::compose::plan::ExportComposition;
use crate::export::pipeline::{
    ChunkSink, ChunkSource, CompositionReader, ContainerWriter, ExportError, FrameSink,
    FrameSource, RenderSettings,
};
use crate::media::reader::TimelineReader;
use crate::media::writer::Mp4Writer;

/// Where an export currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    /// Both lanes pulling samples.
    Running,
    Finalizing,
    Done,
    Failed,
}

/// One-shot export state machine.
pub struct RenderExporter {
    phase: ExportPhase,
}

impl RenderExporter {
    pub fn new() -> Self {
        Self {
            phase: ExportPhase::Idle,
        }
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    /// Run the export to completion and return the written file's path.
    ///
    /// A stale file at the output path is removed first. If the reader
    /// fails to start the writer is never touched. Mid-flight there is no
    /// cancellation; a caller that aborts discards the result and deletes
    /// the partial file.
    pub fn export(
        &mut self,
        reader: &mut dyn CompositionReader,
        writer: &mut dyn ContainerWriter,
        output: &Path,
    ) -> Result<PathBuf, ExportError> {
        match self.run(reader, writer, output) {
            Ok(path) => {
                self.phase = ExportPhase::Done;
                info!(path = %path.display(), "export finished");
                Ok(path)
            }
            Err(err) => {
                self.phase = ExportPhase::Failed;
                Err(err)
            }
        }
    }

    fn run(
        &mut self,
        reader: &mut dyn CompositionReader,
        writer: &mut dyn ContainerWriter,
        output: &Path,
    ) -> Result<PathBuf, ExportError> {
        if let Err(err) = fs::remove_file(output) {
            if err.kind() != ErrorKind::NotFound {
                return Err(err.into());
            }
        }

        reader.start().map_err(ExportError::ReaderStart)?;
        writer.start().map_err(ExportError::WriterStart)?;
        self.phase = ExportPhase::Running;

        let video_source = reader.video_output().map_err(ExportError::Read)?;
        let audio_source = reader.audio_output();
        let video_sink = writer.video_input();
        let audio_sink = audio_source.as_ref().map(|_| writer.audio_input());

        let barrier = WaitGroup::new();
        let (error_tx, error_rx) = unbounded::<ExportError>();

        std::thread::scope(|scope| {
            {
                let lane_done = barrier.clone();
                let errors = error_tx.clone();
                scope.spawn(move || {
                    if let Err(err) = run_video_lane(video_source, video_sink) {
                        errors.send(err).ok();
                    }
                    drop(lane_done);
                });
            }
            if let (Some(source), Some(sink)) = (audio_source, audio_sink) {
                let lane_done = barrier.clone();
                let errors = error_tx.clone();
                scope.spawn(move || {
                    if let Err(err) = run_audio_lane(source, sink) {
                        errors.send(err).ok();
                    }
                    drop(lane_done);
                });
            }
            drop(error_tx);
            // Completion barrier: both lanes must have signaled finished.
            barrier.wait();
        });

        if let Ok(err) = error_rx.try_recv() {
            return Err(err);
        }

        self.phase = ExportPhase::Finalizing;
        debug!("lanes drained, finalizing writer");
        writer.finish().map_err(ExportError::Finalize)
    }
}

impl Default for RenderExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy decoded frames until the source runs dry, then mark the input
/// finished. Backpressure comes from the sink's bounded buffer.
fn run_video_lane(
    mut source: Box<dyn FrameSource>,
    mut sink: Box<dyn FrameSink>,
) -> Result<(), ExportError> {
    loop {
        match source.next_frame().map_err(ExportError::Read)? {
            Some(frame) => sink.append(frame).map_err(ExportError::Write)?,
            None => {
                sink.mark_finished();
                return Ok(());
            }
        }
    }
}

fn run_audio_lane(
    mut source: Box<dyn ChunkSource>,
    mut sink: Box<dyn ChunkSink>,
) -> Result<(), ExportError> {
    loop {
        match source.next_chunk().map_err(ExportError::Read)? {
            Some(chunk) => sink.append(chunk).map_err(ExportError::Write)?,
            None => {
                sink.mark_finished();
                return Ok(());
            }
        }
    }
}

/// Wire the ffmpeg-backed reader and writer around an export composition
/// and run the export to the deterministic output path.
pub fn export_story(
    plan: &ExportComposition,
    settings: &RenderSettings,
) -> Result<PathBuf, ExportError> {
    let output = RenderSettings::output_path();
    let mut reader = TimelineReader::new(plan.clone(), settings.clone());
    let mut writer = if plan.audio_mix.is_empty() {
        Mp4Writer::video_only(settings.clone(), &output)
    } else {
        Mp4Writer::new(settings.clone(), &output)
    };
    RenderExporter::new().export(&mut reader, &mut writer, &output)
}
