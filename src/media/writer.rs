//! MP4 container writer (H.264 + AAC).
//!
//! The writer hands out channel-backed input handles; appends block once
//! the bounded buffer fills, which is what paces the exporter's lanes. A
//! dedicated worker thread drains both buffers into the encoders and muxes
//! interleaved packets, since the container must be written from a single
//! thread anyway.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, never, Receiver, Sender};
use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;
use ffmpeg::util::format;
use ffmpeg::{codec, frame, ChannelLayout, Rational};
use tracing::{debug, warn};

use crate::export::pipeline::{ChunkSink, ContainerWriter, FrameSink, RenderSettings};
use crate::media::decoder::{AudioChunk, MediaError, VideoFrame};

/// Frames buffered ahead of the encoder before appends block.
const VIDEO_QUEUE_DEPTH: usize = 8;
const AUDIO_QUEUE_DEPTH: usize = 16;

/// Container writer targeting a fresh MP4 file.
pub struct Mp4Writer {
    path: PathBuf,
    settings: RenderSettings,
    with_audio: bool,
    video_tx: Option<Sender<VideoFrame>>,
    audio_tx: Option<Sender<AudioChunk>>,
    video_rx: Option<Receiver<VideoFrame>>,
    audio_rx: Option<Receiver<AudioChunk>>,
    worker: Option<JoinHandle<Result<(), MediaError>>>,
    failed: Arc<AtomicBool>,
}

impl Mp4Writer {
    pub fn new(settings: RenderSettings, path: &Path) -> Self {
        Self::with_audio_flag(settings, path, true)
    }

    /// Writer with no audio stream, for synthesized still clips.
    pub fn video_only(settings: RenderSettings, path: &Path) -> Self {
        Self::with_audio_flag(settings, path, false)
    }

    fn with_audio_flag(settings: RenderSettings, path: &Path, with_audio: bool) -> Self {
        let (video_tx, video_rx) = bounded(VIDEO_QUEUE_DEPTH);
        let (audio_tx, audio_rx) = bounded(AUDIO_QUEUE_DEPTH);
        Self {
            path: path.to_path_buf(),
            settings,
            with_audio,
            video_tx: Some(video_tx),
            audio_tx: Some(audio_tx),
            video_rx: Some(video_rx),
            audio_rx: Some(audio_rx),
            worker: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ContainerWriter for Mp4Writer {
    /// Open the encoders and start the mux worker. Encoder setup failures
    /// surface here, before any sample is accepted.
    fn start(&mut self) -> Result<(), MediaError> {
        let video_rx = self.video_rx.take().ok_or(MediaError::WriterClosed)?;
        let audio_rx = self.audio_rx.take().ok_or(MediaError::WriterClosed)?;
        let muxer = Muxer::open(&self.settings, &self.path, self.with_audio)?;

        let failed = Arc::clone(&self.failed);
        self.worker = Some(std::thread::spawn(move || {
            let result = muxer.run(video_rx, audio_rx);
            if let Err(err) = &result {
                failed.store(true, Ordering::Release);
                warn!(%err, "mux worker failed");
            }
            result
        }));
        Ok(())
    }

    fn video_input(&mut self) -> Box<dyn FrameSink> {
        Box::new(QueueInput {
            tx: self.video_tx.take(),
            failed: Arc::clone(&self.failed),
        })
    }

    fn audio_input(&mut self) -> Box<dyn ChunkSink> {
        Box::new(QueueInput {
            tx: self.audio_tx.take(),
            failed: Arc::clone(&self.failed),
        })
    }

    /// Close any untaken inputs, wait for the worker to drain, and finalize
    /// the container.
    fn finish(&mut self) -> Result<PathBuf, MediaError> {
        self.video_tx = None;
        self.audio_tx = None;
        let worker = self.worker.take().ok_or(MediaError::WriterClosed)?;
        worker.join().map_err(|_| MediaError::WriterClosed)??;
        Ok(self.path.clone())
    }
}

/// Channel-backed input handle shared by the video and audio lanes.
struct QueueInput<T> {
    tx: Option<Sender<T>>,
    failed: Arc<AtomicBool>,
}

impl<T> QueueInput<T> {
    fn push(&mut self, item: T) -> Result<(), MediaError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(MediaError::WriterClosed);
        }
        match &self.tx {
            // send blocks while the bounded buffer is full.
            Some(tx) => tx.send(item).map_err(|_| MediaError::WriterClosed),
            None => Err(MediaError::WriterClosed),
        }
    }

    fn ready(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_full()).unwrap_or(false)
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

impl FrameSink for QueueInput<VideoFrame> {
    fn is_ready(&self) -> bool {
        self.ready()
    }

    fn append(&mut self, frame: VideoFrame) -> Result<(), MediaError> {
        self.push(frame)
    }

    fn mark_finished(&mut self) {
        self.close();
    }
}

impl ChunkSink for QueueInput<AudioChunk> {
    fn is_ready(&self) -> bool {
        self.ready()
    }

    fn append(&mut self, chunk: AudioChunk) -> Result<(), MediaError> {
        self.push(chunk)
    }

    fn mark_finished(&mut self) {
        self.close();
    }
}

struct AudioEncoderState {
    encoder: ffmpeg::encoder::Audio,
    stream_index: usize,
    stream_time_base: Rational,
    /// Samples per channel per AAC frame.
    frame_size: usize,
    pending: Vec<f32>,
    pts: i64,
}

/// Owns the output context and both encoders. Runs on the worker thread.
struct Muxer {
    octx: ffmpeg::format::context::Output,
    video: ffmpeg::encoder::Video,
    video_stream_index: usize,
    video_time_base: Rational,
    video_stream_time_base: Rational,
    scaler: scaling::Context,
    video_pts: i64,
    audio: Option<AudioEncoderState>,
    channels: usize,
    sample_rate: u32,
}

// The muxer is moved into the worker thread at start and owned by it
// exclusively from then on.
unsafe impl Send for Muxer {}

impl Muxer {
    fn open(settings: &RenderSettings, path: &Path, with_audio: bool) -> Result<Self, MediaError> {
        ffmpeg::init()?;
        let mut octx = ffmpeg::format::output(&path)?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let width = settings.canvas.pixel_width();
        let height = settings.canvas.pixel_height();
        let fps = settings.fps.round() as i32;

        let video_codec =
            ffmpeg::encoder::find(codec::Id::H264).ok_or(MediaError::EncoderMissing("h264"))?;
        let video_stream_index;
        {
            let ost = octx.add_stream(video_codec)?;
            video_stream_index = ost.index();
        }
        let mut video_ctx = codec::context::Context::new_with_codec(video_codec)
            .encoder()
            .video()?;
        video_ctx.set_width(width);
        video_ctx.set_height(height);
        video_ctx.set_format(format::Pixel::YUV420P);
        video_ctx.set_time_base(Rational(1, fps));
        video_ctx.set_frame_rate(Some(Rational(fps, 1)));
        video_ctx.set_bit_rate(settings.video_bitrate);
        if global_header {
            video_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let video = video_ctx.open_as(video_codec)?;
        octx.stream_mut(video_stream_index)
            .ok_or(MediaError::WriterClosed)?
            .set_parameters(&video);

        let audio = if with_audio {
            let audio_codec =
                ffmpeg::encoder::find(codec::Id::AAC).ok_or(MediaError::EncoderMissing("aac"))?;
            let audio_stream_index;
            {
                let ost = octx.add_stream(audio_codec)?;
                audio_stream_index = ost.index();
            }
            let mut audio_ctx = codec::context::Context::new_with_codec(audio_codec)
                .encoder()
                .audio()?;
            audio_ctx.set_rate(settings.sample_rate as i32);
            audio_ctx.set_channel_layout(ChannelLayout::default(settings.channels as i32));
            audio_ctx.set_format(format::Sample::F32(format::sample::Type::Planar));
            audio_ctx.set_bit_rate(settings.audio_bitrate);
            audio_ctx.set_time_base(Rational(1, settings.sample_rate as i32));
            if global_header {
                audio_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
            }
            let encoder = audio_ctx.open_as(audio_codec)?;
            octx.stream_mut(audio_stream_index)
                .ok_or(MediaError::WriterClosed)?
                .set_parameters(&encoder);
            let frame_size = match encoder.frame_size() {
                0 => 1024,
                size => size as usize,
            };
            Some(AudioEncoderState {
                encoder,
                stream_index: audio_stream_index,
                stream_time_base: Rational(1, settings.sample_rate as i32),
                frame_size,
                pending: Vec::new(),
                pts: 0,
            })
        } else {
            None
        };

        octx.write_header()?;

        let video_stream_time_base = octx
            .stream(video_stream_index)
            .ok_or(MediaError::WriterClosed)?
            .time_base();
        let audio = audio.map(|mut state| {
            if let Some(stream) = octx.stream(state.stream_index) {
                state.stream_time_base = stream.time_base();
            }
            state
        });

        let scaler = scaling::Context::get(
            format::Pixel::RGBA,
            width,
            height,
            format::Pixel::YUV420P,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;

        debug!(path = %path.display(), width, height, fps, "container writer opened");
        Ok(Self {
            octx,
            video,
            video_stream_index,
            video_time_base: Rational(1, fps),
            video_stream_time_base,
            scaler,
            video_pts: 0,
            audio,
            channels: settings.channels as usize,
            sample_rate: settings.sample_rate,
        })
    }

    /// Drain both buffers until their senders close, then flush and write
    /// the trailer.
    fn run(
        mut self,
        video_rx: Receiver<VideoFrame>,
        audio_rx: Receiver<AudioChunk>,
    ) -> Result<(), MediaError> {
        let never_video = never::<VideoFrame>();
        let never_audio = never::<AudioChunk>();
        let mut video_done = false;
        let mut audio_done = false;

        while !(video_done && audio_done) {
            let vrx = if video_done { &never_video } else { &video_rx };
            let arx = if audio_done { &never_audio } else { &audio_rx };
            crossbeam::channel::select! {
                recv(vrx) -> message => match message {
                    Ok(frame) => self.encode_video(frame)?,
                    Err(_) => video_done = true,
                },
                recv(arx) -> message => match message {
                    Ok(chunk) => self.buffer_audio(chunk)?,
                    Err(_) => audio_done = true,
                },
            }
        }

        self.flush()
    }

    fn encode_video(&mut self, frame: VideoFrame) -> Result<(), MediaError> {
        let width = frame.width;
        let height = frame.height;
        let mut rgba = frame::Video::new(format::Pixel::RGBA, width, height);
        let stride = rgba.stride(0);
        let row = width as usize * 4;
        {
            let plane = rgba.data_mut(0);
            for y in 0..height as usize {
                plane[y * stride..y * stride + row]
                    .copy_from_slice(&frame.data[y * row..(y + 1) * row]);
            }
        }

        let mut yuv = frame::Video::empty();
        self.scaler.run(&rgba, &mut yuv)?;
        yuv.set_pts(Some(self.video_pts));
        self.video_pts += 1;

        self.video.send_frame(&yuv)?;
        self.drain_video_packets()
    }

    fn buffer_audio(&mut self, chunk: AudioChunk) -> Result<(), MediaError> {
        let Some(state) = self.audio.as_mut() else {
            warn!("audio chunk received by a video-only writer");
            return Ok(());
        };
        state.pending.extend_from_slice(&chunk.samples);
        self.drain_audio_frames(false)
    }

    /// Encode buffered samples in encoder-frame quanta. When `pad` is set
    /// the final partial frame is zero-filled and encoded too.
    fn drain_audio_frames(&mut self, pad: bool) -> Result<(), MediaError> {
        let channels = self.channels;
        let Some(state) = self.audio.as_mut() else {
            return Ok(());
        };
        let quantum = state.frame_size * channels;

        while state.pending.len() >= quantum || (pad && !state.pending.is_empty()) {
            let mut samples: Vec<f32> = state
                .pending
                .drain(..quantum.min(state.pending.len()))
                .collect();
            samples.resize(quantum, 0.0);

            let mut planar = frame::Audio::new(
                format::Sample::F32(format::sample::Type::Planar),
                state.frame_size,
                ChannelLayout::default(channels as i32),
            );
            planar.set_rate(self.sample_rate);
            for channel in 0..channels {
                let plane = planar.plane_mut::<f32>(channel);
                for (i, slot) in plane.iter_mut().enumerate().take(state.frame_size) {
                    *slot = samples[i * channels + channel];
                }
            }
            planar.set_pts(Some(state.pts));
            state.pts += state.frame_size as i64;

            state.encoder.send_frame(&planar)?;
            let mut packet = ffmpeg::Packet::empty();
            while state.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(state.stream_index);
                packet.rescale_ts(
                    Rational(1, self.sample_rate as i32),
                    state.stream_time_base,
                );
                packet.write_interleaved(&mut self.octx)?;
            }
        }
        Ok(())
    }

    fn drain_video_packets(&mut self) -> Result<(), MediaError> {
        let mut packet = ffmpeg::Packet::empty();
        while self.video.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.video_stream_index);
            packet.rescale_ts(self.video_time_base, self.video_stream_time_base);
            packet.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.drain_audio_frames(true)?;
        if let Some(state) = self.audio.as_mut() {
            state.encoder.send_eof()?;
            let mut packet = ffmpeg::Packet::empty();
            while state.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(state.stream_index);
                packet.rescale_ts(
                    Rational(1, self.sample_rate as i32),
                    state.stream_time_base,
                );
                packet.write_interleaved(&mut self.octx)?;
            }
        }
        self.video.send_eof()?;
        self.drain_video_packets()?;
        self.octx.write_trailer()?;
        debug!(frames = self.video_pts, "container finalized");
        Ok(())
    }
}
