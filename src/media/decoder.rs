//! Media decoding behind a safe API.
//!
//! All FFmpeg work is isolated in this module. Video decodes to RGBA8 at
//! the source's natural size; audio decodes to interleaved f32 PCM at the
//! caller's target rate and channel count. Synthetic blank-canvas sources
//! are served without touching FFmpeg at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg::software::resampling;
use ffmpeg::software::scaling;
use ffmpeg::util::format;
use ffmpeg::{codec, decoder, frame, media, ChannelLayout, Rational};
use tracing::trace;

use crate::core::asset::{AssetSource, MediaAsset, Size};
use crate::core::time::{Seconds, TimeRange};

/// Error type for decode, probe, and encode operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg::Error),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("no video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("no audio stream in {0}")]
    NoAudioStream(PathBuf),
    #[error("no frame decodable at {at}s")]
    DecodeExhausted { at: Seconds },
    #[error("encoder {0} is not available")]
    EncoderMissing(&'static str),
    #[error("writer already closed")]
    WriterClosed,
    #[error("reader output unavailable; start the reader and take each output once")]
    OutputUnavailable,
}

/// Decoded video frame, RGBA8 interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: Seconds,
}

impl VideoFrame {
    /// Opaque black frame, used for blank canvases and missing layers.
    pub fn black(width: u32, height: u32, pts: Seconds) -> Self {
        let mut data = vec![0u8; (width * height * 4) as usize];
        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        Self {
            data,
            width,
            height,
            pts,
        }
    }
}

/// Decoded audio, interleaved f32 PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
    pub pts: Seconds,
}

/// Fetches composed video frames for an asset at a source timestamp.
///
/// The compositor and thumbnail extractor pull frames through this seam so
/// tests can substitute synthetic sources.
pub trait FrameProvider {
    fn frame_at(&mut self, asset: &MediaAsset, at: Seconds) -> Result<VideoFrame, MediaError>;
}

struct VideoStream {
    index: usize,
    decoder: decoder::Video,
    scaler: scaling::Context,
    time_base: Rational,
}

struct AudioStream {
    index: usize,
    decoder: decoder::Audio,
    time_base: Rational,
}

/// Safe decoder for one media file.
pub struct AssetDecoder {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    video: Option<VideoStream>,
    audio: Option<AudioStream>,
}

impl AssetDecoder {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        ffmpeg::init()?;
        let input = ffmpeg::format::input(&path)?;

        let video = match input.streams().best(media::Type::Video) {
            Some(stream) => {
                let context = codec::context::Context::from_parameters(stream.parameters())?;
                let decoder = context.decoder().video()?;
                let scaler = scaling::Context::get(
                    decoder.format(),
                    decoder.width(),
                    decoder.height(),
                    format::Pixel::RGBA,
                    decoder.width(),
                    decoder.height(),
                    scaling::Flags::BILINEAR,
                )?;
                Some(VideoStream {
                    index: stream.index(),
                    decoder,
                    scaler,
                    time_base: stream.time_base(),
                })
            }
            None => None,
        };

        let audio = match input.streams().best(media::Type::Audio) {
            Some(stream) => {
                let context = codec::context::Context::from_parameters(stream.parameters())?;
                let decoder = context.decoder().audio()?;
                Some(AudioStream {
                    index: stream.index(),
                    decoder,
                    time_base: stream.time_base(),
                })
            }
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            input,
            video,
            audio,
        })
    }

    /// Read a file's metadata into an asset handle without keeping the
    /// decoder around.
    pub fn probe(path: &Path) -> Result<MediaAsset, MediaError> {
        let probed = Self::open(path)?;
        let duration = probed.duration();
        let has_audio = probed.audio.is_some();
        match &probed.video {
            Some(stream) => Ok(MediaAsset::video_file(
                path.to_path_buf(),
                duration,
                Size::new(
                    stream.decoder.width() as f64,
                    stream.decoder.height() as f64,
                ),
                cgmath::SquareMatrix::identity(),
                has_audio,
            )),
            None if has_audio => Ok(MediaAsset::audio_file(path.to_path_buf(), duration)),
            None => Err(MediaError::NoVideoStream(path.to_path_buf())),
        }
    }

    fn duration(&self) -> Seconds {
        self.input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
    }

    fn seek_to(&mut self, at: Seconds) -> Result<(), MediaError> {
        let position = (at * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input.seek(position, ..position)?;
        if let Some(video) = self.video.as_mut() {
            video.decoder.flush();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
        }
        Ok(())
    }

    /// Decode the frame covering `at`, converted to RGBA8.
    pub fn frame_at(&mut self, at: Seconds) -> Result<VideoFrame, MediaError> {
        if self.video.is_none() {
            return Err(MediaError::NoVideoStream(self.path.clone()));
        }
        self.seek_to(at.max(0.0))?;
        trace!(path = %self.path.display(), at, "decoding video frame");

        let path = self.path.clone();
        let Self { input, video, .. } = self;
        let Some(video) = video.as_mut() else {
            return Err(MediaError::NoVideoStream(path));
        };
        let tick = f64::from(video.time_base);

        let mut decoded = frame::Video::empty();
        let mut last: Option<VideoFrame> = None;
        for (stream, packet) in input.packets() {
            if stream.index() != video.index {
                continue;
            }
            video.decoder.send_packet(&packet)?;
            while video.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.timestamp().unwrap_or(0) as f64 * tick;
                let frame = convert_rgba(&mut video.scaler, &decoded, pts)?;
                if pts >= at {
                    return Ok(frame);
                }
                last = Some(frame);
            }
        }
        // Drain the decoder for sources whose last packets were buffered.
        video.decoder.send_eof()?;
        while video.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded.timestamp().unwrap_or(0) as f64 * tick;
            let frame = convert_rgba(&mut video.scaler, &decoded, pts)?;
            if pts >= at {
                return Ok(frame);
            }
            last = Some(frame);
        }
        last.ok_or(MediaError::DecodeExhausted { at })
    }

    /// Decode a source time range into interleaved f32 PCM at the target
    /// rate and channel count. Gaps and early stream ends come back as
    /// silence so the mix arithmetic stays simple.
    pub fn samples(
        &mut self,
        range: TimeRange,
        rate: u32,
        channels: u32,
    ) -> Result<Vec<f32>, MediaError> {
        if self.audio.is_none() {
            return Err(MediaError::NoAudioStream(self.path.clone()));
        }
        self.seek_to(range.start.max(0.0))?;

        let target_len = (range.duration * rate as f64).round() as usize * channels as usize;
        let mut out = vec![0f32; target_len];

        let path = self.path.clone();
        let Self { input, audio, .. } = self;
        let Some(audio) = audio.as_mut() else {
            return Err(MediaError::NoAudioStream(path));
        };
        let tick = f64::from(audio.time_base);

        let mut resampler = resampling::Context::get(
            audio.decoder.format(),
            audio.decoder.channel_layout(),
            audio.decoder.rate(),
            format::Sample::F32(format::sample::Type::Packed),
            ChannelLayout::default(channels as i32),
            rate,
        )?;

        let mut decoded = frame::Audio::empty();
        'packets: for (stream, packet) in input.packets() {
            if stream.index() != audio.index {
                continue;
            }
            audio.decoder.send_packet(&packet)?;
            while audio.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_start = decoded.timestamp().unwrap_or(0) as f64 * tick;
                if frame_start >= range.end() {
                    break 'packets;
                }
                let mut resampled = frame::Audio::empty();
                resampler.run(&decoded, &mut resampled)?;
                mix_into(
                    &mut out,
                    &resampled,
                    frame_start - range.start,
                    rate,
                    channels,
                );
            }
        }
        Ok(out)
    }
}

/// Copy a packed-f32 frame into the output buffer at its sample offset.
fn mix_into(out: &mut [f32], resampled: &frame::Audio, offset: Seconds, rate: u32, channels: u32) {
    let produced = resampled.samples() * channels as usize;
    if produced == 0 {
        return;
    }
    let bytes = &resampled.data(0)[..produced * 4];
    let base = (offset * rate as f64).round() as i64 * channels as i64;
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let index = base + i as i64;
        if index < 0 {
            continue;
        }
        let index = index as usize;
        if index >= out.len() {
            break;
        }
        out[index] = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

fn convert_rgba(
    scaler: &mut scaling::Context,
    decoded: &frame::Video,
    pts: Seconds,
) -> Result<VideoFrame, MediaError> {
    let mut rgba = frame::Video::empty();
    scaler.run(decoded, &mut rgba)?;

    let width = rgba.width();
    let height = rgba.height();
    let stride = rgba.stride(0);
    let row = width as usize * 4;
    let mut data = Vec::with_capacity(row * height as usize);
    let plane = rgba.data(0);
    for y in 0..height as usize {
        data.extend_from_slice(&plane[y * stride..y * stride + row]);
    }
    Ok(VideoFrame {
        data,
        width,
        height,
        pts,
    })
}

/// Per-asset decoder cache serving both real files and synthetic sources.
#[derive(Default)]
pub struct DecoderPool {
    decoders: HashMap<usize, AssetDecoder>,
}

impl DecoderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (and cache) the decoder behind an asset. Synthetic sources need
    /// no decoder; files that fail to open propagate their error.
    pub fn open(&mut self, asset: &MediaAsset) -> Result<(), MediaError> {
        match asset.source() {
            AssetSource::BlankCanvas(_) => Ok(()),
            AssetSource::File(path) => {
                if !self.decoders.contains_key(&asset.key()) {
                    let decoder = AssetDecoder::open(path)?;
                    self.decoders.insert(asset.key(), decoder);
                }
                Ok(())
            }
        }
    }

    pub fn samples(
        &mut self,
        asset: &MediaAsset,
        range: TimeRange,
        rate: u32,
        channels: u32,
    ) -> Result<Vec<f32>, MediaError> {
        match asset.source() {
            AssetSource::BlankCanvas(_) => {
                let len = (range.duration * rate as f64).round() as usize * channels as usize;
                Ok(vec![0f32; len])
            }
            AssetSource::File(path) => {
                self.open(asset)?;
                self.decoders
                    .get_mut(&asset.key())
                    .ok_or_else(|| MediaError::FileNotFound(path.clone()))?
                    .samples(range, rate, channels)
            }
        }
    }
}

impl FrameProvider for DecoderPool {
    fn frame_at(&mut self, asset: &MediaAsset, at: Seconds) -> Result<VideoFrame, MediaError> {
        match asset.source() {
            AssetSource::BlankCanvas(size) => Ok(VideoFrame::black(
                size.width.round() as u32,
                size.height.round() as u32,
                at,
            )),
            AssetSource::File(path) => {
                self.open(asset)?;
                self.decoders
                    .get_mut(&asset.key())
                    .ok_or_else(|| MediaError::FileNotFound(path.clone()))?
                    .frame_at(at)
            }
        }
    }
}
