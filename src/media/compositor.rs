//! Software compositor evaluating a render plan at a timestamp.
//!
//! For each requested time it samples every layer's opacity keyframes, maps
//! the timeline position through the covering segment into source time,
//! fetches the decoded frame, and draws it through the layer's affine and
//! crop onto the canvas. Overlay stills (gradient, rasterized text) are
//! drawn on top through the same inverse-sampling path.

use cgmath::{Matrix3, SquareMatrix};
use image::RgbaImage;
use tracing::trace;

use crate::compose::plan::{ExportComposition, LayerInstruction, OverlayStill};
use crate::compose::transform::translation;
use crate::core::model::Gradient;
use crate::core::time::Seconds;
use crate::media::decoder::{FrameProvider, MediaError, VideoFrame};

/// Minimum sampled opacity for a layer to be drawn at all.
const VISIBLE_THRESHOLD: f32 = 0.001;

/// Composites an export composition's layers into output frames.
pub struct FrameCompositor<P> {
    plan: ExportComposition,
    width: u32,
    height: u32,
    provider: P,
}

impl<P: FrameProvider> FrameCompositor<P> {
    pub fn new(plan: ExportComposition, width: u32, height: u32, provider: P) -> Self {
        Self {
            plan,
            width,
            height,
            provider,
        }
    }

    pub fn duration(&self) -> Seconds {
        self.plan.composition.duration
    }

    /// Render the composed frame at `at`.
    pub fn composite(&mut self, at: Seconds) -> Result<VideoFrame, MediaError> {
        let gradient = self.plan.overlay.as_ref().and_then(|o| o.gradient);
        let mut canvas = base_canvas(self.width, self.height, gradient);

        // Later instructions sit below earlier ones; paint bottom-up.
        for layer in self.plan.instruction.layers.iter().rev() {
            let opacity = layer.opacity_at(at);
            if opacity < VISIBLE_THRESHOLD {
                continue;
            }
            let Some(track) = self.plan.composition.track(layer.track) else {
                continue;
            };
            let Some(segment) = track.segment_at(at) else {
                trace!(track = layer.track, at, "no segment under visible layer");
                continue;
            };
            let frame = self.provider.frame_at(&track.asset, segment.source_time(at))?;
            draw_layer(&mut canvas, &frame, layer, opacity);
        }

        if let Some(overlay) = &self.plan.overlay {
            for still in &overlay.stills {
                let alpha = still
                    .visibility
                    .as_ref()
                    .map(|ramp| ramp.value_at(at))
                    .unwrap_or(1.0);
                if alpha < VISIBLE_THRESHOLD {
                    continue;
                }
                draw_still(&mut canvas, still, alpha);
            }
        }

        Ok(VideoFrame {
            data: canvas.into_raw(),
            width: self.width,
            height: self.height,
            pts: at,
        })
    }
}

/// Solid black canvas, or the text-mode gradient when one is set.
fn base_canvas(width: u32, height: u32, gradient: Option<Gradient>) -> RgbaImage {
    match gradient {
        None => RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255])),
        Some(gradient) => {
            let mut canvas = RgbaImage::new(width, height);
            for y in 0..height {
                let t = if height > 1 {
                    y as f32 / (height - 1) as f32
                } else {
                    0.0
                };
                let mut row = [0u8; 4];
                for (i, channel) in row.iter_mut().enumerate() {
                    let top = gradient.top[i] as f32;
                    let bottom = gradient.bottom[i] as f32;
                    *channel = (top + (bottom - top) * t).round() as u8;
                }
                for x in 0..width {
                    canvas.put_pixel(x, y, image::Rgba(row));
                }
            }
            canvas
        }
    }
}

/// Inverse-sample a source frame through a layer's affine and crop.
fn draw_layer(canvas: &mut RgbaImage, frame: &VideoFrame, layer: &LayerInstruction, opacity: f32) {
    let Some(inverse) = layer.transform.invert() else {
        trace!(track = layer.track, "degenerate layer transform");
        return;
    };
    let sample = |x: f64, y: f64| -> Option<[u8; 4]> {
        if let Some(crop) = &layer.crop {
            if !crop.contains(x, y) {
                return None;
            }
        }
        sample_frame(frame, x, y)
    };
    blend_through(canvas, &inverse, opacity, sample);
}

/// Draw an overlay still centered on its canvas point, scaled/rotated by
/// its stored transform.
fn draw_still(canvas: &mut RgbaImage, still: &OverlayStill, alpha: f32) {
    let (width, height) = still.image.dimensions();
    let placed = translation(still.center.x, still.center.y)
        * still.transform
        * translation(-(width as f64) / 2.0, -(height as f64) / 2.0);
    let Some(inverse) = placed.invert() else {
        return;
    };
    let sample = |x: f64, y: f64| -> Option<[u8; 4]> {
        if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
            return None;
        }
        Some(still.image.get_pixel(x as u32, y as u32).0)
    };
    blend_through(canvas, &inverse, alpha, sample);
}

/// Walk every canvas pixel, map it through the inverse transform, and blend
/// whatever the sampler returns.
fn blend_through(
    canvas: &mut RgbaImage,
    inverse: &Matrix3<f64>,
    opacity: f32,
    sample: impl Fn(f64, f64) -> Option<[u8; 4]>,
) {
    let (a, b) = (inverse.x.x, inverse.x.y);
    let (c, d) = (inverse.y.x, inverse.y.y);
    let (tx, ty) = (inverse.z.x, inverse.z.y);
    let (width, height) = canvas.dimensions();

    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 + 0.5;
            let dy = y as f64 + 0.5;
            let sx = a * dx + c * dy + tx;
            let sy = b * dx + d * dy + ty;
            let Some(source) = sample(sx, sy) else {
                continue;
            };
            let alpha = (source[3] as f32 / 255.0) * opacity;
            if alpha <= 0.0 {
                continue;
            }
            let pixel = canvas.get_pixel_mut(x, y);
            for i in 0..3 {
                let blended = source[i] as f32 * alpha + pixel[i] as f32 * (1.0 - alpha);
                pixel[i] = blended.round().min(255.0) as u8;
            }
            pixel[3] = 255;
        }
    }
}

/// Nearest-neighbour sample in natural pixel coordinates.
fn sample_frame(frame: &VideoFrame, x: f64, y: f64) -> Option<[u8; 4]> {
    if x < 0.0 || y < 0.0 || x >= frame.width as f64 || y >= frame.height as f64 {
        return None;
    }
    let index = ((y as u32 * frame.width + x as u32) * 4) as usize;
    frame.data.get(index..index + 4).map(|p| [p[0], p[1], p[2], p[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Matrix3;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use crate::compose::builder::BuildInputs;
    use crate::compose::export::build_export;
    use crate::compose::plan::{OverlayGraph, VisibilityRamp};
    use crate::compose::text::OverlayRenderer;
    use crate::compose::transform::CanvasSize;
    use crate::core::asset::{MediaAsset, Size};
    use crate::core::model::{CompositionMode, MediaSnapshot, Point, TextSpec, VideoClip};
    use crate::core::time::TimeRange;

    const W: u32 = 4;
    const H: u32 = 8;

    /// Serves a solid color per asset, keyed by reference identity.
    struct SolidProvider(HashMap<usize, [u8; 4]>);

    impl FrameProvider for SolidProvider {
        fn frame_at(&mut self, asset: &MediaAsset, at: Seconds) -> Result<VideoFrame, MediaError> {
            let color = self.0[&asset.key()];
            let mut frame = VideoFrame::black(W, H, at);
            for pixel in frame.data.chunks_exact_mut(4) {
                pixel.copy_from_slice(&color);
            }
            Ok(frame)
        }
    }

    struct NoText;

    impl OverlayRenderer for NoText {
        fn rasterize(&self, spec: &TextSpec) -> RgbaImage {
            RgbaImage::from_pixel(1, 1, image::Rgba(spec.color))
        }
    }

    fn canvas_asset(seconds: Seconds) -> MediaAsset {
        MediaAsset::video_file(
            PathBuf::from("clip.mp4"),
            seconds,
            Size::new(W as f64, H as f64),
            Matrix3::identity(),
            false,
        )
    }

    fn plan_for(snapshot: &MediaSnapshot) -> ExportComposition {
        let inputs = BuildInputs {
            snapshot,
            mode: CompositionMode::Recorded,
            canvas: CanvasSize::new(W as f64, H as f64),
            duet_origin: None,
            original_volume: 1.0,
            added_volume: 1.0,
            gradient: None,
        };
        build_export(&inputs, &[], &NoText)
    }

    #[test]
    fn test_opacity_toggles_select_the_covering_clip() {
        let red = canvas_asset(2.0);
        let blue = canvas_asset(3.0);
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(VideoClip::new(red.clone()));
        snapshot.clips.push(VideoClip::new(blue.clone()));
        snapshot.refresh_output_window();

        let provider = SolidProvider(HashMap::from([
            (red.key(), [255, 0, 0, 255]),
            (blue.key(), [0, 0, 255, 255]),
        ]));
        let mut compositor = FrameCompositor::new(plan_for(&snapshot), W, H, provider);

        let first = compositor.composite(1.0).unwrap();
        assert_eq!(&first.data[..4], &[255, 0, 0, 255]);

        // At the boundary the first clip's opacity drops to zero.
        let second = compositor.composite(2.0).unwrap();
        assert_eq!(&second.data[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_gap_renders_black() {
        let red = canvas_asset(2.0);
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(VideoClip::new(red.clone()));
        snapshot.refresh_output_window();

        let provider = SolidProvider(HashMap::from([(red.key(), [255, 0, 0, 255])]));
        let mut compositor = FrameCompositor::new(plan_for(&snapshot), W, H, provider);

        let beyond = compositor.composite(5.0).unwrap();
        assert_eq!(&beyond.data[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_gradient_base_canvas() {
        let gradient = Gradient {
            top: [10, 20, 30, 255],
            bottom: [110, 120, 130, 255],
        };
        let canvas = base_canvas(2, 2, Some(gradient));
        assert_eq!(canvas.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(canvas.get_pixel(0, 1).0, [110, 120, 130, 255]);
    }

    #[test]
    fn test_still_honors_visibility_ramp() {
        let red = canvas_asset(4.0);
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(VideoClip::new(red.clone()));
        snapshot.refresh_output_window();

        let mut plan = plan_for(&snapshot);
        plan.overlay = Some(OverlayGraph {
            gradient: None,
            stills: vec![OverlayStill {
                image: RgbaImage::from_pixel(2, 2, image::Rgba([0, 255, 0, 255])),
                center: Point::new(W as f64 / 2.0, H as f64 / 2.0),
                transform: Matrix3::identity(),
                visibility: Some(VisibilityRamp::for_range(TimeRange::new(1.0, 2.0))),
            }],
        });

        let provider = SolidProvider(HashMap::from([(red.key(), [255, 0, 0, 255])]));
        let mut compositor = FrameCompositor::new(plan, W, H, provider);

        // Hidden before the range: the clip shows through at the center.
        let before = compositor.composite(0.5).unwrap();
        let center = ((H / 2) * W + W / 2) as usize * 4;
        assert_eq!(&before.data[center..center + 4], &[255, 0, 0, 255]);

        // Fully shown in the middle of the range.
        let during = compositor.composite(2.0).unwrap();
        assert_eq!(&during.data[center..center + 4], &[0, 255, 0, 255]);
    }
}
