//! Single-frame capture from an export composition.

use image::RgbaImage;

use crate::compose::plan::ExportComposition;
use crate::core::time::Seconds;
use crate::export::pipeline::{ExportError, RenderSettings};
use crate::media::compositor::FrameCompositor;
use crate::media::decoder::{DecoderPool, FrameProvider};

/// Decode exactly one composed frame at `at`, clamped into the
/// composition's duration. No state is retained between calls.
pub fn capture_frame<P: FrameProvider>(
    plan: &ExportComposition,
    at: Seconds,
    settings: &RenderSettings,
    provider: P,
) -> Result<RgbaImage, ExportError> {
    let clamped = at.clamp(0.0, plan.composition.duration.max(0.0));
    let mut compositor = FrameCompositor::new(
        plan.clone(),
        settings.canvas.pixel_width(),
        settings.canvas.pixel_height(),
        provider,
    );
    let frame = compositor.composite(clamped).map_err(ExportError::Read)?;
    Ok(
        RgbaImage::from_raw(frame.width, frame.height, frame.data)
            .expect("composited frame matches canvas dimensions"),
    )
}

/// Thumbnail capture decoding through the real media backend.
pub fn capture_story_frame(
    plan: &ExportComposition,
    at: Seconds,
    settings: &RenderSettings,
) -> Result<RgbaImage, ExportError> {
    capture_frame(plan, at, settings, DecoderPool::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::builder::BuildInputs;
    use crate::compose::export::build_export;
    use crate::compose::text::OverlayRenderer;
    use crate::compose::transform::CanvasSize;
    use crate::core::asset::{MediaAsset, Size};
    use crate::core::model::{CompositionMode, MediaSnapshot, TextSpec, VideoClip};
    use crate::core::time::TimeRange;

    struct NoText;

    impl OverlayRenderer for NoText {
        fn rasterize(&self, spec: &TextSpec) -> RgbaImage {
            RgbaImage::from_pixel(1, 1, image::Rgba(spec.color))
        }
    }

    fn settings() -> RenderSettings {
        RenderSettings {
            canvas: CanvasSize::new(4.0, 8.0),
            ..RenderSettings::default()
        }
    }

    #[test]
    fn test_capture_is_single_shot() {
        let mut clip = VideoClip::new(MediaAsset::blank_canvas(Size::new(4.0, 8.0)));
        clip.trim_range = Some(TimeRange::new(0.0, 2.0));
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
        let plan = build_export(&inputs, &[], &NoText);

        let image = capture_frame(&plan, 1.0, &settings(), DecoderPool::new()).unwrap();
        assert_eq!(image.dimensions(), (4, 8));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);

        // Out-of-range timestamps clamp instead of failing.
        let clamped = capture_frame(&plan, 99.0, &settings(), DecoderPool::new()).unwrap();
        assert_eq!(clamped.dimensions(), (4, 8));
    }
}
