//! Placement math mapping source frames onto the output canvas.
//!
//! Pure functions: given a track's natural size and stored orientation,
//! compute the affine transform (and, for duet halves, the crop rectangle)
//! that positions it on the fixed story canvas. Nothing here touches pixels.

use cgmath::{Matrix3, Vector2, Vector3};

use crate::core::asset::Size;
use crate::core::model::Point;

/// Sub-pixel slack when comparing frame sizes against the canvas.
const SIZE_EPSILON: f64 = 0.5;

/// Fixed output canvas in pixels, 9:16 portrait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Derive the canvas from the device's point width and pixel scale.
    /// Height is 16:9 of the width, rounded to an even pixel count so the
    /// encoder's chroma subsampling lines up.
    pub fn from_device_width(points: f64, scale: f64) -> Self {
        let width = (points * scale).round();
        let height = (width * 16.0 / 9.0 / 2.0).round() * 2.0;
        Self { width, height }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn pixel_width(&self) -> u32 {
        self.width.round() as u32
    }

    pub fn pixel_height(&self) -> u32 {
        self.height.round() as u32
    }
}

/// Which slot of the canvas a video layer occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// Full-canvas layer (every non-duet mode).
    Standard,
    /// The existing story pinned to the upper half of a duet.
    DuetOrigin,
    /// The new recording occupying the lower half of a duet.
    DuetRecording,
}

/// Axis-aligned crop in the source frame's natural pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Resolved placement of one video track on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub transform: Matrix3<f64>,
    pub crop: Option<CropRect>,
}

/// 2D homogeneous translation.
pub fn translation(tx: f64, ty: f64) -> Matrix3<f64> {
    Matrix3::from_translation(Vector2::new(tx, ty))
}

/// Uniform 2D homogeneous scale.
pub fn uniform_scale(scale: f64) -> Matrix3<f64> {
    Matrix3::from_nonuniform_scale(scale, scale)
}

/// Apply an affine to a point.
pub fn apply(transform: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let v = transform * Vector3::new(x, y, 1.0);
    (v.x, v.y)
}

/// Frame size after the stored orientation transform.
pub fn oriented_size(natural: Size, orientation: &Matrix3<f64>) -> Size {
    let w = orientation.x.x * natural.width + orientation.y.x * natural.height;
    let h = orientation.x.y * natural.width + orientation.y.y * natural.height;
    Size::new(w.abs(), h.abs())
}

/// Compute the transform and optional crop placing a track on the canvas.
///
/// A frame already matching the canvas passes its orientation through
/// untouched. Anything else is scaled uniformly to the canvas width and
/// centered; duet layers are additionally pushed into their half of the
/// canvas and cropped to the matching half of the source frame.
pub fn resolve(
    natural: Size,
    orientation: Matrix3<f64>,
    canvas: &CanvasSize,
    role: LayerRole,
) -> Placement {
    let oriented = oriented_size(natural, &orientation);

    if role == LayerRole::Standard
        && (oriented.width - canvas.width).abs() < SIZE_EPSILON
        && (oriented.height - canvas.height).abs() < SIZE_EPSILON
    {
        return Placement {
            transform: orientation,
            crop: None,
        };
    }

    let scale = canvas.width / oriented.width;
    let tx = (canvas.width - oriented.width * scale) / 2.0;
    let ty = (canvas.height - oriented.height * scale) / 2.0 + vertical_offset(role, canvas);
    let transform = translation(tx, ty) * uniform_scale(scale) * orientation;

    Placement {
        transform,
        crop: crop_for(role, natural),
    }
}

fn vertical_offset(role: LayerRole, canvas: &CanvasSize) -> f64 {
    match role {
        LayerRole::Standard => 0.0,
        LayerRole::DuetOrigin => -canvas.height / 4.0,
        LayerRole::DuetRecording => canvas.height / 4.0,
    }
}

fn crop_for(role: LayerRole, natural: Size) -> Option<CropRect> {
    match role {
        LayerRole::Standard => None,
        // Origin shows the top half of its source, recording the bottom.
        LayerRole::DuetOrigin => Some(CropRect {
            x: 0.0,
            y: 0.0,
            width: natural.width,
            height: natural.height / 2.0,
        }),
        LayerRole::DuetRecording => Some(CropRect {
            x: 0.0,
            y: natural.height / 2.0,
            width: natural.width,
            height: natural.height / 2.0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    const CANVAS: CanvasSize = CanvasSize {
        width: 1080.0,
        height: 1920.0,
    };

    #[test]
    fn test_canvas_from_device_width() {
        let canvas = CanvasSize::from_device_width(393.0, 3.0);
        assert_eq!(canvas.width, 1179.0);
        // 1179 * 16 / 9 = 2096; already even.
        assert_eq!(canvas.height, 2096.0);
        assert_eq!(canvas.pixel_height() % 2, 0);

        let odd = CanvasSize::from_device_width(375.0, 2.0);
        // 750 * 16 / 9 = 1333.33..; rounds to the even 1334.
        assert_eq!(odd.height, 1334.0);
    }

    #[test]
    fn test_matching_frame_passes_orientation_through() {
        let orientation = Matrix3::identity();
        let placement = resolve(
            Size::new(1080.0, 1920.0),
            orientation,
            &CANVAS,
            LayerRole::Standard,
        );
        assert_eq!(placement.transform, orientation);
        assert_eq!(placement.crop, None);
    }

    #[test]
    fn test_smaller_frame_scales_and_centers() {
        let placement = resolve(
            Size::new(540.0, 540.0),
            Matrix3::identity(),
            &CANVAS,
            LayerRole::Standard,
        );
        // Width-fit scale of 2, so corners land centered vertically.
        let (x0, y0) = apply(&placement.transform, 0.0, 0.0);
        let (x1, y1) = apply(&placement.transform, 540.0, 540.0);
        assert_eq!((x0, x1), (0.0, 1080.0));
        assert_eq!(y0, (1920.0 - 1080.0) / 2.0);
        assert_eq!(y1, y0 + 1080.0);
    }

    #[test]
    fn test_duet_roles_split_the_canvas() {
        let natural = Size::new(1080.0, 1920.0);
        let origin = resolve(natural, Matrix3::identity(), &CANVAS, LayerRole::DuetOrigin);
        let recording = resolve(
            natural,
            Matrix3::identity(),
            &CANVAS,
            LayerRole::DuetRecording,
        );

        let (_, origin_top) = apply(&origin.transform, 0.0, 0.0);
        let (_, recording_top) = apply(&recording.transform, 0.0, 0.0);
        assert_eq!(origin_top, -1920.0 / 4.0);
        assert_eq!(recording_top, 1920.0 / 4.0);

        // Origin keeps the source's top half, recording its bottom half.
        assert_eq!(
            origin.crop,
            Some(CropRect {
                x: 0.0,
                y: 0.0,
                width: 1080.0,
                height: 960.0
            })
        );
        assert_eq!(
            recording.crop,
            Some(CropRect {
                x: 0.0,
                y: 960.0,
                width: 1080.0,
                height: 960.0
            })
        );
    }

    #[test]
    fn test_oriented_size_quarter_turn() {
        // 90-degree rotation swaps the frame's axes.
        let quarter = Matrix3::from_angle_z(cgmath::Rad(std::f64::consts::FRAC_PI_2));
        let oriented = oriented_size(Size::new(1920.0, 1080.0), &quarter);
        assert!((oriented.width - 1080.0).abs() < 1e-6);
        assert!((oriented.height - 1920.0).abs() < 1e-6);
    }

    #[test]
    fn test_crop_contains() {
        let crop = CropRect {
            x: 0.0,
            y: 960.0,
            width: 1080.0,
            height: 960.0,
        };
        assert!(crop.contains(0.0, 960.0));
        assert!(!crop.contains(0.0, 959.0));
        assert!(!crop.contains(1080.0, 1000.0));
    }
}
