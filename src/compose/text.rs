//! Text overlay rasterization.
//!
//! Overlays are burned into the export as still images: the composer
//! rasterizes each overlay's content exactly once, sized to its own bounding
//! box, and the compositor then places that image like any other layer.

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};

use crate::compose::plan::ComposeError;
use crate::core::model::TextSpec;

/// Turns overlay content into a still image.
pub trait OverlayRenderer {
    fn rasterize(&self, spec: &TextSpec) -> RgbaImage;
}

/// Fontdue-backed renderer drawing glyph coverage into an RGBA still.
pub struct FontOverlayRenderer {
    font: Font,
}

impl FontOverlayRenderer {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ComposeError> {
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|err| ComposeError::BadFont(err.to_string()))?;
        Ok(Self { font })
    }
}

impl OverlayRenderer for FontOverlayRenderer {
    fn rasterize(&self, spec: &TextSpec) -> RgbaImage {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings::default());
        layout.append(
            std::slice::from_ref(&self.font),
            &TextStyle::new(&spec.text, spec.font_size, 0),
        );

        // Tight bounding box over the laid-out glyphs.
        let mut width = 0f32;
        let mut height = 0f32;
        for glyph in layout.glyphs() {
            width = width.max(glyph.x + glyph.width as f32);
            height = height.max(glyph.y + glyph.height as f32);
        }
        let width = (width.ceil() as u32).max(1);
        let height = (height.ceil() as u32).max(1);
        let mut image = RgbaImage::new(width, height);

        let [r, g, b, a] = spec.color;
        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let (metrics, coverage) = self.font.rasterize_config(glyph.key);
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let mask = coverage[row * metrics.width + col];
                    if mask == 0 {
                        continue;
                    }
                    let x = glyph.x as i32 + col as i32;
                    let y = glyph.y as i32 + row as i32;
                    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                        continue;
                    }
                    let alpha = (mask as u16 * a as u16 / 255) as u8;
                    let pixel = image.get_pixel_mut(x as u32, y as u32);
                    // Overlapping glyph edges keep the stronger coverage.
                    if alpha > pixel[3] {
                        *pixel = Rgba([r, g, b, alpha]);
                    }
                }
            }
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_font_bytes_are_rejected() {
        assert!(matches!(
            FontOverlayRenderer::from_bytes(&[0u8; 16]),
            Err(ComposeError::BadFont(_))
        ));
    }
}
