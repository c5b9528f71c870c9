//! RGBA raster that strokes are painted onto.

use std::path::Path;

use kurbo::{ParamCurve, Point, QuadBez};
use peniko::Color;
use thiserror::Error;

/// Raster export errors.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("PNG encoding failed: {0}")]
    Encoding(#[from] png::EncodingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for surface export.
pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Parse a `#RRGGBB` color.
pub fn parse_color(s: &str) -> Option<Color> {
    let hex = s.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::from_rgba8(r, g, b, 255))
}

/// A fixed-size drawing surface.
///
/// Coverage is binary: a pixel is either painted with the stroke color or left
/// alone. Painting the same segment twice therefore yields the same pixels,
/// which keeps a locally drawn stroke identical to its replay.
#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    background: Color,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        let mut surface = Self {
            width,
            height,
            background,
            pixels: vec![0; width as usize * height as usize * 4],
        };
        surface.fill(background);
        surface
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Raw RGBA8 pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA of one pixel, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.pixels[idx..idx + 4]);
        Some(rgba)
    }

    /// Paint every pixel with `color`.
    pub fn fill(&mut self, color: Color) {
        let c = color.to_rgba8();
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&[c.r, c.g, c.b, c.a]);
        }
    }

    /// Repaint with the background color.
    pub fn clear(&mut self) {
        self.fill(self.background);
    }

    /// Stroke one quadratic segment with round caps.
    pub fn stroke(&mut self, seg: &QuadBez, color: Color, width: f64) {
        let polygon = seg.p0.distance(seg.p1) + seg.p1.distance(seg.p2);
        let steps = ((polygon / 2.0).ceil() as usize).clamp(1, 256);

        let mut prev = seg.eval(0.0);
        for step in 1..=steps {
            let next = seg.eval(step as f64 / steps as f64);
            self.stroke_line(prev, next, color, width);
            prev = next;
        }
    }

    /// Paint every pixel whose center lies within `width / 2` of the line `a..b`.
    fn stroke_line(&mut self, a: Point, b: Point, color: Color, width: f64) {
        let radius = (width / 2.0).max(0.5);
        let c = color.to_rgba8();

        let min_x = (a.x.min(b.x) - radius).floor().max(0.0);
        let min_y = (a.y.min(b.y) - radius).floor().max(0.0);
        let max_x = (a.x.max(b.x) + radius).ceil().min(self.width as f64 - 1.0);
        let max_y = (a.y.max(b.y) + radius).ceil().min(self.height as f64 - 1.0);
        if max_x < min_x || max_y < min_y {
            return;
        }

        for y in min_y as u32..=max_y as u32 {
            for x in min_x as u32..=max_x as u32 {
                let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                if distance_to_line(center, a, b) <= radius {
                    let idx = (y as usize * self.width as usize + x as usize) * 4;
                    self.pixels[idx..idx + 4].copy_from_slice(&[c.r, c.g, c.b, c.a]);
                }
            }
        }
    }

    /// Encode the surface as PNG.
    pub fn encode_png(&self) -> SurfaceResult<Vec<u8>> {
        let mut png_data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png_data, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);

            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
        }
        Ok(png_data)
    }

    /// Encode and write to `path`.
    pub fn save_png(&self, path: impl AsRef<Path>) -> SurfaceResult<()> {
        let data = self.encode_png()?;
        std::fs::write(path.as_ref(), data)?;
        log::info!("Exported whiteboard to {}", path.as_ref().display());
        Ok(())
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.pixels == other.pixels
    }
}

fn distance_to_line(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black() -> Color {
        Color::from_rgba8(0, 0, 0, 255)
    }

    #[test]
    fn test_parse_color() {
        let c = parse_color("#22C55E").unwrap().to_rgba8();
        assert_eq!((c.r, c.g, c.b, c.a), (0x22, 0xC5, 0x5E, 255));
        assert!(parse_color("22C55E").is_none());
        assert!(parse_color("#fff").is_none());
        assert!(parse_color("#GGGGGG").is_none());
    }

    #[test]
    fn test_new_surface_is_background() {
        let surface = Surface::new(4, 3, black());
        assert_eq!(surface.pixels().len(), 4 * 3 * 4);
        assert_eq!(surface.pixel(3, 2), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(4, 0), None);
    }

    #[test]
    fn test_stroke_paints_along_segment() {
        let mut surface = Surface::new(20, 20, black());
        let white = Color::from_rgba8(255, 255, 255, 255);
        let seg = QuadBez::new(
            Point::new(2.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(18.0, 10.0),
        );
        surface.stroke(&seg, white, 3.0);

        assert_eq!(surface.pixel(10, 10), Some([255, 255, 255, 255]));
        assert_eq!(surface.pixel(10, 2), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_stroke_is_idempotent() {
        let mut surface = Surface::new(30, 30, black());
        let red = Color::from_rgba8(220, 38, 38, 255);
        let seg = QuadBez::new(
            Point::new(1.0, 1.0),
            Point::new(25.0, 3.0),
            Point::new(12.0, 28.0),
        );
        surface.stroke(&seg, red, 5.0);
        let once = surface.clone();
        surface.stroke(&seg, red, 5.0);
        assert_eq!(surface, once);
    }

    #[test]
    fn test_stroke_outside_is_clipped() {
        let mut surface = Surface::new(10, 10, black());
        let seg = QuadBez::new(
            Point::new(-50.0, -50.0),
            Point::new(-40.0, -40.0),
            Point::new(-30.0, -30.0),
        );
        surface.stroke(&seg, Color::from_rgba8(255, 0, 0, 255), 3.0);
        assert_eq!(surface, Surface::new(10, 10, black()));
    }

    #[test]
    fn test_png_export() {
        let surface = Surface::new(8, 8, black());
        let png = surface.encode_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.png");
        surface.save_png(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), png);
    }
}
