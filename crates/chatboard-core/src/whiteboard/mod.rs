//! Shared whiteboard: local stroke capture, remote replay and clears.

pub mod smooth;
pub mod surface;

pub use surface::{Surface, SurfaceError, SurfaceResult, parse_color};

use kurbo::Point;
use peniko::Color;

use crate::protocol::{DrawData, Tool};

/// Default stroke color.
pub const DEFAULT_COLOR: &str = "#22C55E";
/// Default stroke width.
pub const DEFAULT_LINE_WIDTH: f64 = 3.0;
/// Surface background, also the eraser color.
pub const BACKGROUND: &str = "#1F2937";
/// Eraser strokes are this many times wider than the brush width.
pub const ERASER_SCALE: f64 = 3.0;
/// Colors offered by the color picker.
pub const PALETTE: [&str; 8] = [
    "#22C55E", "#DC2626", "#FFFFFF", "#FACC15", "#3B82F6", "#A855F7", "#F97316", "#EC4899",
];

fn background_color() -> Color {
    Color::from_rgba8(0x1F, 0x29, 0x37, 255)
}

/// Current brush settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            width: DEFAULT_LINE_WIDTH,
            tool: Tool::Pen,
        }
    }
}

/// Captures local strokes and replays remote ones onto a [`Surface`].
#[derive(Debug, Clone)]
pub struct WhiteboardController {
    surface: Surface,
    brush: Brush,
    /// Stroke being captured between pointer-down and pointer-up.
    capture: Option<DrawData>,
}

impl WhiteboardController {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Surface::new(width, height, background_color()),
            brush: Brush::default(),
            capture: None,
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.brush.color = color.into();
    }

    pub fn set_width(&mut self, width: f64) {
        self.brush.width = width;
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.brush.tool = tool;
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Begin a stroke at `point`.
    pub fn pointer_down(&mut self, point: Point) {
        self.capture = Some(DrawData {
            points: vec![point],
            color: self.brush.color.clone(),
            line_width: self.brush.width,
            tool: self.brush.tool,
        });
    }

    /// Extend the current stroke and render the segment that just became final.
    pub fn pointer_move(&mut self, point: Point) {
        let Some(stroke) = self.capture.as_mut() else {
            return;
        };
        stroke.points.push(point);

        let n = stroke.points.len();
        if let Some(seg) = smooth::segment(&stroke.points, n.saturating_sub(2)) {
            let (color, width) = paint_style(stroke);
            self.surface.stroke(&seg, color, width);
        }
    }

    /// End the stroke. Returns the stroke to broadcast when it has at least
    /// two points.
    pub fn pointer_up(&mut self) -> Option<DrawData> {
        let stroke = self.capture.take()?;
        if stroke.points.len() < 2 {
            return None;
        }
        if let Some(seg) = smooth::tail(&stroke.points) {
            let (color, width) = paint_style(&stroke);
            self.surface.stroke(&seg, color, width);
        }
        log::debug!("Finished stroke with {} points", stroke.points.len());
        Some(stroke)
    }

    /// Leaving the canvas ends the stroke like a pointer-up.
    pub fn pointer_leave(&mut self) -> Option<DrawData> {
        self.pointer_up()
    }

    /// Replay a stroke received from another participant.
    pub fn apply_remote(&mut self, draw: &DrawData) {
        if draw.points.len() < 2 {
            log::debug!("Ignoring remote stroke with {} points", draw.points.len());
            return;
        }
        let (color, width) = paint_style(draw);
        for seg in smooth::segments(&draw.points) {
            self.surface.stroke(&seg, color, width);
        }
    }

    /// Wipe the surface. Any stroke in progress is dropped.
    pub fn clear(&mut self) {
        self.capture = None;
        self.surface.clear();
    }

    /// Remote clears repaint the surface without touching a stroke in progress.
    pub fn apply_remote_clear(&mut self) {
        self.surface.clear();
    }

    pub fn export_png(&self) -> SurfaceResult<Vec<u8>> {
        self.surface.encode_png()
    }
}

fn paint_style(draw: &DrawData) -> (Color, f64) {
    match draw.tool {
        Tool::Eraser => (background_color(), draw.line_width * ERASER_SCALE),
        Tool::Pen => {
            let color = parse_color(&draw.color).unwrap_or_else(|| {
                log::warn!("Invalid stroke color {:?}, using default", draw.color);
                Color::from_rgba8(0x22, 0xC5, 0x5E, 255)
            });
            (color, draw.line_width)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: [u8; 4] = [0x1F, 0x29, 0x37, 255];
    const GREEN: [u8; 4] = [0x22, 0xC5, 0x5E, 255];

    fn gesture(board: &mut WhiteboardController, points: &[(f64, f64)]) -> Option<DrawData> {
        let mut iter = points.iter().map(|&(x, y)| Point::new(x, y));
        board.pointer_down(iter.next()?);
        for p in iter {
            board.pointer_move(p);
        }
        board.pointer_up()
    }

    #[test]
    fn test_background_matches_constant() {
        let surface = Surface::new(1, 1, parse_color(BACKGROUND).unwrap());
        assert_eq!(surface.pixel(0, 0), Some(BG));
        assert_eq!(WhiteboardController::new(1, 1).surface(), &surface);
        assert_eq!(PALETTE[0], DEFAULT_COLOR);
    }

    #[test]
    fn test_five_point_stroke_broadcasts_and_draws() {
        let mut board = WhiteboardController::new(100, 100);
        let points = [(10.0, 10.0), (20.0, 15.0), (30.0, 20.0), (40.0, 25.0), (50.0, 30.0)];
        let draw = gesture(&mut board, &points).unwrap();

        let expected: Vec<Point> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        assert_eq!(draw.points, expected);
        assert_eq!(draw.color, "#22C55E");
        assert_eq!(draw.line_width, 3.0);
        assert_eq!(draw.tool, Tool::Pen);

        assert_eq!(board.surface().pixel(30, 20), Some(GREEN));
        assert_eq!(board.surface().pixel(50, 30), Some(GREEN));
        assert_eq!(board.surface().pixel(90, 90), Some(BG));
        assert!(!board.is_capturing());
    }

    #[test]
    fn test_single_point_broadcasts_nothing() {
        let mut board = WhiteboardController::new(20, 20);
        assert!(gesture(&mut board, &[(5.0, 5.0)]).is_none());
        assert!(board.pointer_up().is_none());
    }

    #[test]
    fn test_live_drawing_matches_replay() {
        let points = [(5.0, 5.0), (40.0, 8.0), (22.0, 50.0), (70.0, 60.0), (10.0, 90.0), (95.0, 3.0)];

        let mut local = WhiteboardController::new(100, 100);
        local.set_color("#FACC15");
        local.set_width(6.0);
        let draw = gesture(&mut local, &points).unwrap();

        let mut remote = WhiteboardController::new(100, 100);
        remote.apply_remote(&draw);
        assert_eq!(local.surface(), remote.surface());

        let frame = crate::protocol::ClientMessage::WhiteboardDraw {
            username: "alice".to_string(),
            draw_data: draw.clone(),
        }
        .to_json()
        .unwrap();
        let decoded = crate::protocol::Event::from_json(&frame).unwrap();
        let mut replayed = WhiteboardController::new(100, 100);
        match decoded.body {
            crate::protocol::EventBody::WhiteboardDraw { draw, .. } => replayed.apply_remote(&draw),
            other => panic!("Wrong body: {:?}", other),
        }
        assert_eq!(replayed.surface(), remote.surface());
    }

    #[test]
    fn test_eraser_paints_background_wider() {
        let mut board = WhiteboardController::new(60, 60);
        board.set_width(10.0);
        gesture(&mut board, &[(5.0, 30.0), (55.0, 30.0)]).unwrap();
        assert_ne!(board.surface().pixel(30, 30), Some(BG));

        board.set_tool(Tool::Eraser);
        let draw = gesture(&mut board, &[(5.0, 30.0), (55.0, 30.0)]).unwrap();
        assert_eq!(draw.tool, Tool::Eraser);
        assert_eq!(draw.line_width, 10.0);
        assert_eq!(board.surface(), WhiteboardController::new(60, 60).surface());
    }

    #[test]
    fn test_remote_short_stroke_ignored() {
        let mut board = WhiteboardController::new(20, 20);
        board.apply_remote(&DrawData {
            points: vec![Point::new(10.0, 10.0)],
            color: DEFAULT_COLOR.to_string(),
            line_width: 3.0,
            tool: Tool::Pen,
        });
        assert_eq!(board.surface(), WhiteboardController::new(20, 20).surface());
    }

    #[test]
    fn test_clear_repaints_background() {
        let mut board = WhiteboardController::new(40, 40);
        gesture(&mut board, &[(0.0, 0.0), (39.0, 39.0)]).unwrap();
        board.apply_remote_clear();
        assert_eq!(board.surface(), WhiteboardController::new(40, 40).surface());

        board.pointer_down(Point::new(1.0, 1.0));
        board.clear();
        assert!(!board.is_capturing());
    }
}
