//! Shell command parsing.

use std::path::PathBuf;
use std::time::Duration;

use chatboard_core::whiteboard::{PALETTE, parse_color};
use kurbo::Point;
use thiserror::Error;

/// Command parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: /{0}")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid point `{0}`, expected x,y")]
    InvalidPoint(String),
    #[error("Invalid color `{0}`, expected #RRGGBB")]
    InvalidColor(String),
    #[error("Invalid number `{0}`")]
    InvalidNumber(String),
}

/// One line of shell input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Plain text: send as a chat message.
    Say(String),
    /// Replay a pointer gesture through the given points.
    Draw(Vec<Point>),
    Pen,
    Eraser,
    Color(String),
    /// List the preset colors.
    Palette,
    Width(f64),
    Clear,
    Export(PathBuf),
    Upload(PathBuf),
    Voice { path: PathBuf, duration: Duration },
    Users,
    Reconnect,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <text>                 send a chat message
  /draw x,y x,y ...      draw a stroke through the points
  /pen | /eraser         select the drawing tool
  /color #RRGGBB | 1-8   set the stroke color, by hex or palette slot
  /palette               list the palette slots
  /width <n>             set the stroke width
  /clear                 clear the whiteboard for everyone
  /export <file.png>     save the whiteboard as PNG
  /upload <path>         share a file
  /voice <path> <secs>   share a recorded voice clip
  /users                 list online users
  /reconnect             join again after the connection was lost
  /quit                  leave";

/// Parse a line of input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match (name, args.as_slice()) {
        ("draw", points) if !points.is_empty() => Command::Draw(
            points
                .iter()
                .map(|p| parse_point(p))
                .collect::<Result<_, _>>()?,
        ),
        ("draw", _) => return Err(CommandError::Usage("/draw x,y x,y ...")),
        ("pen", []) => Command::Pen,
        ("eraser", []) => Command::Eraser,
        ("color", [color]) => Command::Color(resolve_color(color)?),
        ("color", _) => return Err(CommandError::Usage("/color #RRGGBB | /color 1-8")),
        ("palette", []) => Command::Palette,
        ("width", [width]) => {
            let width = parse_number(width)?;
            if width <= 0.0 {
                return Err(CommandError::InvalidNumber(width.to_string()));
            }
            Command::Width(width)
        }
        ("width", _) => return Err(CommandError::Usage("/width <n>")),
        ("clear", []) => Command::Clear,
        ("export", [path]) => Command::Export(PathBuf::from(path)),
        ("export", _) => return Err(CommandError::Usage("/export <file.png>")),
        ("upload", [path]) => Command::Upload(PathBuf::from(path)),
        ("upload", _) => return Err(CommandError::Usage("/upload <path>")),
        ("voice", [path, secs]) => {
            let secs = parse_number(secs)?;
            if secs < 0.0 {
                return Err(CommandError::InvalidNumber(secs.to_string()));
            }
            Command::Voice {
                path: PathBuf::from(path),
                duration: Duration::from_secs_f64(secs),
            }
        }
        ("voice", _) => return Err(CommandError::Usage("/voice <path> <secs>")),
        ("users", []) => Command::Users,
        ("reconnect", []) => Command::Reconnect,
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// A `#RRGGBB` hex color, or a 1-based palette slot.
fn resolve_color(arg: &str) -> Result<String, CommandError> {
    if let Ok(slot) = arg.parse::<usize>() {
        return slot
            .checked_sub(1)
            .and_then(|i| PALETTE.get(i))
            .map(|color| color.to_string())
            .ok_or_else(|| CommandError::InvalidColor(arg.to_string()));
    }
    if parse_color(arg).is_none() {
        return Err(CommandError::InvalidColor(arg.to_string()));
    }
    Ok(arg.to_uppercase())
}

fn parse_point(s: &str) -> Result<Point, CommandError> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| CommandError::InvalidPoint(s.to_string()))?;
    match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) if x.is_finite() && y.is_finite() => Ok(Point::new(x, y)),
        _ => Err(CommandError::InvalidPoint(s.to_string())),
    }
}

fn parse_number(s: &str) -> Result<f64, CommandError> {
    s.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CommandError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            parse_command("  hello there "),
            Ok(Some(Command::Say("hello there".to_string())))
        );
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn test_draw_points() {
        assert_eq!(
            parse_command("/draw 1,2 3.5,4"),
            Ok(Some(Command::Draw(vec![
                Point::new(1.0, 2.0),
                Point::new(3.5, 4.0)
            ])))
        );
        assert_eq!(
            parse_command("/draw 1;2"),
            Err(CommandError::InvalidPoint("1;2".to_string()))
        );
        assert!(matches!(parse_command("/draw"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_brush_commands() {
        assert_eq!(
            parse_command("/color #dc2626"),
            Ok(Some(Command::Color("#DC2626".to_string())))
        );
        assert!(matches!(
            parse_command("/color red"),
            Err(CommandError::InvalidColor(_))
        ));
        assert_eq!(
            parse_command("/color 2"),
            Ok(Some(Command::Color("#DC2626".to_string())))
        );
        assert!(matches!(
            parse_command("/color 9"),
            Err(CommandError::InvalidColor(_))
        ));
        assert!(parse_command("/color 0").is_err());
        assert_eq!(parse_command("/palette"), Ok(Some(Command::Palette)));
        assert_eq!(parse_command("/width 5"), Ok(Some(Command::Width(5.0))));
        assert!(parse_command("/width 0").is_err());
        assert_eq!(parse_command("/eraser"), Ok(Some(Command::Eraser)));
    }

    #[test]
    fn test_voice_command() {
        assert_eq!(
            parse_command("/voice clip.webm 12.5"),
            Ok(Some(Command::Voice {
                path: PathBuf::from("clip.webm"),
                duration: Duration::from_millis(12_500),
            }))
        );
        assert!(matches!(parse_command("/voice clip.webm"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_command("/dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }
}
