//! Operations and the stroke payload they carry.

use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};

/// Author-chosen operation identifier, unique within a room.
pub type OperationId = String;

/// Identifier of the author of an operation (stable across reconnects).
pub type AuthorId = String;

/// Position of an operation in a room's log. Dense, zero-based.
pub type Sequence = usize;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if !digits.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, 255)),
            8 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Format as `#rrggbb`, appending alpha only when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for SerializableColor {
    fn default() -> Self {
        Self::black()
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// How a chunk affects the pixels it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Paint with the chunk color.
    #[default]
    Brush,
    /// Clear covered pixels to transparent.
    Eraser,
}

/// A piece of a pointer gesture: ordered points plus rendering attributes.
///
/// A gesture may be split into several chunks; the log treats each one as an
/// independent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeChunk {
    pub points: Vec<Point>,
    pub color: SerializableColor,
    pub width: f64,
    #[serde(default)]
    pub tool: Tool,
}

impl StrokeChunk {
    /// Create an empty brush chunk.
    pub fn new(color: SerializableColor, width: f64) -> Self {
        Self {
            points: Vec::new(),
            color,
            width,
            tool: Tool::Brush,
        }
    }

    /// Create a chunk from existing points.
    pub fn from_points(points: Vec<Point>, color: SerializableColor, width: f64) -> Self {
        Self {
            points,
            color,
            width,
            tool: Tool::Brush,
        }
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tool = tool;
        self
    }

    pub fn push_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the chunk can be rendered: at least one point, all
    /// coordinates finite, and a positive finite width.
    pub fn is_well_formed(&self) -> bool {
        !self.points.is_empty()
            && self.width.is_finite()
            && self.width > 0.0
            && self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// Tombstone state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OperationState {
    #[default]
    Active = 0,
    Undone = 1,
}

/// One entry in a room's authoritative log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub sequence: Sequence,
    pub author_id: AuthorId,
    pub payload: StrokeChunk,
    #[serde(default)]
    pub state: OperationState,
}

impl Operation {
    pub fn is_active(&self) -> bool {
        self.state == OperationState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing() {
        assert_eq!(
            SerializableColor::from_hex("#e6194b"),
            Some(SerializableColor::new(0xe6, 0x19, 0x4b, 255))
        );
        assert_eq!(
            SerializableColor::from_hex("4363d880"),
            Some(SerializableColor::new(0x43, 0x63, 0xd8, 0x80))
        );
        assert_eq!(SerializableColor::from_hex("#12345"), None);
        assert_eq!(SerializableColor::from_hex("#zzzzzz"), None);
    }

    #[test]
    fn test_hex_formatting() {
        assert_eq!(SerializableColor::new(255, 0, 16, 255).to_hex(), "#ff0010");
        assert_eq!(SerializableColor::transparent().to_hex(), "#00000000");
    }

    #[test]
    fn test_chunk_well_formed() {
        let mut chunk = StrokeChunk::new(SerializableColor::black(), 4.0);
        assert!(!chunk.is_well_formed());

        chunk.push_point(Point::new(1.0, 2.0));
        assert!(chunk.is_well_formed());

        chunk.push_point(Point::new(f64::NAN, 0.0));
        assert!(!chunk.is_well_formed());

        let zero_width = StrokeChunk::from_points(vec![Point::ZERO], SerializableColor::black(), 0.0);
        assert!(!zero_width.is_well_formed());
    }

    #[test]
    fn test_chunk_tool_defaults_to_brush() {
        let json = r#"{"points":[{"x":1.0,"y":2.0}],"color":{"r":0,"g":0,"b":0,"a":255},"width":3.0}"#;
        let chunk: StrokeChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.tool, Tool::Brush);
        assert_eq!(chunk.points, vec![Point::new(1.0, 2.0)]);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&OperationState::Undone).unwrap(), "\"undone\"");
    }
}
