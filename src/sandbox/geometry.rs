//! Axis-aligned areas used to lay out sandbox maps

use serde::{Deserialize, Serialize};

use crate::core::types::Position;

/// Clamped points stay this far inside the far edges, which are exclusive
const EDGE_INSET: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Position,
    pub max: Position,
}

impl Rect {
    pub fn new(x0: f32, z0: f32, x1: f32, z1: f32) -> Self {
        Self {
            min: Position::new(x0.min(x1), z0.min(z1)),
            max: Position::new(x0.max(x1), z0.max(z1)),
        }
    }

    /// Half-open: the low edges belong to the rect, the high edges do not,
    /// so adjacent rects never share a point
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.min.x && pos.x < self.max.x && pos.z >= self.min.z && pos.z < self.max.z
    }

    /// Closest point of the rect to `pos`
    pub fn clamp(&self, pos: Position) -> Position {
        Position::new(
            pos.x.clamp(self.min.x, (self.max.x - EDGE_INSET).max(self.min.x)),
            pos.z.clamp(self.min.z, (self.max.z - EDGE_INSET).max(self.min.z)),
        )
    }

    pub fn center(&self) -> Position {
        Position::new((self.min.x + self.max.x) / 2.0, (self.min.z + self.max.z) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_rects_do_not_overlap() {
        let west = Rect::new(0.0, 0.0, 100.0, 100.0);
        let east = Rect::new(100.0, 0.0, 200.0, 100.0);
        let edge = Position::new(100.0, 50.0);
        assert!(!west.contains(edge));
        assert!(east.contains(edge));
    }

    #[test]
    fn test_clamp_stays_inside() {
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        let clamped = rect.clamp(Position::new(150.0, -20.0));
        assert!(rect.contains(clamped));
        assert_eq!(clamped, Position::new(99.5, 0.0));
        assert_eq!(rect.clamp(Position::new(40.0, 60.0)), Position::new(40.0, 60.0));
    }

    #[test]
    fn test_corners_are_normalised() {
        let rect = Rect::new(10.0, 10.0, 0.0, 0.0);
        assert_eq!(rect.center(), Position::new(5.0, 5.0));
        assert!(rect.contains(Position::new(0.0, 0.0)));
    }
}
