//! Tile geometry.
//!
//! World positions are integer tiles. Distances are Chebyshev (king-move)
//! distances, which is what "within N tiles" means for visibility.

use serde::{Deserialize, Serialize};

/// A world tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    /// Plane (floor) index. Carried for the client, ignored by distance.
    #[serde(default)]
    pub plane: u8,
}

impl Tile {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y, plane: 0 }
    }

    /// Chebyshev distance `max(|dx|, |dy|)`.
    pub fn distance(self, other: Tile) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn within(self, other: Tile, radius: i32) -> bool {
        self.distance(other) <= radius
    }

    pub fn offset(self, dx: i32, dy: i32) -> Tile {
        Tile {
            x: self.x + dx,
            y: self.y + dy,
            plane: self.plane,
        }
    }
}

/// One of the eight compass directions, clockwise from north.
///
/// North is `-y`, east is `+x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Maps a step delta to a facing direction.
    ///
    /// Only the sign of each component matters. Returns `None` for `(0, 0)`,
    /// which is never a legal step.
    pub fn from_delta(dx: i32, dy: i32) -> Option<Direction> {
        match (dx.signum(), dy.signum()) {
            (0, -1) => Some(Direction::North),
            (1, -1) => Some(Direction::NorthEast),
            (1, 0) => Some(Direction::East),
            (1, 1) => Some(Direction::SouthEast),
            (0, 1) => Some(Direction::South),
            (-1, 1) => Some(Direction::SouthWest),
            (-1, 0) => Some(Direction::West),
            (-1, -1) => Some(Direction::NorthWest),
            _ => None,
        }
    }

    /// Unit delta for this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    pub fn from_u8(v: u8) -> Option<Direction> {
        Direction::ALL.get(usize::from(v)).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compass_table_is_exact() {
        let table = [
            ((0, -1), 0),
            ((1, -1), 1),
            ((1, 0), 2),
            ((1, 1), 3),
            ((0, 1), 4),
            ((-1, 1), 5),
            ((-1, 0), 6),
            ((-1, -1), 7),
        ];
        for ((dx, dy), expected) in table {
            let dir = Direction::from_delta(dx, dy).unwrap();
            assert_eq!(dir.as_u8(), expected, "delta ({dx},{dy})");
            assert_eq!(dir.delta(), (dx, dy));
        }
    }

    #[test]
    fn zero_delta_has_no_direction() {
        assert_eq!(Direction::from_delta(0, 0), None);
    }

    #[test]
    fn chebyshev_distance() {
        let a = Tile::new(100, 100);
        assert_eq!(a.distance(Tile::new(105, 100)), 5);
        assert_eq!(a.distance(Tile::new(90, 116)), 16);
        assert!(a.within(Tile::new(116, 84), 16));
        assert!(!a.within(Tile::new(117, 100), 16));
    }

    #[test]
    fn direction_from_u8_rejects_out_of_range() {
        assert_eq!(Direction::from_u8(7), Some(Direction::NorthWest));
        assert_eq!(Direction::from_u8(8), None);
    }
}
