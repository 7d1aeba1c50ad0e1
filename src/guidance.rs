//! Steering decisions derived from the tracked object's horizontal position.

use std::fmt;

use crate::frame::BoundingBox;

/// Half-width of the band around the frame centre where no turn is commanded.
pub const DEAD_ZONE_PX: i32 = 50;

/// Steering command. `as_str` values are the literal wire payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    TurnLeft,
    TurnRight,
    GoStraight,
    None,
}

impl Decision {
    pub const ALL: [Decision; 4] = [
        Decision::TurnLeft,
        Decision::TurnRight,
        Decision::GoStraight,
        Decision::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::TurnLeft => "Turn left",
            Decision::TurnRight => "Turn right",
            Decision::GoStraight => "Go straight",
            Decision::None => "None",
        }
    }

    /// Inverse of `as_str`.
    pub fn from_wire(literal: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == literal)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a box (or its absence) to a steering decision.
///
/// The dead-zone `[mid - 50, mid + 50]` is inclusive on both edges.
pub fn decide(bbox: Option<&BoundingBox>, frame_width: u32) -> Decision {
    let Some(bbox) = bbox else {
        return Decision::None;
    };
    let center_x = bbox.center_x() as i64;
    let mid = (frame_width / 2) as i64;
    let dead_zone = DEAD_ZONE_PX as i64;

    if center_x < mid - dead_zone {
        Decision::TurnLeft
    } else if center_x > mid + dead_zone {
        Decision::TurnRight
    } else {
        Decision::GoStraight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_center(center_x: i32) -> BoundingBox {
        // Even width so center_x is exact.
        BoundingBox::new(center_x - 10, 100, 20, 20)
    }

    #[test]
    fn no_box_means_none() {
        assert_eq!(decide(None, 640), Decision::None);
        assert_eq!(decide(None, 0), Decision::None);
        assert_eq!(decide(None, 1920), Decision::None);
    }

    #[test]
    fn centered_box_goes_straight() {
        let b = BoundingBox::new(270, 100, 60, 60);
        assert_eq!(b.center_x(), 300);
        assert_eq!(decide(Some(&b), 640), Decision::GoStraight);
    }

    #[test]
    fn left_box_turns_left() {
        let b = BoundingBox::new(50, 100, 40, 40);
        assert_eq!(b.center_x(), 70);
        assert_eq!(decide(Some(&b), 640), Decision::TurnLeft);
    }

    #[test]
    fn right_box_turns_right() {
        let b = BoundingBox::new(560, 100, 40, 40);
        assert_eq!(b.center_x(), 580);
        assert_eq!(decide(Some(&b), 640), Decision::TurnRight);
    }

    #[test]
    fn dead_zone_edges_are_inclusive() {
        assert_eq!(decide(Some(&with_center(270)), 640), Decision::GoStraight);
        assert_eq!(decide(Some(&with_center(370)), 640), Decision::GoStraight);
        assert_eq!(decide(Some(&with_center(269)), 640), Decision::TurnLeft);
        assert_eq!(decide(Some(&with_center(371)), 640), Decision::TurnRight);
    }

    #[test]
    fn center_uses_integer_division() {
        // x=0, w=541 → center 270 (not 270.5), still inside the dead-zone.
        let b = BoundingBox::new(0, 0, 541, 10);
        assert_eq!(decide(Some(&b), 640), Decision::GoStraight);
        // odd frame width: mid = 320 for 641.
        assert_eq!(decide(Some(&with_center(371)), 641), Decision::TurnRight);
    }

    #[test]
    fn wire_literals_round_trip() {
        for d in Decision::ALL {
            assert_eq!(Decision::from_wire(d.as_str()), Some(d));
            assert_eq!(d.to_string(), d.as_str());
        }
        assert_eq!(Decision::from_wire("turn left"), None);
    }
}
