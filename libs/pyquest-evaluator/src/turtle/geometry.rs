//! Closed-form shape checks over a recorded turtle path.

use crate::error::{EvalError, Result};
use pyquest_common::types::{PathSegment, ShapeSpec};

/// Endpoints closer than this are treated as the same point.
const JOIN_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeTolerance {
    pub length_px: f64,
    pub angle_deg: f64,
}

impl Default for ShapeTolerance {
    fn default() -> Self {
        Self {
            length_px: 2.0,
            angle_deg: 1.0,
        }
    }
}

/// Outcome of a geometric check. Every count, length and turn comparison is
/// one check; `problems` names the ones that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeScore {
    pub satisfied: usize,
    pub total: usize,
    pub problems: Vec<String>,
}

impl ShapeScore {
    pub fn passed(&self) -> bool {
        self.total > 0 && self.satisfied == self.total
    }

    pub fn similarity(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.satisfied as f64 / self.total as f64
    }

    fn record(&mut self, ok: bool, problem: impl FnOnce() -> String) {
        self.total += 1;
        if ok {
            self.satisfied += 1;
        } else {
            self.problems.push(problem());
        }
    }
}

/// Signed turn from heading `from` to heading `to`, in (-180, 180].
pub fn heading_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

fn joined(a: &PathSegment, b: &PathSegment) -> bool {
    (a.end[0] - b.start[0]).hypot(a.end[1] - b.start[1]) <= JOIN_EPSILON
}

/// Merge consecutive connected segments that continue in the same
/// direction, so `forward(50); forward(50)` counts as one side.
pub fn merge_colinear(segments: &[PathSegment], angle_tol_deg: f64) -> Vec<PathSegment> {
    let mut merged: Vec<PathSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if joined(last, segment) && heading_delta(last.angle, segment.angle).abs() <= angle_tol_deg => {
                *last = PathSegment::new(last.start, segment.end);
            }
            _ => merged.push(segment.clone()),
        }
    }
    merged
}

/// Side lengths a correct drawing would produce, one candidate per valid
/// starting orientation.
fn expected_sides(shape: &ShapeSpec) -> Result<Vec<Vec<f64>>> {
    match *shape {
        ShapeSpec::Rectangle { width, height } => {
            if width <= 0.0 || height <= 0.0 {
                return Err(EvalError::TurtleValidation(format!("invalid shape: {}", shape)));
            }
            Ok(vec![
                vec![width, height, width, height],
                vec![height, width, height, width],
            ])
        }
        ShapeSpec::RegularPolygon { sides, side_length } => {
            if sides < 3 || side_length <= 0.0 {
                return Err(EvalError::TurtleValidation(format!("invalid shape: {}", shape)));
            }
            Ok(vec![vec![side_length; sides]])
        }
    }
}

fn length_matches(segments: &[PathSegment], expected: &[f64], tol: f64) -> usize {
    segments
        .iter()
        .zip(expected)
        .filter(|(segment, expected)| (segment.length - **expected).abs() <= tol)
        .count()
}

/// Check a path against a shape: exactly N segments, each of the expected
/// length, with every turn the same size (360/N) and direction.
///
/// Closure is not checked.
pub fn check_shape(segments: &[PathSegment], shape: &ShapeSpec, tol: ShapeTolerance) -> Result<ShapeScore> {
    let candidates = expected_sides(shape)?;
    let count = shape.segment_count();
    let mut score = ShapeScore {
        satisfied: 0,
        total: 0,
        problems: Vec::new(),
    };

    score.record(segments.len() == count, || {
        format!("expected {} segments, found {}", count, segments.len())
    });

    // Rectangles may start along either side
    let sides = candidates
        .iter()
        .max_by_key(|candidate| length_matches(segments, candidate, tol.length_px))
        .ok_or_else(|| EvalError::TurtleValidation(format!("no side lengths for {}", shape)))?;

    for (idx, expected) in sides.iter().enumerate() {
        match segments.get(idx) {
            Some(segment) => score.record((segment.length - expected).abs() <= tol.length_px, || {
                format!("segment {} has length {:.1}, expected {}", idx + 1, segment.length, expected)
            }),
            None => score.record(false, || format!("segment {} is missing", idx + 1)),
        }
    }

    let turn = 360.0 / count as f64;
    let mut direction = None;
    for idx in 1..count {
        let delta = match (segments.get(idx - 1), segments.get(idx)) {
            (Some(prev), Some(next)) => Some(heading_delta(prev.angle, next.angle)),
            _ => None,
        };
        let ok = match delta {
            Some(delta) => {
                let sign = delta.signum();
                let consistent = *direction.get_or_insert(sign) == sign;
                consistent && (delta.abs() - turn).abs() <= tol.angle_deg
            }
            None => false,
        };
        score.record(ok, || match delta {
            Some(delta) => format!("turn {} is {:.1} degrees, expected {:.1}", idx, delta, turn),
            None => format!("turn {} is missing", idx),
        });
    }

    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(points: &[[f64; 2]]) -> Vec<PathSegment> {
        points.windows(2).map(|w| PathSegment::new(w[0], w[1])).collect()
    }

    fn square(side: f64) -> ShapeSpec {
        ShapeSpec::Rectangle {
            width: side,
            height: side,
        }
    }

    #[test]
    fn test_square_with_small_length_noise_passes() {
        let segments = path(&[[0.0, 0.0], [101.0, 0.0], [101.0, 99.0], [0.5, 99.0], [0.5, 0.0]]);
        let score = check_shape(&segments, &square(100.0), ShapeTolerance::default()).unwrap();
        assert!(score.passed(), "problems: {:?}", score.problems);
        assert_eq!(score.similarity(), 1.0);
    }

    #[test]
    fn test_one_short_side_fails() {
        let segments = path(&[[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [20.0, 100.0], [20.0, 0.0]]);
        let score = check_shape(&segments, &square(100.0), ShapeTolerance::default()).unwrap();
        assert!(!score.passed());
        assert!(score.similarity() < 1.0);
        assert!(score.similarity() > 0.5);
        assert!(score.problems[0].contains("segment 3"));
    }

    #[test]
    fn test_rectangle_either_orientation() {
        let rect = ShapeSpec::Rectangle {
            width: 200.0,
            height: 100.0,
        };
        let wide_first = path(&[[0.0, 0.0], [200.0, 0.0], [200.0, 100.0], [0.0, 100.0], [0.0, 0.0]]);
        let tall_first = path(&[[0.0, 0.0], [0.0, 100.0], [-200.0, 100.0], [-200.0, 0.0], [0.0, 0.0]]);
        assert!(check_shape(&wide_first, &rect, ShapeTolerance::default()).unwrap().passed());
        assert!(check_shape(&tall_first, &rect, ShapeTolerance::default()).unwrap().passed());
    }

    #[test]
    fn test_clockwise_square_passes() {
        let segments = path(&[[0.0, 0.0], [100.0, 0.0], [100.0, -100.0], [0.0, -100.0], [0.0, 0.0]]);
        assert!(check_shape(&segments, &square(100.0), ShapeTolerance::default()).unwrap().passed());
    }

    #[test]
    fn test_mixed_turn_directions_fail() {
        // Zig-zag: left, right, left
        let segments = path(&[[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [200.0, 100.0], [200.0, 200.0]]);
        let score = check_shape(&segments, &square(100.0), ShapeTolerance::default()).unwrap();
        assert!(!score.passed());
    }

    #[test]
    fn test_regular_octagon() {
        let mut points = vec![[0.0, 0.0]];
        let mut heading: f64 = 0.0;
        for _ in 0..8 {
            let [x, y] = *points.last().unwrap();
            let rad = heading.to_radians();
            points.push([x + 50.0 * rad.cos(), y + 50.0 * rad.sin()]);
            heading += 45.0;
        }
        let octagon = ShapeSpec::RegularPolygon {
            sides: 8,
            side_length: 50.0,
        };
        let score = check_shape(&path(&points), &octagon, ShapeTolerance::default()).unwrap();
        assert!(score.passed(), "problems: {:?}", score.problems);
    }

    #[test]
    fn test_extra_segment_fails_without_merge() {
        let segments = path(&[
            [0.0, 0.0],
            [50.0, 0.0],
            [100.0, 0.0],
            [100.0, 100.0],
            [0.0, 100.0],
            [0.0, 0.0],
        ]);
        let score = check_shape(&segments, &square(100.0), ShapeTolerance::default()).unwrap();
        assert!(!score.passed());
        assert!(score.problems[0].contains("expected 4 segments, found 5"));

        let merged = merge_colinear(&segments, 1.0);
        assert_eq!(merged.len(), 4);
        assert!(check_shape(&merged, &square(100.0), ShapeTolerance::default()).unwrap().passed());
    }

    #[test]
    fn test_merge_keeps_disconnected_segments_apart() {
        let segments = vec![
            PathSegment::new([0.0, 0.0], [50.0, 0.0]),
            PathSegment::new([60.0, 0.0], [100.0, 0.0]),
        ];
        assert_eq!(merge_colinear(&segments, 1.0).len(), 2);
    }

    #[test]
    fn test_empty_path_scores_zero_checks() {
        let score = check_shape(&[], &square(100.0), ShapeTolerance::default()).unwrap();
        assert!(!score.passed());
        assert_eq!(score.satisfied, 0);
    }

    #[test]
    fn test_degenerate_polygon_is_rejected() {
        let shape = ShapeSpec::RegularPolygon {
            sides: 2,
            side_length: 10.0,
        };
        assert!(matches!(
            check_shape(&[], &shape, ShapeTolerance::default()),
            Err(EvalError::TurtleValidation(_))
        ));
    }

    #[test]
    fn test_heading_delta_wraps() {
        assert_eq!(heading_delta(170.0, -170.0), 20.0);
        assert_eq!(heading_delta(-90.0, 180.0), -90.0);
        assert_eq!(heading_delta(0.0, 90.0), 90.0);
    }
}
