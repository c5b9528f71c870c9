//! Stroke smoothing.
//!
//! A stroke `p0..p(n-1)` becomes a chain of quadratic Béziers: the path
//! starts at `p0`, each interior point `pi` is the control of a segment ending
//! at the midpoint of `pi` and `p(i+1)`, and a final segment with control
//! `p(n-2)` ends at `p(n-1)`. Live capture and remote replay both go through
//! these functions, so they emit identical geometry.

use kurbo::{Point, QuadBez};

/// Interior segment `i` (`1 <= i <= n-2`), available once `p(i+1)` is known.
pub fn segment(points: &[Point], i: usize) -> Option<QuadBez> {
    if i == 0 || i + 1 >= points.len() {
        return None;
    }
    let start = if i == 1 {
        points[0]
    } else {
        points[i - 1].midpoint(points[i])
    };
    let end = points[i].midpoint(points[i + 1]);
    Some(QuadBez::new(start, points[i], end))
}

/// Closing segment, drawn when the gesture ends.
pub fn tail(points: &[Point]) -> Option<QuadBez> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let last = points[n - 1];
    let second_last = points[n - 2];
    let start = if n == 2 {
        points[0]
    } else {
        second_last.midpoint(last)
    };
    Some(QuadBez::new(start, second_last, last))
}

/// All segments of a finished stroke. Empty for fewer than two points.
pub fn segments(points: &[Point]) -> Vec<QuadBez> {
    let interior = (1..points.len().saturating_sub(1)).filter_map(|i| segment(points, i));
    interior.chain(tail(points)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_short_strokes() {
        assert!(segments(&[]).is_empty());
        assert!(segments(&pts(&[(1.0, 1.0)])).is_empty());

        let two = segments(&pts(&[(0.0, 0.0), (10.0, 0.0)]));
        assert_eq!(two.len(), 1);
        assert_eq!(two[0].p0, Point::new(0.0, 0.0));
        assert_eq!(two[0].p2, Point::new(10.0, 0.0));
    }

    #[test]
    fn test_segments_are_continuous() {
        let points = pts(&[(0.0, 0.0), (10.0, 0.0), (20.0, 10.0), (30.0, 0.0), (40.0, 5.0)]);
        let segs = segments(&points);
        assert_eq!(segs.len(), points.len() - 1);
        assert_eq!(segs[0].p0, points[0]);
        assert_eq!(segs[0].p1, points[1]);
        assert_eq!(segs[0].p2, Point::new(15.0, 5.0));
        for pair in segs.windows(2) {
            assert_eq!(pair[0].p2, pair[1].p0);
        }
        let last = segs.last().unwrap();
        assert_eq!(last.p1, points[3]);
        assert_eq!(last.p2, points[4]);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let points = pts(&[(3.0, 4.0), (8.0, 9.0), (12.0, 2.0), (20.0, 20.0), (25.0, 1.0), (30.0, 30.0)]);

        let mut live = Vec::new();
        for n in 3..=points.len() {
            live.extend(segment(&points[..n], n - 2));
        }
        live.extend(tail(&points));

        assert_eq!(live, segments(&points));
    }
}
