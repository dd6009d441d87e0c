//! Geometric predicates.
//!
//! The triangulation engine uses [geogram_predicates] (exact, with symbolic perturbation) to
//! build the coarse mesh. The finalizer decides ownership and conflicts with the exact, but
//! unperturbed, predicates of [robust]: their outcome depends on the coordinates only, so the
//! counting pass and the chunking pass agree on every point, even for degenerate input.

use core::cmp;

use geogram_predicates as gp;
use robust::{Coord, incircle, orient2d};

use crate::utils::types::Vertex2;

#[inline]
const fn coord2(p: &Vertex2) -> Coord<f64> {
    Coord { x: p[0], y: p[1] }
}

/// Height of a vertex on the lifting paraboloid.
#[inline]
pub fn lifted_height(v: &Vertex2) -> f64 {
    v[0].powi(2) + v[1].powi(2)
}

/// Sign of the orientation of `abc`, `> 0` for counter-clockwise.
#[inline]
pub fn orient_2d(a: &Vertex2, b: &Vertex2, c: &Vertex2) -> i16 {
    gp::orient_2d(a, b, c)
}

/// Checks if `p` lies inside the circumcircle of the counter-clockwise triangle `abc`.
///
/// Uses symbolic perturbation, so a co-circular `p` is decided consistently within one run.
#[inline]
pub fn in_circle_sos(a: &Vertex2, b: &Vertex2, c: &Vertex2, p: &Vertex2) -> bool {
    let [h_a, h_b, h_c, h_p] = [a, b, c, p].map(lifted_height);

    gp::orient_2dlifted_SOS(a, b, c, p, h_a, h_b, h_c, h_p) > 0
}

/// Exact orientation of `abc` without perturbation, `0` for collinear points.
#[inline]
pub fn orient_2d_exact(a: &Vertex2, b: &Vertex2, c: &Vertex2) -> cmp::Ordering {
    let det = orient2d(coord2(a), coord2(b), coord2(c));

    if det > 0.0 {
        cmp::Ordering::Greater
    } else if det < 0.0 {
        cmp::Ordering::Less
    } else {
        cmp::Ordering::Equal
    }
}

/// Checks if `p` lies strictly inside the circumcircle of the triangle `abc`, in any orientation.
///
/// Co-circular points are outside.
#[inline]
pub fn in_circumcircle(a: &Vertex2, b: &Vertex2, c: &Vertex2, p: &Vertex2) -> bool {
    let det = incircle(coord2(a), coord2(b), coord2(c), coord2(p));

    match orient_2d_exact(a, b, c) {
        cmp::Ordering::Greater => det > 0.0,
        cmp::Ordering::Less => det < 0.0,
        cmp::Ordering::Equal => false,
    }
}

/// Checks if ang(v1--v0, v1--v2) is convex, flat, or concave
pub fn is_convex(v0: &Vertex2, v1: &Vertex2, v2: &Vertex2) -> bool {
    match orient_2d(v0, v1, v2).cmp(&0) {
        cmp::Ordering::Greater => true,
        cmp::Ordering::Less => false,
        cmp::Ordering::Equal => {
            let v1_v0 = [v1[0] - v0[0], v1[1] - v0[1]];
            let v1_v2 = [v1[0] - v2[0], v1[1] - v2[1]];
            let dot_prod = v1_v0[0] * v1_v2[0] + v1_v0[1] * v1_v2[1];

            dot_prod > 0.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_circumcircle_ignores_orientation() {
        let a = [0.0, 0.0];
        let b = [4.0, 0.0];
        let c = [0.0, 4.0];

        assert!(in_circumcircle(&a, &b, &c, &[1.0, 1.0]));
        assert!(in_circumcircle(&a, &c, &b, &[1.0, 1.0]));
        assert!(!in_circumcircle(&a, &b, &c, &[5.0, 5.0]));
    }

    #[test]
    fn test_cocircular_is_outside() {
        // the fourth corner of the square lies on the circle through the other three
        let a = [0.0, 0.0];
        let b = [2.0, 0.0];
        let c = [2.0, 2.0];

        assert!(!in_circumcircle(&a, &b, &c, &[0.0, 2.0]));
        assert!(!in_circumcircle(&a, &b, &c, &a));
    }

    #[test]
    fn test_flat_triangle_has_no_circle() {
        assert!(!in_circumcircle(
            &[0.0, 0.0],
            &[1.0, 0.0],
            &[2.0, 0.0],
            &[1.0, 0.1]
        ));
        assert_eq!(
            orient_2d_exact(&[0.0, 0.0], &[1.0, 0.0], &[2.0, 0.0]),
            cmp::Ordering::Equal
        );
    }
}
