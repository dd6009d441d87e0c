use std::cmp;

use crate::{
    predicates::{in_circle_sos, is_convex, orient_2d},
    trids::{hedge_iterator::HedgeIterator, tri_data_structure::TriDataStructure},
    utils::{
        point_order::sort_along_hilbert_curve_2d,
        types::{Edge2, Triangle2, TriIteratorIdx, Vertex2, VertexIdx},
    },
    VertexNode,
};
use anyhow::{Ok, Result};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Triangle, including point at infinity
pub enum TriangleExtended {
    /// Normal Triangle
    Triangle(Triangle2),
    /// Triangle with one point at infinity, i.e. a line segment
    ConceptualTriangle(Edge2),
}

/// An incremental 2D Delaunay Triangulation.
///
/// Vertices are inserted by locating their triangle with a visibility walk, splitting it
/// (`1 -> 3 flip`) and restoring the empty circumcircle property with `2 -> 2` flips.
///
/// ```
/// use streamtri::Triangulation;
///
/// let vertices = vec![
///     [0.0, 0.0],
///     [-0.5, 1.0],
///     [0.0, 2.5],
///     [2.0, 3.0],
///     [4.0, 2.5],
///     [5.0, 1.5],
///     [4.5, 0.5],
///     [2.5, -0.5],
///     [1.5, 1.5],
///     [3.0, 1.0],
/// ];
///
/// let mut triangulation = Triangulation::new();
/// triangulation.insert_vertices(&vertices, true).unwrap(); // toggles spatial sorting
///
/// assert_eq!(triangulation.is_delaunay_p(), 1.0);
/// ```
#[derive(Default)]
pub struct Triangulation {
    tds: TriDataStructure,
    vertices: Vec<Vertex2>,
    time_flipping: u128,
    time_inserting: u128,
    time_walking: u128,
    last_inserted_triangle: Option<TriIteratorIdx>,
    /// Vertices that are part of the triangulation.
    used_vertices: Vec<VertexIdx>,
    /// Vertices that are not part of the triangulation, because they coincide with a used one.
    duplicate_vertices: Vec<VertexIdx>,
}

impl Triangulation {
    pub const fn new() -> Self {
        Self {
            tds: TriDataStructure::new(),
            vertices: Vec::new(),
            time_flipping: 0,
            time_inserting: 0,
            time_walking: 0,
            last_inserted_triangle: None,
            used_vertices: Vec::new(),
            duplicate_vertices: Vec::new(),
        }
    }

    /// Utility function for locate via vis walk.
    ///
    /// Checks all edges for a triangle to go to the next tri or return None, i.e. stop locate at current tri.
    #[must_use]
    pub fn choose_hedge<'a>(
        &self,
        v_hedges: &[HedgeIterator<'a>],
        v: &Vertex2,
    ) -> Option<HedgeIterator<'a>> {
        for hedge in v_hedges {
            // only process casual hedges
            if let (VertexNode::Casual(v0), VertexNode::Casual(v1)) =
                (hedge.starting_node(), hedge.end_node())
            {
                let orientation = orient_2d(&self.vertices[v0], &self.vertices[v1], v);

                if hedge.tri().is_conceptual() {
                    if orientation <= 0 {
                        return Some(*hedge);
                    }
                } else if orientation < 0 {
                    return Some(*hedge);
                }
            }
        }
        None
    }

    /// For a tri idx get the triangle variant, i.e. a normal triangle, or a line with one of its three indices at infinity
    pub fn get_tri_type(&self, tri_idx: TriIteratorIdx) -> Result<TriangleExtended> {
        let [node0, node1, node2] = self.tds.get_tri(tri_idx)?.nodes();

        let tri_extended = match (node0, node1, node2) {
            (VertexNode::Conceptual, VertexNode::Casual(idx1), VertexNode::Casual(idx2)) => {
                TriangleExtended::ConceptualTriangle([self.vertices[idx1], self.vertices[idx2]])
            }
            (VertexNode::Casual(idx0), VertexNode::Conceptual, VertexNode::Casual(idx2)) => {
                TriangleExtended::ConceptualTriangle([self.vertices[idx2], self.vertices[idx0]])
            }
            (VertexNode::Casual(idx0), VertexNode::Casual(idx1), VertexNode::Conceptual) => {
                TriangleExtended::ConceptualTriangle([self.vertices[idx0], self.vertices[idx1]])
            }
            (VertexNode::Casual(idx0), VertexNode::Casual(idx1), VertexNode::Casual(idx2)) => {
                TriangleExtended::Triangle([
                    self.vertices[idx0],
                    self.vertices[idx1],
                    self.vertices[idx2],
                ])
            }
            (_, _, _) => return Err(anyhow::Error::msg("An unexpected triangle case occurred")),
        };

        Ok(tri_extended)
    }

    fn insert_init_tri(&mut self, v_idxs: &mut Vec<VertexIdx>) -> Result<()> {
        let now = std::time::Instant::now();

        let Some(idx0) = v_idxs.pop() else {
            return Err(anyhow::Error::msg(
                "Needs at least 3 vertices to compute a 2D Triangulation!",
            ));
        };
        let v0 = self.vertices[idx0];

        // the second vertex must differ from the first one
        let idx1 = loop {
            let Some(idx1) = v_idxs.pop() else {
                return Err(anyhow::Error::msg(
                    "All points coincide, i.e. could not find 2 distinct points !",
                ));
            };
            if self.vertices[idx1] != v0 {
                break idx1;
            }
            self.duplicate_vertices.push(idx1);
        };
        let v1 = self.vertices[idx1];

        let mut aligned = Vec::new();

        loop {
            let Some(idx2) = v_idxs.pop() else {
                return Err(anyhow::Error::msg(
                    "All points are aligned, i.e. could not find 3 non-aligned points !",
                ));
            };
            let v2 = self.vertices[idx2];

            // insert the triangle in ccw order, or if aligned, find another point to build the starting triangle
            match orient_2d(&v0, &v1, &v2).cmp(&0) {
                cmp::Ordering::Greater => self.tds.add_init_tri([idx0, idx1, idx2])?,
                cmp::Ordering::Less => self.tds.add_init_tri([idx0, idx2, idx1])?,
                cmp::Ordering::Equal => {
                    aligned.push(idx2);
                    continue;
                }
            };

            self.used_vertices.extend_from_slice(&[idx0, idx1, idx2]);
            break;
        }

        v_idxs.append(&mut aligned); // re-add the aligned points

        self.last_inserted_triangle = Some(0); // the initial casual triangle

        log::trace!(
            "Initial triangle inserted in {:.4} µs",
            now.elapsed().as_micros()
        );
        Ok(())
    }

    /// Insert a single vertex into an existing triangulation, returns its index.
    ///
    /// The walk starts at `near_to`, or at the last created triangle if `None`.
    pub fn insert_vertex(&mut self, v: Vertex2, near_to: Option<TriIteratorIdx>) -> Result<VertexIdx> {
        if self.tds.num_tris() == 0 {
            return Err(anyhow::Error::msg(
                "Needs at least 1 triangle in the triangulation to insert a vertex!",
            ));
        }

        let idx_to_insert = self.vertices.len();
        self.vertices.push(v);

        let near_to_idx = near_to
            .or(self.last_inserted_triangle)
            .unwrap_or(self.tds.num_tris() - 1);

        self.insert_v_helper(idx_to_insert, near_to_idx)?;

        Ok(idx_to_insert)
    }

    /// Insert a set of vertices into the triangulation.
    ///
    /// With `spatial_sorting` the vertices are inserted along a Hilbert curve, which keeps the walks short.
    pub fn insert_vertices(&mut self, vertices: &[Vertex2], spatial_sorting: bool) -> Result<()> {
        let mut idxs_to_insert = Vec::with_capacity(vertices.len());

        for v in vertices {
            idxs_to_insert.push(self.vertices.len());
            self.vertices.push(*v);
        }

        if self.vertices.len() < 3 {
            return Err(anyhow::Error::msg(
                "Needs at least 3 vertices to compute a 2D Triangulation!",
            ));
        }

        if spatial_sorting && !idxs_to_insert.is_empty() {
            let now = std::time::Instant::now();

            idxs_to_insert = sort_along_hilbert_curve_2d(&self.vertices, &idxs_to_insert);

            log::trace!(
                "Spatial sorting (hilbert curve) computed in {:.4} µs",
                now.elapsed().as_micros()
            );
        }

        if self.tds.num_tris() == 0 {
            self.insert_init_tri(&mut idxs_to_insert)?;
        }

        log::debug!("Inserting {} vertices", idxs_to_insert.len());

        while let Some(v_idx) = idxs_to_insert.pop() {
            let near_to_idx = self
                .last_inserted_triangle
                .unwrap_or(self.tds.num_tris() - 1);

            self.insert_v_helper(v_idx, near_to_idx)?;
        }

        self.log_time();

        Ok(())
    }

    fn insert_v_helper(&mut self, v_idx: VertexIdx, near_to: TriIteratorIdx) -> Result<()> {
        let v = self.vertices[v_idx];

        // Perform locate and measure time
        let now = std::time::Instant::now();
        let containing_tri_idx = self.locate_vis_walk(&v, near_to)?;
        self.time_walking += now.elapsed().as_micros();

        // A vertex on top of an existing one would create a flat triangle, keep the first one
        let is_duplicate = self
            .tds
            .get_tri(containing_tri_idx)?
            .nodes()
            .iter()
            .any(|node| node.idx().is_some_and(|idx| self.vertices[idx] == v));

        if is_duplicate {
            log::trace!("Skipping duplicate vertex {v_idx}: {v:?}");
            self.duplicate_vertices.push(v_idx);
            return Ok(());
        }
        self.used_vertices.push(v_idx);

        // Perform insert and measure time
        let now = std::time::Instant::now();
        let mut hedges_to_verify: Vec<usize> = self
            .tds
            .get_tri(containing_tri_idx)?
            .hedges()
            .iter()
            .map(|hedge| hedge.twin().idx)
            .collect();

        let [t0, _, _] = self.tds.flip_1_to_3(containing_tri_idx, v_idx)?;
        self.last_inserted_triangle = Some(t0.idx);
        self.time_inserting += now.elapsed().as_micros();

        // Perform flips and measure time
        let now = std::time::Instant::now();
        while let Some(hedge_idx) = hedges_to_verify.pop() {
            if self.should_flip_hedge(hedge_idx)? {
                let hedge = self.tds.get_hedge(hedge_idx)?;

                // Push the hedges before performing the flip, because the flip overwrites the triangles
                //
                // Denote the inserted vertex v, the hedge to test ab and the opposing point o, that shares ab with v
                // The flip makes vab and abo become vao and vbo respectively
                // Now the hedges to test are the ones not connected to v in any way, i.e. ao and bo
                hedges_to_verify.push(hedge.prev().twin().idx);
                hedges_to_verify.push(hedge.next().twin().idx);

                let [t0, _] = self.tds.flip_2_to_2(hedge_idx)?;
                self.last_inserted_triangle = Some(t0.idx);
            }
        }
        self.time_flipping += now.elapsed().as_micros();
        Ok(())
    }

    /// Check if a triangle is flat, i.e. exists of three co-linear points.
    pub fn is_tri_flat(&self, tri_idx: TriIteratorIdx) -> Result<bool> {
        let is_flat = match self.get_tri_type(tri_idx)? {
            TriangleExtended::Triangle([a, b, c]) => orient_2d(&a, &b, &c) == 0,
            TriangleExtended::ConceptualTriangle(_) => false, // the conceptual triangle can't be flat
        };

        Ok(is_flat)
    }

    /// Check if a point lies inside the circumcircle of a triangle.
    ///
    /// The circumcircle of a conceptual triangle is the open half plane beyond its hull edge.
    pub fn is_in_circumcircle(&self, p: &Vertex2, tri_idx: TriIteratorIdx) -> Result<bool> {
        let in_circle = match self.get_tri_type(tri_idx)? {
            TriangleExtended::Triangle([a, b, c]) => in_circle_sos(&a, &b, &c, p),
            TriangleExtended::ConceptualTriangle([a, b]) => orient_2d(&a, &b, p) > 0,
        };

        Ok(in_circle)
    }

    fn is_v_in_circumcircle(&self, v_idx: VertexIdx, tri_idx: TriIteratorIdx) -> Result<bool> {
        self.is_in_circumcircle(&self.vertices[v_idx], tri_idx)
    }

    /// Checks the empty circumcircle property in a parallel manner using `rayon`s `par_iter()`.
    ///
    /// Returns the share of triangles without a violation, `1.0` for a Delaunay triangulation.
    #[must_use]
    pub fn is_delaunay_p(&self) -> f64 {
        let num_tris = self.tds.num_tris();
        if num_tris == 0 {
            return 1.0;
        }

        let num_violated_tris: f64 = (0..num_tris)
            .into_par_iter()
            .map(|tri_idx| {
                let Result::Ok(tri) = self.tds.get_tri(tri_idx) else {
                    return 1.0;
                };
                let nodes = tri.nodes();

                if self.is_tri_flat(tri_idx).unwrap_or(true) {
                    return 1.0;
                }

                // Skip vertices that are part of the current triangle
                let violation = self.used_vertices.iter().any(|&v_idx| {
                    !nodes.contains(&VertexNode::Casual(v_idx))
                        && self.is_v_in_circumcircle(v_idx, tri_idx).unwrap_or(true)
                });

                if violation {
                    1.0
                } else {
                    0.0
                }
            })
            .sum();

        1.0 - num_violated_tris / num_tris as f64
    }

    pub fn is_sound(&self) -> bool {
        let sound = self.tds.is_sound();
        if !sound {
            log::error!("Triangulation is not sound!");
        }
        sound
    }

    pub fn num_duplicate_vertices(&self) -> usize {
        self.duplicate_vertices.len()
    }

    /// The number of all `tris` in the triangulation, `casual` and `conceptual`.
    pub const fn num_tris(&self) -> usize {
        self.tds.num_tris()
    }

    /// The number of `casual` `tris`, i.e. without the ones that have an connection to the dummy point.
    #[must_use]
    pub fn num_casual_tris(&self) -> usize {
        self.tds.num_casual_tris()
    }

    pub fn num_used_vertices(&self) -> usize {
        self.used_vertices.len()
    }

    /// Decide if the edge of `hedge_idx` violates the empty circumcircle property.
    pub fn should_flip_hedge(&self, hedge_idx: usize) -> Result<bool> {
        let hedge = self.tds.get_hedge(hedge_idx)?;

        let tri_idx_abd = hedge.tri().idx;
        let node_a = hedge.apex();
        let node_b = hedge.starting_node();

        let tri_idx_bcd = hedge.twin().tri().idx;
        let node_c = hedge.twin().apex();
        let node_d = hedge.twin().starting_node();

        match (node_a, node_b, node_c, node_d) {
            (
                VertexNode::Casual(idx_node_a),
                VertexNode::Casual(_), // from the hedge
                VertexNode::Casual(idx_node_c),
                VertexNode::Casual(_), // from the hedge
            ) => Ok(self.is_v_in_circumcircle(idx_node_c, tri_idx_abd)?
                || self.is_v_in_circumcircle(idx_node_a, tri_idx_bcd)?),
            (
                VertexNode::Conceptual,
                VertexNode::Casual(_),
                VertexNode::Casual(_),
                VertexNode::Casual(_),
            ) => Ok(false),
            (
                VertexNode::Casual(idx_node_a),
                VertexNode::Conceptual,
                VertexNode::Casual(idx_node_c),
                VertexNode::Casual(idx_node_d),
            ) => Ok(is_convex(
                &self.vertices[idx_node_c],
                &self.vertices[idx_node_d],
                &self.vertices[idx_node_a],
            )),
            (
                VertexNode::Casual(idx_node_a),
                VertexNode::Casual(_),
                VertexNode::Conceptual,
                VertexNode::Casual(_),
            ) => Ok(self.is_v_in_circumcircle(idx_node_a, tri_idx_bcd)?
                || self.is_tri_flat(tri_idx_abd)?),
            (
                VertexNode::Casual(idx_node_a),
                VertexNode::Casual(idx_node_b),
                VertexNode::Casual(idx_node_c),
                VertexNode::Conceptual,
            ) => Ok(is_convex(
                &self.vertices[idx_node_a],
                &self.vertices[idx_node_b],
                &self.vertices[idx_node_c],
            )),
            (_, _, _, _) => Err(anyhow::Error::msg(
                "Unexpected node configuration to decide flip for!",
            )),
        }
    }

    /// Get the triangulation data structure, as reference.
    #[must_use]
    pub const fn tds(&self) -> &TriDataStructure {
        &self.tds
    }

    /// Get the used vertices.
    #[must_use]
    pub fn used_vertices(&self) -> &[VertexIdx] {
        &self.used_vertices
    }

    /// Get the vertices.
    #[must_use]
    pub fn vertices(&self) -> &[Vertex2] {
        &self.vertices
    }

    /// Locate the triangle that contains a point by using the visibility walk.
    ///
    /// Points outside of the convex hull end in a conceptual triangle whose hull edge sees them.
    pub fn locate_vis_walk(&self, v: &Vertex2, tri_idx_start: TriIteratorIdx) -> Result<TriIteratorIdx> {
        let mut tri_idx = tri_idx_start; // variable to store the current triangle index

        // start with all hedges of the starting triangle
        let mut v_hedges = self.tds.get_tri(tri_idx)?.hedges().to_vec();

        // alternate the order of the two remaining edges, so the walk cannot cycle
        let mut side = true;

        while let Some(hedge) = self.choose_hedge(&v_hedges, v) {
            let hedge_twin = hedge.twin();
            tri_idx = hedge_twin.tri().idx; // the triangle in question is the one incident to the twin hedge
            v_hedges.clear(); // delete the old hedges, to only look at hedges for the current tri

            if side {
                v_hedges.push(hedge_twin.next());
                v_hedges.push(hedge_twin.prev());
            } else {
                v_hedges.push(hedge_twin.prev());
                v_hedges.push(hedge_twin.next());
            }

            side = !side;
        }

        Ok(tri_idx)
    }

    fn log_time(&self) {
        log::debug!("-------------------------------------------");
        log::debug!("Time elapsed:");
        log::debug!("Inserts computed in {} μs", self.time_inserting);
        log::debug!("Walks computed in {} μs", self.time_walking);
        log::debug!("Flips computed in {} μs", self.time_flipping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamtri_test_utils::{sample_clustered_2d, sample_vertices_2d};

    fn verify_triangulation(triangulation: &Triangulation) {
        assert_eq!(triangulation.is_delaunay_p(), 1.0);
        assert!(triangulation.is_sound());
    }

    const NUM_VERTICES_LIST: [usize; 7] = [3, 5, 10, 50, 100, 500, 1000];

    #[test]
    fn test_delaunay_2d() {
        for n in NUM_VERTICES_LIST {
            let vertices = sample_vertices_2d(n, None);

            let mut triangulation = Triangulation::new();
            triangulation.insert_vertices(&vertices, true).unwrap();

            verify_triangulation(&triangulation);
            assert_eq!(triangulation.num_used_vertices(), n);
        }
    }

    #[test]
    fn test_delaunay_2d_unsorted() {
        let vertices = sample_clustered_2d(300, 4, None);

        let mut triangulation = Triangulation::new();
        triangulation.insert_vertices(&vertices, false).unwrap();

        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_incremental_insertion() {
        let vertices = sample_vertices_2d(200, None);

        let mut triangulation = Triangulation::new();
        triangulation.insert_vertices(&vertices[..3], false).unwrap();
        for v in &vertices[3..] {
            triangulation.insert_vertex(*v, None).unwrap();
        }

        verify_triangulation(&triangulation);
        assert_eq!(triangulation.num_used_vertices(), 200);
    }

    #[test]
    fn test_duplicates_are_skipped() {
        let vertices = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.3, 0.3], [0.3, 0.3], [1.0, 0.0]];

        let mut triangulation = Triangulation::new();
        triangulation.insert_vertices(&vertices, false).unwrap();

        verify_triangulation(&triangulation);
        assert_eq!(triangulation.num_used_vertices(), 4);
        assert_eq!(triangulation.num_duplicate_vertices(), 2);
        assert_eq!(triangulation.num_casual_tris(), 3);
    }

    #[test]
    fn test_aligned_vertices() {
        let vertices = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];

        let mut triangulation = Triangulation::new();
        assert!(triangulation.insert_vertices(&vertices, false).is_err());
        assert!(Triangulation::new().insert_vertex([0.0, 0.0], None).is_err());
    }

    #[test]
    fn test_locate() {
        let vertices = vec![[0.0, 0.0], [4.0, 0.0], [0.0, 4.0], [4.0, 4.1]];

        let mut triangulation = Triangulation::new();
        triangulation.insert_vertices(&vertices, false).unwrap();

        for start in 0..triangulation.num_tris() {
            let tri_idx = triangulation.locate_vis_walk(&[1.0, 0.5], start).unwrap();
            let tri = triangulation.tds().get_tri(tri_idx).unwrap();
            assert!(tri.is_casual());
            assert!(tri.nodes().contains(&VertexNode::Casual(0)));
        }

        let outside = triangulation.locate_vis_walk(&[-3.0, 2.0], 0).unwrap();
        assert!(triangulation.tds().get_tri(outside).unwrap().is_conceptual());
    }
}
