//! Bowyer–Watson depth-first traversal over the coarse cells.
//!
//! Starting at the cell that owns a point, the traversal enters every neighbouring cell whose
//! circumcircle strictly contains the point, i.e. the cells a Delaunay insertion of the point
//! would be in conflict with. A cell is entered at most once per generation.

use anyhow::{anyhow, Result};

use crate::{
    predicates::in_circumcircle,
    region::{Region, RegionTable},
    utils::types::{HedgeIteratorIdx, RegionId, Triangle2, Vertex2, Vertex3},
};

/// Read only access to the cells of a triangulation, addressed by half-edge handles.
pub trait Topology {
    /// The handle of the cell owning `p`, the walk starts at `hint` if given.
    fn locate(&self, p: &Vertex2, hint: Option<HedgeIteratorIdx>) -> Result<HedgeIteratorIdx>;

    /// The handle of the same edge seen from the neighbouring triangle, `None` at the boundary.
    fn across(&self, hedge: HedgeIteratorIdx) -> Option<HedgeIteratorIdx>;

    /// The next edge of the same triangle.
    fn rotate(&self, hedge: HedgeIteratorIdx) -> HedgeIteratorIdx;

    /// The vertex opposite to the edge, `None` for the vertex at infinity.
    fn apex(&self, hedge: HedgeIteratorIdx) -> Option<Vertex2>;

    /// The region of the triangle, `None` if it is not a cell.
    fn region_of(&self, hedge: HedgeIteratorIdx) -> Option<RegionId>;

    fn triangle(&self, hedge: HedgeIteratorIdx) -> Option<Triangle2> {
        let next = self.rotate(hedge);
        let last = self.rotate(next);

        Some([self.apex(hedge)?, self.apex(next)?, self.apex(last)?])
    }

    /// Checks if `p` lies strictly inside the circumcircle of the triangle.
    fn in_conflict(&self, hedge: HedgeIteratorIdx, p: &Vertex2) -> bool {
        self.triangle(hedge)
            .is_some_and(|[a, b, c]| in_circumcircle(&a, &b, &c, p))
    }
}

/// What a visitor learns about the current traversal step.
#[derive(Debug, Clone, Copy)]
pub struct Visit {
    pub point: Vertex3,
    pub generation: u64,
    /// `0` for the owner cell.
    pub depth: usize,
}

impl Visit {
    pub const fn is_owner(&self) -> bool {
        self.depth == 0
    }
}

pub trait Visitor {
    /// Called once when the traversal enters a region.
    fn pre_visit(&mut self, region: &mut Region, visit: &Visit) -> Result<()>;

    /// Called after every neighbour of the region has been examined.
    fn post_visit(&mut self, table: &mut RegionTable, id: RegionId, visit: &Visit) -> Result<()> {
        let _ = (table, id, visit);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraversalStats {
    pub visited: usize,
    pub max_depth: usize,
}

struct Frame {
    id: RegionId,
    /// Next edge to examine.
    hedge: HedgeIteratorIdx,
    remaining_edges: u8,
    depth: usize,
}

/// Depth-first traversal of the regions in conflict with `point`, starting at `start`.
///
/// The region of `start` is always entered. Boundary edges, triangles without region,
/// retired regions and regions already visited in `generation` end a branch.
pub fn traverse<T: Topology + ?Sized, V: Visitor>(
    topology: &T,
    table: &mut RegionTable,
    generation: u64,
    point: &Vertex3,
    start: HedgeIteratorIdx,
    visitor: &mut V,
) -> Result<TraversalStats> {
    let p = [point[0], point[1]];
    let mut stats = TraversalStats::default();

    let start_id = topology
        .region_of(start)
        .ok_or_else(|| anyhow!("Traversal must start in a region, hedge {start} has none"))?;
    let region = table
        .get_mut(start_id)
        .ok_or_else(|| anyhow!("Point {point:?} is owned by the finalized region {start_id}"))?;

    enter(region, generation, point, 0, visitor)?;
    stats.visited += 1;

    let mut stack = vec![Frame {
        id: start_id,
        hedge: start,
        remaining_edges: 3,
        depth: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.remaining_edges == 0 {
            let (id, depth) = (frame.id, frame.depth);
            stack.pop();

            let visit = Visit {
                point: *point,
                generation,
                depth,
            };
            visitor.post_visit(table, id, &visit)?;
            continue;
        }

        let hedge = frame.hedge;
        let depth = frame.depth + 1;
        frame.hedge = topology.rotate(hedge);
        frame.remaining_edges -= 1;

        let Some(neighbour) = topology.across(hedge) else {
            continue; // boundary
        };
        let Some(id) = topology.region_of(neighbour) else {
            continue;
        };

        let Some(region) = table.get_mut(id) else {
            if table.retired_visit(id) != Some(generation) && topology.in_conflict(neighbour, &p)
            {
                log::warn!("Point {point:?} is in conflict with the finalized region {id}");
            }
            continue;
        };

        if region.visited == generation || !topology.in_conflict(neighbour, &p) {
            continue;
        }

        enter(region, generation, point, depth, visitor)?;
        stats.visited += 1;
        stats.max_depth = stats.max_depth.max(depth);

        stack.push(Frame {
            id,
            hedge: topology.rotate(neighbour),
            remaining_edges: 2, // the edge we came from leads back to a visited region
            depth,
        });
    }

    Ok(stats)
}

fn enter<V: Visitor>(
    region: &mut Region,
    generation: u64,
    point: &Vertex3,
    depth: usize,
    visitor: &mut V,
) -> Result<()> {
    debug_assert_ne!(
        region.visited, generation,
        "Region {} entered twice in one traversal",
        region.id
    );
    region.visited = generation;

    let visit = Visit {
        point: *point,
        generation,
        depth,
    };
    visitor.pre_visit(region, &visit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarse::CoarseMesh;

    #[derive(Default)]
    struct Recorder {
        pre: Vec<(RegionId, usize)>,
        post: Vec<RegionId>,
    }

    impl Visitor for Recorder {
        fn pre_visit(&mut self, region: &mut Region, visit: &Visit) -> Result<()> {
            self.pre.push((region.id, visit.depth));
            Ok(())
        }

        fn post_visit(&mut self, _: &mut RegionTable, id: RegionId, _: &Visit) -> Result<()> {
            self.post.push(id);
            Ok(())
        }
    }

    // a fan of triangles around the origin
    fn hexagon() -> CoarseMesh {
        let mut points = vec![[0.0, 0.0]];
        for i in 0..6 {
            let angle = std::f64::consts::PI / 3.0 * i as f64 + 0.1;
            points.push([10.0 * angle.cos(), 10.0 * angle.sin()]);
        }
        CoarseMesh::from_points(&points).unwrap()
    }

    fn full_table(mesh: &CoarseMesh) -> RegionTable {
        let mut table = RegionTable::new();
        for id in 0..mesh.num_regions() as RegionId {
            table.lookup_or_create(id, mesh.anchor(id).unwrap()).unwrap();
        }
        table
    }

    #[test]
    fn test_visits_conflicting_regions_once() {
        let mesh = hexagon();
        let mut table = full_table(&mesh);
        let point = [0.3, 0.2, 0.0];

        let start = mesh.locate(&[point[0], point[1]], None).unwrap();
        let mut recorder = Recorder::default();
        let stats = traverse(&mesh, &mut table, 1, &point, start, &mut recorder).unwrap();

        // the owner first, post visits in reverse nesting order
        assert_eq!(recorder.pre[0], (mesh.region_of(start).unwrap(), 0));
        assert_eq!(recorder.post.last(), Some(&recorder.pre[0].0));
        assert_eq!(recorder.pre.len(), recorder.post.len());
        assert_eq!(stats.visited, recorder.pre.len());

        let mut ids: Vec<RegionId> = recorder.pre.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), recorder.pre.len());

        // exactly the regions whose circumcircle contains the point, besides the owner
        let p = [point[0], point[1]];
        for id in 0..mesh.num_regions() as RegionId {
            let anchor = mesh.anchor(id).unwrap();
            let expected = id == recorder.pre[0].0 || mesh.in_conflict(anchor, &p);
            assert_eq!(ids.contains(&id), expected, "region {id}");
        }
        assert!(stats.max_depth >= 1);
    }

    #[test]
    fn test_generation_guard() {
        let mesh = hexagon();
        let mut table = full_table(&mesh);
        let point = [0.3, 0.2, 0.0];
        let start = mesh.locate(&[0.3, 0.2], None).unwrap();

        let mut first = Recorder::default();
        traverse(&mesh, &mut table, 1, &point, start, &mut first).unwrap();

        // a new generation sees the same regions again
        let mut second = Recorder::default();
        traverse(&mesh, &mut table, 2, &point, start, &mut second).unwrap();
        assert_eq!(first.pre, second.pre);

        for region in table.regions_mut() {
            let entered = first.pre.iter().any(|(id, _)| *id == region.id);
            assert_eq!(region.visited == 2, entered);
        }
    }

    #[test]
    fn test_retired_regions_end_the_branch() {
        let mesh = hexagon();
        let mut table = full_table(&mesh);
        let point = [0.3, 0.2, 0.0];
        let start = mesh.locate(&[0.3, 0.2], None).unwrap();
        let owner = mesh.region_of(start).unwrap();

        for id in 0..mesh.num_regions() as RegionId {
            if id != owner {
                table.retire(id).unwrap();
            }
        }

        let mut recorder = Recorder::default();
        let stats = traverse(&mesh, &mut table, 1, &point, start, &mut recorder).unwrap();
        assert_eq!(recorder.pre, vec![(owner, 0)]);
        assert_eq!(stats.max_depth, 0);

        table.retire(owner).unwrap();
        assert!(traverse(&mesh, &mut table, 2, &point, start, &mut recorder).is_err());
    }
}
