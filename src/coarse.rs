//! The coarse mesh whose cells are the units of finalization.
//!
//! It is the Delaunay triangulation of a frame around the bounding box of the stream plus a
//! sample of its points. Every finite triangle is a cell with a stable [`RegionId`], assigned
//! once in triangle order and used as the triangle index of the written mesh.

use core::cmp;

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};
use nalgebra::Vector2;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    io::{BoundingBox, MeshWriter},
    predicates::orient_2d_exact,
    traversal::Topology,
    trids::hedge_iterator::HedgeIterator,
    utils::types::{HedgeIteratorIdx, RegionId, Vertex2, Vertex3},
    Triangulation, VertexNode,
};

/// Share of the larger bounding box extent added on every side of the frame.
pub const FRAME_MARGIN: f64 = 0.1;

pub struct CoarseMesh {
    triangulation: Triangulation,
    /// Region of every triangle, `None` for the conceptual ones.
    regions: Vec<Option<RegionId>>,
    /// Anchor half-edge of every region.
    anchors: Vec<HedgeIteratorIdx>,
}

impl CoarseMesh {
    /// Triangulate `points` and number the finite triangles.
    pub fn from_points(points: &[Vertex2]) -> HowResult<Self> {
        let now = std::time::Instant::now();

        let mut triangulation = Triangulation::new();
        triangulation
            .insert_vertices(points, true)
            .context("Can't triangulate the coarse mesh")?;

        let tds = triangulation.tds();
        let mut regions = vec![None; tds.num_tris()];
        let mut anchors = Vec::with_capacity(tds.num_casual_tris());

        for tri in tds.casual_tris() {
            let id = RegionId::try_from(anchors.len())?;
            regions[tri.idx()] = Some(id);
            anchors.push(tri.hedges()[0].idx);
        }

        log::debug!(
            "Coarse mesh with {} regions built in {} µs",
            anchors.len(),
            now.elapsed().as_micros()
        );

        HowOk(Self {
            triangulation,
            regions,
            anchors,
        })
    }

    /// Build the coarse mesh of a stream from its bounding box and a sample of its points.
    ///
    /// The corners of the expanded bounding box are added, so every point of the box lies
    /// inside the mesh. Sample points outside the frame are dropped.
    ///
    /// An empty stream gets the frame of the unit square.
    pub fn from_sample(bb: &BoundingBox, sample: &[Vertex2]) -> HowResult<Self> {
        let frame = if bb.is_empty() {
            log::debug!("Empty bounding box, using the frame of the unit square");
            frame_corners(&BoundingBox::new([0.0; 3], [1.0, 1.0, 0.0]))
        } else {
            frame_corners(bb)
        };
        let [lo, _, hi, _] = frame;

        let mut points = Vec::with_capacity(sample.len() + 4);
        points.extend_from_slice(&frame);

        for p in sample {
            if lo[0] < p[0] && p[0] < hi[0] && lo[1] < p[1] && p[1] < hi[1] {
                points.push(*p);
            } else {
                log::warn!("Dropping sample point {p:?} outside of the frame");
            }
        }

        Self::from_points(&points)
    }

    pub fn num_regions(&self) -> usize {
        self.anchors.len()
    }

    /// Anchor half-edge of a region.
    pub fn anchor(&self, id: RegionId) -> Option<HedgeIteratorIdx> {
        self.anchors.get(id as usize).copied()
    }

    pub const fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    fn hedge(&self, idx: HedgeIteratorIdx) -> HedgeIterator<'_> {
        HedgeIterator::new(self.triangulation.tds(), idx)
    }

    fn position(&self, node: VertexNode) -> Option<Vertex2> {
        node.idx().map(|idx| self.triangulation.vertices()[idx])
    }

    /// Orientation of `p` relative to a casual hedge, `Greater` on its inner side.
    fn side_of(&self, hedge: &HedgeIterator<'_>, p: &Vertex2) -> HowResult<cmp::Ordering> {
        match (
            self.position(hedge.starting_node()),
            self.position(hedge.end_node()),
        ) {
            (Some(a), Some(b)) => HowOk(orient_2d_exact(&a, &b, p)),
            _ => Err(anyhow!("{hedge} is not a finite edge")),
        }
    }

    /// The region owning `p`: the lowest id among the cells whose closure contains it.
    fn owner_of(&self, p: &Vertex2, hint: Option<HedgeIteratorIdx>) -> HowResult<RegionId> {
        let start = hint
            .or_else(|| self.anchors.first().copied())
            .map_or(0, |hedge| hedge / 3);

        let tri_idx = self.triangulation.locate_vis_walk(p, start)?;
        let tri = self.triangulation.tds().get_tri(tri_idx)?;

        // a walk ending in a conceptual triangle continues across its hull edge
        let base = if tri.is_conceptual() {
            let hull = tri
                .hedges()
                .into_iter()
                .find(|hedge| !hedge.is_conceptual())
                .ok_or_else(|| anyhow!("{tri} has no finite edge"))?
                .twin();

            if self.side_of(&hull, p)? == cmp::Ordering::Less {
                return Err(anyhow!("Point {p:?} lies outside of the coarse mesh"));
            }
            hull
        } else {
            tri.hedges()[0]
        };

        let hedges = [base, base.next(), base.prev()];
        let mut candidates = Vec::with_capacity(6);

        if let Some(corner) = hedges
            .iter()
            .find(|hedge| self.position(hedge.starting_node()) == Some(*p))
        {
            // on a coarse vertex, every cell of the fan around it
            let mut hedge = *corner;
            loop {
                candidates.extend(self.regions[hedge.tri().idx()]);
                hedge = hedge.prev().twin();
                if hedge.idx == corner.idx {
                    break;
                }
            }
        } else {
            candidates.extend(self.regions[base.tri().idx()]);

            for hedge in &hedges {
                if self.side_of(hedge, p)? == cmp::Ordering::Equal {
                    candidates.extend(self.regions[hedge.twin().tri().idx()]);
                }
            }
        }

        candidates
            .into_iter()
            .min()
            .ok_or_else(|| anyhow!("No region contains the point {p:?}"))
    }

    /// Write the frame and sample vertices and one triangle per region, in region order.
    pub fn write<M: MeshWriter + ?Sized>(&self, writer: &mut M) -> HowResult<()> {
        let vertices = self.triangulation.vertices();

        let mut used = self.triangulation.used_vertices().to_vec();
        used.sort_unstable();

        let mut remap = vec![None; vertices.len()];
        let mut out_vertices: Vec<Vertex3> = Vec::with_capacity(used.len());
        for v_idx in used {
            remap[v_idx] = Some(u32::try_from(out_vertices.len())?);
            out_vertices.push([vertices[v_idx][0], vertices[v_idx][1], 0.0]);
        }

        writer.set_vertex_count(out_vertices.len());
        writer.set_face_count(self.anchors.len());
        writer.set_bounding_box(&BoundingBox::from_points(&out_vertices));

        for v in &out_vertices {
            writer.write_vertex(v)?;
        }

        for &anchor in &self.anchors {
            let nodes = self.hedge(anchor).tri().nodes();

            let mut tri = [0u32; 3];
            for (out, node) in tri.iter_mut().zip(nodes) {
                *out = node
                    .idx()
                    .and_then(|idx| remap[idx])
                    .ok_or_else(|| anyhow!("Region triangle references unknown vertex {node}"))?;
            }
            writer.write_triangle(&tri)?;
        }

        HowOk(())
    }
}

impl Topology for CoarseMesh {
    fn locate(&self, p: &Vertex2, hint: Option<HedgeIteratorIdx>) -> HowResult<HedgeIteratorIdx> {
        let id = self.owner_of(p, hint)?;
        self.anchor(id)
            .ok_or_else(|| anyhow!("Region {id} has no anchor"))
    }

    fn across(&self, hedge: HedgeIteratorIdx) -> Option<HedgeIteratorIdx> {
        let twin = self.hedge(hedge).twin();
        twin.tri().is_casual().then_some(twin.idx)
    }

    fn rotate(&self, hedge: HedgeIteratorIdx) -> HedgeIteratorIdx {
        self.hedge(hedge).next().idx
    }

    fn apex(&self, hedge: HedgeIteratorIdx) -> Option<Vertex2> {
        self.position(self.hedge(hedge).apex())
    }

    fn region_of(&self, hedge: HedgeIteratorIdx) -> Option<RegionId> {
        self.regions.get(hedge / 3).copied().flatten()
    }
}

/// Corners of the expanded bounding box in the xy plane, counter-clockwise from the minimum.
pub fn frame_corners(bb: &BoundingBox) -> [Vertex2; 4] {
    let min = Vector2::new(bb.min[0], bb.min[1]);
    let max = Vector2::new(bb.max[0], bb.max[1]);

    let margin = ((max - min).amax() * FRAME_MARGIN).max(1.0);
    let lo = min.add_scalar(-margin);
    let hi = max.add_scalar(margin);

    [[lo.x, lo.y], [hi.x, lo.y], [hi.x, hi.y], [lo.x, hi.y]]
}

/// Uniform sample of fixed size over a stream of unknown length (reservoir sampling).
pub struct ReservoirSampler {
    rng: StdRng,
    capacity: usize,
    seen: usize,
    sample: Vec<Vertex2>,
}

impl ReservoirSampler {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            capacity,
            seen: 0,
            sample: Vec::with_capacity(capacity),
        }
    }

    pub fn offer(&mut self, p: Vertex2) {
        if self.sample.len() < self.capacity {
            self.sample.push(p);
        } else {
            let slot = self.rng.random_range(0..=self.seen);
            if slot < self.capacity {
                self.sample[slot] = p;
            }
        }
        self.seen += 1;
    }

    /// Points offered so far.
    pub const fn seen(&self) -> usize {
        self.seen
    }

    pub fn into_sample(self) -> Vec<Vertex2> {
        self.sample
    }
}
