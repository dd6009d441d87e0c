//! Streaming finalization of the coarse cells.
//!
//! A session writes the coarse mesh, counts for every cell how many points of the stream
//! reach it, and then streams the points: each point is buffered in the cell that owns it,
//! and a cell is flushed to the point writer, followed by its finalized marker, as soon as the
//! last point reaching it has arrived.
//!
//! ```
//! use streamtri::{
//!     io::{BoundingBox, PointWriter, SmaWriter, SpaWriter},
//!     CoarseMesh, Finalizer, FinalizerSettings,
//! };
//!
//! let points = vec![[0.1, 0.2, 0.0], [0.8, 0.3, 0.0], [0.4, 0.9, 0.0], [0.6, 0.6, 0.0]];
//! let bb = BoundingBox::from_points(&points);
//! let sample: Vec<[f64; 2]> = points.iter().map(|p| [p[0], p[1]]).collect();
//!
//! let mesh = CoarseMesh::from_sample(&bb, &sample).unwrap();
//! let num_regions = mesh.num_regions();
//! let settings = FinalizerSettings::default().with_dimension(3);
//! let mut finalizer = Finalizer::new(mesh, SpaWriter::new(Vec::new()), settings).unwrap();
//!
//! finalizer.write_coarse_mesh(&mut SmaWriter::new(Vec::new())).unwrap();
//! finalizer.count_points(&points).unwrap();
//! finalizer.begin(points.len(), &bb).unwrap();
//! for p in &points {
//!     finalizer.insert_point(p).unwrap();
//! }
//! finalizer.close().unwrap();
//!
//! let writer = finalizer.into_writer();
//! assert_eq!(writer.npoints(), 4);
//! assert_eq!(writer.nfinalized(), num_regions);
//! ```

use anyhow::{anyhow, Ok as HowOk, Result as HowResult};

use crate::{
    coarse::CoarseMesh,
    io::{BoundingBox, Datatype, FinalizeMethod, MeshWriter, PointWriter},
    region::{Region, RegionTable},
    traversal::{traverse, Topology, TraversalStats, Visit, Visitor},
    utils::types::{HedgeIteratorIdx, RegionId, Vertex3},
};

pub const DEFAULT_SAMPLE_SIZE: usize = 1024;

/// Configuration of a finalization session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalizerSettings {
    /// Coordinates per written point, 2 or 3.
    pub dimension: usize,
    pub datatype: Datatype,
    /// Points drawn from the stream to build the coarse mesh.
    pub sample_size: usize,
    /// Seed of the sampling.
    pub seed: u64,
}

impl Default for FinalizerSettings {
    fn default() -> Self {
        Self {
            dimension: 2,
            datatype: Datatype::Float,
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: 0,
        }
    }
}

impl FinalizerSettings {
    pub const fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub const fn with_datatype(mut self, datatype: Datatype) -> Self {
        self.datatype = datatype;
        self
    }

    pub const fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    MeshWritten,
    Streaming,
    Closed,
}

/// Tallies how many traversals reach every region and how many points each region owns.
struct CountingPass;

impl Visitor for CountingPass {
    fn pre_visit(&mut self, region: &mut Region, visit: &Visit) -> HowResult<()> {
        region.count += 1;
        if visit.is_owner() {
            region.members += 1;
        }
        HowOk(())
    }
}

/// Buffers every point in its owner and flushes the regions no later point can reach.
struct ChunkingPass<'a, W: PointWriter> {
    writer: &'a mut W,
}

impl<W: PointWriter> Visitor for ChunkingPass<'_, W> {
    fn pre_visit(&mut self, region: &mut Region, visit: &Visit) -> HowResult<()> {
        region.seen += 1;
        if visit.is_owner() {
            region.push_point(visit.point, visit.generation)?;
        }
        HowOk(())
    }

    fn post_visit(&mut self, table: &mut RegionTable, id: RegionId, _: &Visit) -> HowResult<()> {
        if table.get(id).is_some_and(Region::is_complete) {
            finalize_region(table, &mut *self.writer, id)?;
        }
        HowOk(())
    }
}

/// Write the buffered points of a region followed by its marker, and retire it.
fn finalize_region<W: PointWriter + ?Sized>(
    table: &mut RegionTable,
    writer: &mut W,
    id: RegionId,
) -> HowResult<()> {
    let mut region = table.retire(id)?;
    let buffer = region.take_buffer();

    for p in buffer.iter() {
        writer.write_point(p)?;
    }
    writer.write_finalize_cell(id)?;

    log::trace!(
        "Finalized region {id} with {} points, last member at generation {}",
        buffer.len(),
        region.timestamp
    );
    HowOk(())
}

pub struct Finalizer<W: PointWriter> {
    mesh: CoarseMesh,
    writer: W,
    table: RegionTable,
    settings: FinalizerSettings,
    /// Generation of the last traversal, shared by both passes.
    timestamp: u64,
    /// Owner region of the last point.
    current: Option<RegionId>,
    phase: Phase,
    visits: usize,
    max_depth: usize,
    time_traversing: u128,
}

impl<W: PointWriter> Finalizer<W> {
    /// Start a session over the cells of `mesh`, writing points to `writer`.
    pub fn new(mesh: CoarseMesh, writer: W, settings: FinalizerSettings) -> HowResult<Self> {
        let mut table = RegionTable::new();
        for id in 0..RegionId::try_from(mesh.num_regions())? {
            let anchor = mesh
                .anchor(id)
                .ok_or_else(|| anyhow!("Region {id} has no anchor"))?;
            table.lookup_or_create(id, anchor)?;
        }

        log::debug!("Finalizer created with {} regions", table.len());

        HowOk(Self {
            mesh,
            writer,
            table,
            settings,
            timestamp: 0,
            current: None,
            phase: Phase::Created,
            visits: 0,
            max_depth: 0,
            time_traversing: 0,
        })
    }

    fn expect_phase(&self, allowed: &[Phase], operation: &str) -> HowResult<()> {
        if allowed.contains(&self.phase) {
            HowOk(())
        } else {
            Err(anyhow!(
                "Can't {operation} in the {:?} phase of the session",
                self.phase
            ))
        }
    }

    /// Write the coarse mesh, once, before any point.
    pub fn write_coarse_mesh<M: MeshWriter + ?Sized>(&mut self, writer: &mut M) -> HowResult<()> {
        self.expect_phase(&[Phase::Created], "write the coarse mesh")?;

        self.mesh.write(writer)?;
        writer.close()?;

        self.phase = Phase::MeshWritten;
        HowOk(())
    }

    /// Clear the tallies of the counting pass.
    pub fn reset_counts(&mut self) -> HowResult<()> {
        self.expect_phase(&[Phase::Created, Phase::MeshWritten], "reset the counts")?;

        for region in self.table.regions_mut() {
            region.reset_tallies();
        }
        HowOk(())
    }

    /// Count one point of the stream.
    pub fn count_point(&mut self, p: &Vertex3) -> HowResult<()> {
        self.expect_phase(&[Phase::Created, Phase::MeshWritten], "count points")?;

        let start = self.locate(p)?;
        self.run_traversal(p, start, &mut CountingPass)
    }

    /// Count a whole stream, replacing the tallies of an earlier count.
    pub fn count_points<'a>(
        &mut self,
        points: impl IntoIterator<Item = &'a Vertex3>,
    ) -> HowResult<usize> {
        self.reset_counts()?;

        let now = std::time::Instant::now();
        let mut npoints = 0;
        for p in points {
            self.count_point(p)?;
            npoints += 1;
        }

        log::debug!(
            "Counted {npoints} points in {} µs",
            now.elapsed().as_micros()
        );
        HowOk(npoints)
    }

    /// Number of points whose traversal reaches a live region.
    pub fn count_region(&self, id: RegionId) -> Option<usize> {
        self.table.get(id).map(|region| region.count)
    }

    /// Write the point stream header and finalize the regions no point reaches.
    pub fn begin(&mut self, npoints: usize, bb: &BoundingBox) -> HowResult<()> {
        if self.phase == Phase::Created {
            return Err(anyhow!(
                "The coarse mesh must be written before the point stream"
            ));
        }
        self.expect_phase(&[Phase::MeshWritten], "begin the point stream")?;

        self.writer.set_point_count(npoints);
        self.writer.set_bounding_box(bb);
        self.writer.set_datatype(self.settings.datatype);
        self.writer.set_dimension(self.settings.dimension)?;
        self.writer
            .set_finalization_method(FinalizeMethod::Clarkson2d);
        self.writer.write_header()?;

        self.phase = Phase::Streaming;

        let mut empty = 0;
        for id in self.table.ids() {
            if self.table.get(id).is_some_and(|region| region.count == 0) {
                finalize_region(&mut self.table, &mut self.writer, id)?;
                empty += 1;
            }
        }

        log::debug!(
            "Streaming {npoints} points, {empty} empty regions finalized, {} live",
            self.table.len()
        );
        HowOk(())
    }

    /// Buffer a point and flush the regions it completes.
    ///
    /// The point is finalized in the xy plane, its z is kept in the output.
    pub fn insert_point(&mut self, p: &Vertex3) -> HowResult<()> {
        self.expect_phase(&[Phase::Streaming], "insert points")?;

        let start = self.locate(p)?;
        let mut pass = ChunkingPass {
            writer: &mut self.writer,
        };

        self.timestamp += 1;
        let now = std::time::Instant::now();
        let stats = traverse(
            &self.mesh,
            &mut self.table,
            self.timestamp,
            p,
            start,
            &mut pass,
        )?;
        self.time_traversing += now.elapsed().as_micros();

        self.record(stats);
        HowOk(())
    }

    /// Force the remaining regions through finalization and close the point writer.
    pub fn close(&mut self) -> HowResult<()> {
        self.expect_phase(&[Phase::Streaming], "close")?;

        let remaining = self.table.ids();
        for &id in &remaining {
            if let Some(region) = self.table.get(id) {
                if region.seen < region.count {
                    log::warn!(
                        "Region {id} expected {} points but saw {}",
                        region.count,
                        region.seen
                    );
                }
            }
            finalize_region(&mut self.table, &mut self.writer, id)?;
        }
        self.writer.close()?;
        self.phase = Phase::Closed;

        log::debug!("-------------------------------------------");
        log::debug!("Finalization closed:");
        log::debug!("{} regions forced at close", remaining.len());
        log::debug!("{} region visits, max depth {}", self.visits, self.max_depth);
        log::debug!("Traversals computed in {} µs", self.time_traversing);
        HowOk(())
    }

    /// Hand out the point writer, usually after [`Finalizer::close`].
    pub fn into_writer(self) -> W {
        self.writer
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn mesh(&self) -> &CoarseMesh {
        &self.mesh
    }

    pub const fn writer(&self) -> &W {
        &self.writer
    }

    pub fn num_live_regions(&self) -> usize {
        self.table.len()
    }

    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Locate `p`, walking from the region of the previous point.
    fn locate(&mut self, p: &Vertex3) -> HowResult<HedgeIteratorIdx> {
        // a retired region is no longer in the table
        let hint = self.current.and_then(|id| {
            self.table
                .get(id)
                .map(|region| region.tri)
                .or_else(|| self.mesh.anchor(id))
        });
        let start = self.mesh.locate(&[p[0], p[1]], hint)?;

        self.current = self.mesh.region_of(start);
        HowOk(start)
    }

    fn run_traversal<V: Visitor>(
        &mut self,
        p: &Vertex3,
        start: HedgeIteratorIdx,
        visitor: &mut V,
    ) -> HowResult<()> {
        self.timestamp += 1;

        let now = std::time::Instant::now();
        let stats = traverse(
            &self.mesh,
            &mut self.table,
            self.timestamp,
            p,
            start,
            visitor,
        )?;
        self.time_traversing += now.elapsed().as_micros();

        self.record(stats);
        HowOk(())
    }

    fn record(&mut self, stats: TraversalStats) {
        self.visits += stats.visited;
        self.max_depth = self.max_depth.max(stats.max_depth);
    }
}
