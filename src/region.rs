//! Bookkeeping of the coarse cells that are still live in a finalization session.
//!
//! Every [`Region`] owns a [`RegionBuffer`], a chain of page sized point chunks. The
//! [`RegionTable`] holds a region only while it is unfinalized, retiring it removes it for good.

use core::mem;

use anyhow::{anyhow, Ok as HowOk, Result as HowResult};
use rustc_hash::FxHashMap;

use crate::utils::types::{HedgeIteratorIdx, RegionId, Vertex3};

/// Number of points in a full buffer chunk, so that one chunk fills a 4 KiB page.
pub const BUFFER_SIZE: usize = 4096 / mem::size_of::<Vertex3>();

#[derive(Debug)]
struct Chunk {
    points: Vec<Vertex3>,
    limit: usize,
}

impl Chunk {
    fn allocate(limit: usize) -> HowResult<Self> {
        let mut points = Vec::new();
        points
            .try_reserve_exact(limit)
            .map_err(|err| anyhow!("Failed to allocate a buffer chunk of {limit} points: {err}"))?;

        HowOk(Self { points, limit })
    }

    fn is_full(&self) -> bool {
        self.points.len() >= self.limit
    }
}

/// Ordered points of one region, stored in chunks of at most [`BUFFER_SIZE`] points.
///
/// A chunk is sized by the points the region still expects, so a region whose member count
/// is known up front never over-allocates. Points beyond the expectation get full chunks.
#[derive(Debug, Default)]
pub struct RegionBuffer {
    chunks: Vec<Chunk>,
    len: usize,
    expected: usize,
}

impl RegionBuffer {
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            expected: 0,
        }
    }

    pub const fn with_expected(expected: usize) -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            expected,
        }
    }

    /// Set the number of points the buffer will eventually hold.
    pub fn set_expected(&mut self, expected: usize) {
        self.expected = expected;
    }

    /// Capacity of the next chunk to allocate.
    fn next_chunk_limit(&self) -> usize {
        if self.len < self.expected {
            (self.expected - self.len).min(BUFFER_SIZE)
        } else {
            BUFFER_SIZE
        }
    }

    /// Append a point, allocating a new chunk if the last one is full.
    ///
    /// Fails if the chunk can not be allocated.
    pub fn push(&mut self, point: Vertex3) -> HowResult<()> {
        let limit = self.next_chunk_limit();

        match self.chunks.last_mut() {
            Some(chunk) if !chunk.is_full() => chunk.points.push(point),
            _ => {
                let mut chunk = Chunk::allocate(limit)?;
                chunk.points.push(point);
                self.chunks.push(chunk);
            }
        }
        self.len += 1;

        HowOk(())
    }

    /// Iterate over the points in insertion order, chunk by chunk.
    pub fn iter(&self) -> impl Iterator<Item = &Vertex3> {
        self.chunks.iter().flat_map(|chunk| chunk.points.iter())
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Capacity of every chunk, in chain order.
    pub fn chunk_limits(&self) -> Vec<usize> {
        self.chunks.iter().map(|chunk| chunk.limit).collect()
    }
}

/// The live record of one coarse cell.
#[derive(Debug)]
pub struct Region {
    pub id: RegionId,
    /// Anchor half-edge of the cell in the coarse mesh.
    pub tri: HedgeIteratorIdx,
    /// Generation of the last traversal that buffered a member point.
    pub timestamp: u64,
    /// Generation of the last traversal that entered the region.
    pub visited: u64,
    /// Points whose traversal reaches the region, tallied by the counting pass.
    pub count: usize,
    /// Points owned by the region, tallied by the counting pass.
    pub members: usize,
    /// Points whose traversal reached the region during the chunking pass.
    pub seen: usize,
    buffer: RegionBuffer,
}

impl Region {
    pub const fn new(id: RegionId, tri: HedgeIteratorIdx) -> Self {
        Self {
            id,
            tri,
            timestamp: 0,
            visited: 0,
            count: 0,
            members: 0,
            seen: 0,
            buffer: RegionBuffer::new(),
        }
    }

    /// Buffer a member point found by the traversal of `generation`.
    pub fn push_point(&mut self, point: Vertex3, generation: u64) -> HowResult<()> {
        self.buffer.set_expected(self.members);
        self.buffer.push(point)?;
        self.timestamp = generation;

        HowOk(())
    }

    pub const fn buffer(&self) -> &RegionBuffer {
        &self.buffer
    }

    /// Move the buffer out of the region, leaving an empty one behind.
    pub fn take_buffer(&mut self) -> RegionBuffer {
        mem::take(&mut self.buffer)
    }

    /// No point that is still to come can reach the region.
    pub const fn is_complete(&self) -> bool {
        self.seen >= self.count
    }

    pub fn reset_tallies(&mut self) {
        self.count = 0;
        self.members = 0;
    }
}

/// Live regions keyed by their [`RegionId`].
#[derive(Debug, Default)]
pub struct RegionTable {
    live: FxHashMap<RegionId, Region>,
    /// Retired ids with the generation that last visited them.
    retired: FxHashMap<RegionId, u64>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live region `id`, creating it anchored at `tri` if it does not exist yet.
    ///
    /// A retired region is never created again.
    pub fn lookup_or_create(
        &mut self,
        id: RegionId,
        tri: HedgeIteratorIdx,
    ) -> HowResult<&mut Region> {
        if self.retired.contains_key(&id) {
            return Err(anyhow!("Region {id} is already finalized!"));
        }

        HowOk(self.live.entry(id).or_insert_with(|| Region::new(id, tri)))
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.live.get_mut(&id)
    }

    pub fn is_live(&self, id: RegionId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn is_retired(&self, id: RegionId) -> bool {
        self.retired.contains_key(&id)
    }

    /// The generation that last visited a retired region.
    pub fn retired_visit(&self, id: RegionId) -> Option<u64> {
        self.retired.get(&id).copied()
    }

    /// Remove a live region from the table, handing it to the caller.
    pub fn retire(&mut self, id: RegionId) -> HowResult<Region> {
        let region = self
            .live
            .remove(&id)
            .ok_or_else(|| anyhow!("Region {id} is not live and can not be retired!"))?;
        self.retired.insert(id, region.visited);

        HowOk(region)
    }

    /// Ids of all live regions, ascending.
    pub fn ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn regions_mut(&mut self) -> impl Iterator<Item = &mut Region> {
        self.live.values_mut()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn num_retired(&self) -> usize {
        self.retired.len()
    }
}
