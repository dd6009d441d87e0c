//! # Streamtri
//!
//! Streaming finalization of planar point clouds for out of core Delaunay triangulation.
//!
//! A sample of the stream is triangulated into a coarse mesh whose triangles are the cells of
//! the finalization. Every point of the stream is then routed through the cells whose
//! circumcircle contains it, and each cell is emitted, followed by a finalized marker, as soon as
//! no later point can fall into its circumcircle. A downstream triangulator reading the
//! finalized stream knows when a part of its mesh is done and can be written out.
//!
//! The crate ships the two planar incremental algorithms it needs: the triangulation engine
//! ([`Triangulation`]) and the finalizer ([`Finalizer`]), plus readers and writers for the
//! streaming mesh and point formats in [`io`].
#![forbid(unsafe_code)]

pub use coarse::{CoarseMesh, ReservoirSampler};
pub use finalizer::{Finalizer, FinalizerSettings, Phase};
pub use node::VertexNode;
pub use region::{Region, RegionBuffer, RegionTable, BUFFER_SIZE};
pub use traversal::{traverse, Topology, TraversalStats, Visit, Visitor};
pub use triangulation::Triangulation;
pub use utils::types::{RegionId, Vertex2, Vertex3};

pub mod coarse;
pub mod finalizer;
pub mod io;
mod node;
pub mod predicates;
pub mod region;
pub mod traversal;
pub mod triangulation;
mod trids;
pub mod utils;
