use crate::utils::types::VertexIdx;
use core::fmt;

/// A dcel / half-edge vertex node.
///
/// A `casual node` has an index into the vertex list of the triangulation.
///
/// A `conceptual node` is at infinity. Triangles incident to it close the convex hull,
/// the finalizer treats them as the mesh boundary.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum VertexNode {
    Casual(VertexIdx),
    Conceptual,
}

impl VertexNode {
    /// Get the index of the node.
    pub const fn idx(&self) -> Option<VertexIdx> {
        match self {
            VertexNode::Casual(idx) => Some(*idx),
            VertexNode::Conceptual => None,
        }
    }

    /// Check if the node is conceptual.
    pub const fn is_conceptual(&self) -> bool {
        matches!(self, VertexNode::Conceptual)
    }

    pub const fn is_casual(&self) -> bool {
        !self.is_conceptual()
    }
}

impl fmt::Display for VertexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexNode::Casual(v_idx) => write!(f, "Casual({})", v_idx),
            VertexNode::Conceptual => write!(f, "Conceptual"),
        }
    }
}
