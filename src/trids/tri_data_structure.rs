use super::{hedge_iterator::HedgeIterator, tri_iterator::TriIterator};
use crate::{
    utils::types::{HedgeIteratorIdx, TriIteratorIdx, VertexIdx},
    VertexNode,
};

use anyhow::{Ok as HowOk, Result as HowResult};

/// A 2D triangulation data structure.
///
/// The edges are stored in a doubly-connected edge list (DCEL) manner.
///
/// ```ignore
/// i   --> hedge0 \
/// |        |       \
/// v        v        |
/// i+1 --> hedge1 ---|-->  triangle
/// |        |        |
/// v        v       /
/// i+2 --> hedge2 /
/// ```
//
// where:
// `hedge2 = next(he1)`,
// `hedge3 = next(he2)`,
// `hedge1 = next(he3)`
//
// Triangles are never removed, flips overwrite them in place. A triangle index is therefore
// stable for as long as no vertex is inserted, which is what the coarse mesh relies on.
#[derive(Debug, Default)]
pub struct TriDataStructure {
    /// The first node is stored, the last can be obtained via `% 3`
    pub(crate) hedge_starting_nodes: Vec<VertexNode>,
    pub(crate) hedge_twins: Vec<HedgeIteratorIdx>,
    num_tris: usize,
}

impl TriDataStructure {
    pub const fn new() -> Self {
        Self {
            hedge_starting_nodes: Vec::new(),
            hedge_twins: Vec::new(),
            num_tris: 0,
        }
    }

    /// Add a triangle to the triangulation and retrieve the hedge indices.
    fn add_tri(
        &mut self,
        vertex_nodes: [VertexNode; 3],
    ) -> (HedgeIteratorIdx, HedgeIteratorIdx, HedgeIteratorIdx) {
        let hedge_idx0 = self.hedge_starting_nodes.len();

        self.hedge_starting_nodes.extend_from_slice(&vertex_nodes);

        self.num_tris += 1;

        (hedge_idx0, hedge_idx0 + 1, hedge_idx0 + 2)
    }

    /// Insert the initial, counter-clockwise triangle and close it with three conceptual triangles.
    pub fn add_init_tri(&mut self, v_idxs: [VertexIdx; 3]) -> HowResult<[TriIterator<'_>; 4]> {
        if self.num_tris() > 0 {
            return Err(anyhow::Error::msg(
                "Triangulation already contains triangles!",
            ));
        }

        let a = VertexNode::Casual(v_idxs[0]);
        let b = VertexNode::Casual(v_idxs[1]);
        let c = VertexNode::Casual(v_idxs[2]);
        let n_inf = VertexNode::Conceptual;

        // the casual triangle plus one conceptual triangle per edge, glued along the reversed edges
        let (hedge01, hedge12, hedge20) = self.add_tri([a, b, c]);
        let (hedgei2, hedge21, hedge1i) = self.add_tri([n_inf, c, b]);
        let (hedge2i, hedgei0, hedge02) = self.add_tri([c, n_inf, a]);
        let (hedge10, hedge0i, hedgei1) = self.add_tri([b, a, n_inf]);

        self.hedge_twins.extend_from_slice(&[
            hedge10, hedge21, hedge02, // abc
            hedge2i, hedge12, hedgei1, // icb
            hedgei2, hedge0i, hedge20, // cia
            hedge01, hedgei0, hedge1i, // bai
        ]);

        HowOk([
            TriIterator::new(self, 0),
            TriIterator::new(self, 1),
            TriIterator::new(self, 2),
            TriIterator::new(self, 3),
        ])
    }

    /// Insert a vertex `d` into an existing triangle `abc`; called the `1 -> 3 flip`, as it deletes the triangle and creates three new ones.
    pub fn flip_1_to_3(
        &mut self,
        idx_to_remove: TriIteratorIdx,
        v_idx: VertexIdx,
    ) -> HowResult<[TriIterator<'_>; 3]> {
        if idx_to_remove >= self.num_tris() {
            return Err(anyhow::Error::msg("Triangle index out of bounds!"));
        }

        let hedge_ab = idx_to_remove * 3;
        let hedge_bc = hedge_ab + 1;
        let hedge_ca = hedge_ab + 2;

        let a = self.hedge_starting_nodes[hedge_ab];
        let b = self.hedge_starting_nodes[hedge_bc];
        let c = self.hedge_starting_nodes[hedge_ca];

        let d = VertexNode::Casual(v_idx);

        let hedge_ba = self.hedge_twins[hedge_ab];
        let hedge_cb = self.hedge_twins[hedge_bc];
        let hedge_ac = self.hedge_twins[hedge_ca];

        let (hedge_ab, hedge_bd, hedge_da) = self.replace_tri(idx_to_remove, [a, b, d]);
        let (hedge_bc, hedge_cd, hedge_db) = self.add_tri([b, c, d]);
        let (hedge_ca, hedge_ad, hedge_dc) = self.add_tri([c, a, d]);

        self.hedge_twins[hedge_ba] = hedge_ab;
        self.hedge_twins[hedge_cb] = hedge_bc;
        self.hedge_twins[hedge_ac] = hedge_ca;
        self.hedge_twins[hedge_ab] = hedge_ba;
        self.hedge_twins[hedge_bd] = hedge_db;
        self.hedge_twins[hedge_da] = hedge_ad;
        self.hedge_twins
            .extend_from_slice(&[hedge_cb, hedge_dc, hedge_bd, hedge_ac, hedge_da, hedge_cd]);

        HowOk([
            TriIterator::new(self, idx_to_remove),
            TriIterator::new(self, self.num_tris() - 2),
            TriIterator::new(self, self.num_tris() - 1),
        ])
    }

    /// Flips an edge that internally connects two triangles to an edge that connects the other two triangles.
    pub fn flip_2_to_2(&mut self, idx: HedgeIteratorIdx) -> HowResult<[TriIterator<'_>; 2]> {
        if idx >= self.hedge_twins.len() {
            return Err(anyhow::Error::msg("Hedge index out of bounds!"));
        }

        let hedge_twin_idx = self.hedge_twins[idx];

        let tri1_idx = idx / 3;
        let tri2_idx = hedge_twin_idx / 3;

        // the two edges following the flipped one, in both triangles
        let (hedge_ab, hedge_bc) = (
            Self::next_in_tri(idx),
            Self::next_in_tri(Self::next_in_tri(idx)),
        );
        let (hedge_cd, hedge_da) = (
            Self::next_in_tri(hedge_twin_idx),
            Self::next_in_tri(Self::next_in_tri(hedge_twin_idx)),
        );

        let na = self.hedge_starting_nodes[hedge_ab];
        let nb = self.hedge_starting_nodes[hedge_bc];
        let nc = self.hedge_starting_nodes[hedge_cd];
        let nd = self.hedge_starting_nodes[hedge_da];

        let hedge_ba = self.hedge_twins[hedge_ab];
        let hedge_cb = self.hedge_twins[hedge_bc];
        let hedge_dc = self.hedge_twins[hedge_cd];
        let hedge_ad = self.hedge_twins[hedge_da];

        let (hedge_bc, hedge_cd, hedge_db) = self.replace_tri(tri1_idx, [nb, nc, nd]);
        let (hedge_da, hedge_ab, hedge_bd) = self.replace_tri(tri2_idx, [nd, na, nb]);

        self.hedge_twins[hedge_ab] = hedge_ba;
        self.hedge_twins[hedge_da] = hedge_ad;
        self.hedge_twins[hedge_bc] = hedge_cb;
        self.hedge_twins[hedge_cd] = hedge_dc;

        self.hedge_twins[hedge_bd] = hedge_db;
        self.hedge_twins[hedge_db] = hedge_bd;

        self.hedge_twins[hedge_ba] = hedge_ab;
        self.hedge_twins[hedge_ad] = hedge_da;
        self.hedge_twins[hedge_cb] = hedge_bc;
        self.hedge_twins[hedge_dc] = hedge_cd;

        HowOk([
            TriIterator::new(self, tri1_idx),
            TriIterator::new(self, tri2_idx),
        ])
    }

    const fn next_in_tri(idx: HedgeIteratorIdx) -> HedgeIteratorIdx {
        if idx % 3 == 2 {
            idx - 2
        } else {
            idx + 1
        }
    }

    /// Retrieve a half-edge iterator by index.
    pub fn get_hedge(&self, idx: HedgeIteratorIdx) -> HowResult<HedgeIterator<'_>> {
        if idx >= self.hedge_starting_nodes.len() {
            return Err(anyhow::Error::msg("Hedge index out of bounds"));
        }

        HowOk(HedgeIterator::new(self, idx))
    }

    /// Retrieve a tri iterator by index.
    pub fn get_tri(&self, idx: TriIteratorIdx) -> HowResult<TriIterator<'_>> {
        if idx >= self.num_tris() {
            return Err(anyhow::Error::msg("Tri index out of bounds!"));
        }

        HowOk(TriIterator::new(self, idx))
    }

    /// Get the number of triangles in the triangulation, `casual` and `conceptual`.
    pub const fn num_tris(&self) -> usize {
        self.num_tris
    }

    /// Iterate over the triangles that are not connected to the dummy point, in index order.
    pub fn casual_tris(&self) -> impl Iterator<Item = TriIterator<'_>> {
        (0..self.num_tris())
            .map(|idx| TriIterator::new(self, idx))
            .filter(|tri| tri.is_casual())
    }

    /// Get the number of triangles in the triangulation, without the ones connected to the dummy point.
    pub fn num_casual_tris(&self) -> usize {
        self.casual_tris().count()
    }

    /// Check if the data structure is sound, i.e. hedges point to correct next and previous nodes.
    pub fn is_sound(&self) -> bool {
        (0..self.hedge_starting_nodes.len())
            .all(|hedge_idx| HedgeIterator::new(self, hedge_idx).is_sound())
    }

    /// Overwrite the nodes of a triangle in place and retrieve its hedge indices.
    fn replace_tri(
        &mut self,
        idx_to_replace: TriIteratorIdx,
        nodes: [VertexNode; 3],
    ) -> (HedgeIteratorIdx, HedgeIteratorIdx, HedgeIteratorIdx) {
        let idx0 = idx_to_replace * 3;

        self.hedge_starting_nodes[idx0..idx0 + 3].copy_from_slice(&nodes);

        (idx0, idx0 + 1, idx0 + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tri_is_closed() {
        let mut tds = TriDataStructure::new();
        tds.add_init_tri([0, 1, 2]).unwrap();

        assert_eq!(tds.num_tris(), 4);
        assert_eq!(tds.num_casual_tris(), 1);
        assert!(tds.is_sound());
    }

    #[test]
    fn test_flips_keep_soundness() {
        let mut tds = TriDataStructure::new();
        tds.add_init_tri([0, 1, 2]).unwrap();
        tds.flip_1_to_3(0, 3).unwrap();

        assert_eq!(tds.num_tris(), 6);
        assert_eq!(tds.num_casual_tris(), 3);
        assert!(tds.is_sound());

        // the edge between the first two new triangles is interior, flipping it twice restores it
        let [t0, _, _] = tds.get_tri(0).unwrap().hedges();
        let interior = t0.next().idx;
        tds.flip_2_to_2(interior).unwrap();
        assert!(tds.is_sound());
        assert_eq!(tds.num_casual_tris(), 3);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut tds = TriDataStructure::new();
        assert!(tds.get_tri(0).is_err());
        assert!(tds.flip_1_to_3(0, 0).is_err());
        tds.add_init_tri([0, 1, 2]).unwrap();
        assert!(tds.add_init_tri([0, 1, 2]).is_err());
        assert!(tds.get_hedge(12).is_err());
    }
}
