use super::types::Vertex2;

/// Quadrants of a cell: low x low y, low x high y, high x high y, high x low y.
const QUADRANTS: usize = 4;

/// For every curve state, the quadrants in stack push order with the state of the sub curve.
const HILBERT_STATES: [[(usize, u8); QUADRANTS]; 8] = [
    [(0, 3), (1, 0), (2, 0), (3, 7)],
    [(3, 6), (2, 1), (1, 1), (0, 2)],
    [(1, 5), (2, 2), (3, 2), (0, 1)],
    [(0, 0), (3, 3), (2, 3), (1, 4)],
    [(2, 7), (3, 4), (0, 4), (1, 3)],
    [(1, 2), (0, 5), (3, 5), (2, 6)],
    [(3, 1), (0, 6), (1, 6), (2, 5)],
    [(2, 4), (1, 7), (0, 7), (3, 0)],
];

struct Cell {
    state: u8,
    min: Vertex2,
    max: Vertex2,
    indices: Vec<usize>,
}

/// Sorts vertices along a 2D Hilbert curve, returns the reordered `indices`.
///
/// Equal vertices end up next to each other.
pub fn sort_along_hilbert_curve_2d(vertices: &[Vertex2], indices: &[usize]) -> Vec<usize> {
    let Some((min, max)) = bounds(vertices, indices) else {
        return Vec::new();
    };

    let mut curve_order = Vec::with_capacity(indices.len());
    let mut to_subdiv = vec![Cell {
        state: 0,
        min,
        max,
        indices: indices.to_vec(),
    }];

    while let Some(cell) = to_subdiv.pop() {
        match cell.indices.len() {
            0 => {}
            1 => curve_order.push(cell.indices[0]),
            _ if all_equal(vertices, &cell.indices) => curve_order.extend(cell.indices),
            _ => {
                let sep = [
                    (cell.min[0] + cell.max[0]) / 2.0,
                    (cell.min[1] + cell.max[1]) / 2.0,
                ];

                let mut split: [Vec<usize>; QUADRANTS] = Default::default();
                for idx in cell.indices {
                    let [x, y] = vertices[idx];
                    let quadrant = match (x < sep[0], y < sep[1]) {
                        (true, true) => 0,
                        (true, false) => 1,
                        (false, false) => 2,
                        (false, true) => 3,
                    };
                    split[quadrant].push(idx);
                }

                for &(quadrant, state) in &HILBERT_STATES[cell.state as usize] {
                    let (min, max) = match quadrant {
                        0 => (cell.min, sep),
                        1 => ([cell.min[0], sep[1]], [sep[0], cell.max[1]]),
                        2 => (sep, cell.max),
                        _ => ([sep[0], cell.min[1]], [cell.max[0], sep[1]]),
                    };

                    // the cell can't be halved any further in floating point
                    if same_bits(&min, &cell.min) && same_bits(&max, &cell.max) {
                        curve_order.append(&mut split[quadrant]);
                        continue;
                    }
                    to_subdiv.push(Cell {
                        state,
                        min,
                        max,
                        indices: core::mem::take(&mut split[quadrant]),
                    });
                }
            }
        }
    }

    curve_order
}

fn same_bits(a: &Vertex2, b: &Vertex2) -> bool {
    a[0].to_bits() == b[0].to_bits() && a[1].to_bits() == b[1].to_bits()
}

fn all_equal(vertices: &[Vertex2], indices: &[usize]) -> bool {
    let first = vertices[indices[0]];
    indices.iter().all(|&idx| same_bits(&vertices[idx], &first))
}

fn bounds(vertices: &[Vertex2], indices: &[usize]) -> Option<(Vertex2, Vertex2)> {
    let first = vertices[*indices.first()?];

    Some(indices.iter().fold((first, first), |(min, max), &idx| {
        let [x, y] = vertices[idx];
        ([min[0].min(x), min[1].min(y)], [max[0].max(x), max[1].max(y)])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_a_permutation() {
        let vertices: Vec<Vertex2> = (0..64)
            .map(|i| [(i % 8) as f64, (i / 8) as f64])
            .collect();
        let indices: Vec<usize> = (0..vertices.len()).collect();

        let mut sorted = sort_along_hilbert_curve_2d(&vertices, &indices);
        assert_eq!(sorted.len(), vertices.len());

        // consecutive grid points along the curve are neighbours
        for pair in sorted.windows(2) {
            let (a, b) = (vertices[pair[0]], vertices[pair[1]]);
            assert_eq!((a[0] - b[0]).abs() + (a[1] - b[1]).abs(), 1.0);
        }

        sorted.sort_unstable();
        assert_eq!(sorted, indices);
    }

    #[test]
    fn test_duplicates_and_empty_input() {
        let vertices = vec![[1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let sorted = sort_along_hilbert_curve_2d(&vertices, &[0, 1, 2, 3]);
        assert_eq!(sorted.len(), 4);

        let pos: Vec<usize> = [0, 2, 3]
            .iter()
            .map(|i| sorted.iter().position(|s| s == i).unwrap())
            .collect();
        assert_eq!(pos.iter().max().unwrap() - pos.iter().min().unwrap(), 2);

        assert!(sort_along_hilbert_curve_2d(&vertices, &[]).is_empty());
    }

    #[test]
    fn test_duplicates_inside_the_box() {
        let vertices = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.3, 0.3], [0.3, 0.3]];
        let sorted = sort_along_hilbert_curve_2d(&vertices, &[0, 1, 2, 3, 4]);

        let pos: Vec<usize> = [3, 4]
            .iter()
            .map(|i| sorted.iter().position(|s| s == i).unwrap())
            .collect();
        assert_eq!(pos[0].abs_diff(pos[1]), 1);

        let mut sorted = sorted;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_neighbouring_floats() {
        let x = 0.3_f64;
        let next = f64::from_bits(x.to_bits() + 1);
        let vertices = vec![[-1.0, -1.0], [1.0, 1.0], [x, x], [next, next], [x, next]];

        let mut sorted = sort_along_hilbert_curve_2d(&vertices, &[0, 1, 2, 3, 4]);
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }
}
