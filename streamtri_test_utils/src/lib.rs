//! utils for streamtri tests
#![forbid(unsafe_code)]
#![deny(unused)]
#![warn(clippy::all, clippy::missing_const_for_fn)]

use rand::{distr::Uniform, prelude::Distribution};
use rand_distr::Normal;
use std::ops::RangeInclusive;

pub type Vertex2 = [f64; 2];
pub type Vertex3 = [f64; 3];

/// Samples `n` vertices in 2D space from the [Uniform] distribution.
///
/// If no range is specified, the unit-square centered around the origin is used, `[-0.5, 0.5]`.
pub fn sample_vertices_2d(n: usize, range: Option<RangeInclusive<f64>>) -> Vec<Vertex2> {
    let mut rng = rand::rng();
    let range = range.unwrap_or(-0.5..=0.5);
    let uniform = Uniform::try_from(range).expect("Expected range with a greater start then end");

    let mut vertices: Vec<[f64; 2]> = Vec::with_capacity(n);
    for _ in 0..n {
        let x = uniform.sample(&mut rng);
        let y = uniform.sample(&mut rng);
        vertices.push([x, y]);
    }

    vertices
}

/// Samples `n` vertices in 3D space from the [Uniform] distribution.
///
/// If no range is specified, the unit-cube centered around the origin is used, `[-0.5, 0.5]`.
pub fn sample_vertices_3d(n: usize, range: Option<RangeInclusive<f64>>) -> Vec<Vertex3> {
    let mut rng = rand::rng();
    let range = range.unwrap_or(-0.5..=0.5);
    let uniform = Uniform::try_from(range).expect("Expected range with a greater start then end");

    let mut vertices: Vec<[f64; 3]> = Vec::with_capacity(n);
    for _ in 0..n {
        let x = uniform.sample(&mut rng);
        let y = uniform.sample(&mut rng);
        let z = uniform.sample(&mut rng);

        vertices.push([x, y, z]);
    }

    vertices
}

/// Samples `n` vertices in 2D, normally distributed around a few cluster centers.
///
/// The centers are drawn uniformly from `[-0.5, 0.5]`, the spread is `σ`, `0.05` if not given.
/// Clustered streams leave most coarse cells empty and a few very full.
pub fn sample_clustered_2d(n: usize, num_clusters: usize, sigma: Option<f64>) -> Vec<Vertex2> {
    let mut rng = rand::rng();
    let centers = sample_vertices_2d(num_clusters.max(1), None);
    let normal = Normal::new(0.0, sigma.unwrap_or(0.05)).unwrap();

    let mut vertices: Vec<[f64; 2]> = Vec::with_capacity(n);
    for i in 0..n {
        let [cx, cy] = centers[i % centers.len()];
        let dx: f64 = normal.sample(&mut rng);
        let dy: f64 = normal.sample(&mut rng);
        vertices.push([cx + dx, cy + dy]);
    }

    vertices
}

/// Lifts 2D vertices into 3D with `z = 0`.
pub fn lift(vertices: &[Vertex2]) -> Vec<Vertex3> {
    vertices.iter().map(|&[x, y]| [x, y, 0.0]).collect()
}
