//! Discrete Laplacian assembly.
//!
//! Builds per-vertex neighbor weights under a chosen [`WeightPolicy`], the
//! lumped mass matrix, and the stiffness triplets shared by the deformation
//! and skin-weighting solves.
//!
//! Two weight arrays are kept per vertex: the raw edge weights seed the
//! linear systems, while the normalized (row sum 1) weights define the
//! Laplacian point and the detail vector. The two coincide only for the
//! umbrella policy.

use nalgebra::{DVector, Point3, Vector3};

use crate::mesh::{HalfEdgeId, HalfEdgeMesh, VertexId};

/// How neighbor weights are derived from the mesh geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightPolicy {
    /// Cotangent weights: per edge, the sum of the cotangents of the apex
    /// angles in the one or two incident triangles. Geometry-aware.
    #[default]
    Cotangent,

    /// Uniform weights: `1 / valence` per neighbor. Topology-only.
    Umbrella,
}

/// Neighbor weights for one vertex.
#[derive(Debug, Clone, Default)]
pub struct VertexWeights {
    /// One-ring neighbors, iteration order.
    pub neighbors: Vec<VertexId>,

    /// Raw edge weights, parallel to `neighbors`.
    pub raw: Vec<f64>,

    /// Weights normalized to sum 1, parallel to `neighbors`.
    pub normalized: Vec<f64>,
}

impl VertexWeights {
    /// Sum of the raw weights.
    pub fn raw_sum(&self) -> f64 {
        self.raw.iter().sum()
    }
}

/// Per-vertex Laplacian weights plus the lumped mass matrix.
#[derive(Debug, Clone)]
pub struct Laplacian {
    /// The policy the weights were built under.
    pub policy: WeightPolicy,

    /// Weights indexed by vertex id.
    pub weights: Vec<VertexWeights>,

    /// Lumped barycentric mass, `m_i = sum(incident triangle areas) / 3`.
    pub mass: DVector<f64>,
}

/// Compute the cotangent of the angle at vertex `a` in triangle (a, b, c).
fn cotangent_angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;

    let dot = ab.dot(&ac);
    let cross_len = ab.cross(&ac).norm();

    if cross_len < 1e-10 {
        0.0
    } else {
        dot / cross_len
    }
}

impl Laplacian {
    /// Build weights and mass for a triangulated mesh.
    ///
    /// Cotangent weights per edge (v, n) sum the apex-angle cotangents of
    /// the incident triangles (one for a boundary edge). A vertex whose raw
    /// weights sum to roughly zero falls back to umbrella weights so its
    /// Laplacian point stays defined.
    pub fn build(mesh: &HalfEdgeMesh, policy: WeightPolicy) -> Self {
        let n = mesh.num_vertices();
        let mut weights = Vec::with_capacity(n);

        for v in mesh.vertex_ids() {
            let mut vw = VertexWeights::default();
            for he in mesh.vertex_halfedges(v) {
                vw.neighbors.push(mesh.dest(he));
                let w = match policy {
                    WeightPolicy::Cotangent => Self::edge_cotangent(mesh, he),
                    WeightPolicy::Umbrella => 1.0,
                };
                vw.raw.push(w);
            }

            if policy == WeightPolicy::Umbrella {
                let valence = vw.neighbors.len();
                if valence > 0 {
                    let w = 1.0 / valence as f64;
                    vw.raw = vec![w; valence];
                }
            }

            let sum = vw.raw_sum();
            if sum.abs() > 1e-10 {
                vw.normalized = vw.raw.iter().map(|w| w / sum).collect();
            } else if !vw.neighbors.is_empty() {
                // Degenerate geometry: uniform fallback.
                let w = 1.0 / vw.neighbors.len() as f64;
                vw.raw = vec![w; vw.neighbors.len()];
                vw.normalized = vw.raw.clone();
            }

            weights.push(vw);
        }

        let mass = Self::build_mass(mesh);

        Self {
            policy,
            weights,
            mass,
        }
    }

    /// Raw cotangent weight of the edge carried by `he`.
    fn edge_cotangent(mesh: &HalfEdgeMesh, he: HalfEdgeId) -> f64 {
        let p_v = mesh.position(mesh.origin(he));
        let p_n = mesh.position(mesh.dest(he));

        let mut w = 0.0;
        if mesh.face_of(he).is_valid() {
            let apex = mesh.position(mesh.dest(mesh.next(he)));
            w += cotangent_angle(apex, p_v, p_n);
        }
        let twin = mesh.twin(he);
        if twin.is_valid() && mesh.face_of(twin).is_valid() {
            let apex = mesh.position(mesh.dest(mesh.next(twin)));
            w += cotangent_angle(apex, p_v, p_n);
        }
        w
    }

    /// Build the lumped mass matrix (diagonal, stored as vector).
    /// M[i,i] = (1/3) * sum of areas of incident triangles
    fn build_mass(mesh: &HalfEdgeMesh) -> DVector<f64> {
        let n = mesh.num_vertices();
        let mut mass = DVector::zeros(n);

        for f in mesh.face_ids() {
            let area = mesh.face_area(f);
            let [v0, v1, v2] = mesh.face_triangle(f);

            // Each vertex gets 1/3 of the triangle area
            let contribution = area / 3.0;
            mass[v0.index()] += contribution;
            mass[v1.index()] += contribution;
            mass[v2.index()] += contribution;
        }

        mass
    }

    /// The weighted neighbor average of `v` under the normalized weights.
    ///
    /// A vertex without neighbors is its own Laplacian point.
    pub fn laplacian_point(&self, mesh: &HalfEdgeMesh, v: VertexId) -> Point3<f64> {
        let vw = &self.weights[v.index()];
        if vw.neighbors.is_empty() {
            return *mesh.position(v);
        }

        let mut acc = Vector3::zeros();
        for (&n, &w) in vw.neighbors.iter().zip(vw.normalized.iter()) {
            acc += mesh.position(n).coords * w;
        }
        Point3::from(acc)
    }

    /// Detail vector: the offset of `v` from its Laplacian point.
    pub fn detail_vector(&self, mesh: &HalfEdgeMesh, v: VertexId) -> Vector3<f64> {
        mesh.position(v) - self.laplacian_point(mesh, v)
    }

    /// Symmetric PSD stiffness triplets: off-diagonal `-w`, diagonal `+w`
    /// per edge, weights clamped away from zero.
    ///
    /// Umbrella raw weights are direction-dependent when valences differ,
    /// so each edge uses the average of its two directed weights.
    pub fn stiffness_triplets(&self) -> Vec<(usize, usize, f64)> {
        let mut triplets = Vec::new();

        for (i, vw) in self.weights.iter().enumerate() {
            for (&n, &w_ij) in vw.neighbors.iter().zip(vw.raw.iter()) {
                let j = n.index();
                if j <= i {
                    continue; // Each undirected edge once
                }
                let w_ji = self.directed_weight(j, i);
                let w = (0.5 * (w_ij + w_ji)).max(1e-8);

                triplets.push((i, j, -w));
                triplets.push((j, i, -w));
                triplets.push((i, i, w));
                triplets.push((j, j, w));
            }
        }

        triplets
    }

    fn directed_weight(&self, from: usize, to: usize) -> f64 {
        let vw = &self.weights[from];
        for (&n, &w) in vw.neighbors.iter().zip(vw.raw.iter()) {
            if n.index() == to {
                return w;
            }
        }
        0.0
    }
}
