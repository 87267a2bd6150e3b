//! Skeleton-to-mesh skin weighting.
//!
//! Two passes: a visibility sampling pass collects, per vertex and bone, the
//! closest bone sample with an unoccluded and sufficiently bone-aligned line
//! to the vertex; a diffusion pass then solves one heat system per bone and
//! turns the diffused values into per-vertex influence lists.
//!
//! The sampling pass is read-only over the mesh and may fan out across
//! vertices with rayon; everything downstream is single-threaded.

use nalgebra::DVector;
use rayon::prelude::*;

use super::laplacian::{Laplacian, WeightPolicy};
use super::solver::SymmetricSolver;
use crate::error::{MeshError, Result};
use crate::mesh::HalfEdgeMesh;
use crate::skeleton::Skeleton;
use crate::spatial::OcclusionQuery;

/// Options for skin weight computation.
#[derive(Debug, Clone)]
pub struct WeightOptions {
    /// Weighting policy for the diffusion stiffness.
    pub policy: WeightPolicy,

    /// Number of segment subdivisions per bone; `K` subdivisions place
    /// `K + 1` sample points including both endpoints.
    pub samples_per_bone: usize,

    /// Minimum `|dot(bone_dir, sample_to_vertex_dir)|` for a sample to
    /// qualify.
    pub min_alignment: f64,

    /// Maximum influences kept per vertex after diffusion.
    pub max_influences: usize,

    /// Whether to sample visibility in parallel (default: true).
    pub parallel: bool,
}

impl Default for WeightOptions {
    fn default() -> Self {
        Self {
            policy: WeightPolicy::default(),
            samples_per_bone: 6,
            min_alignment: 0.45,
            max_influences: 4,
            parallel: true,
        }
    }
}

impl WeightOptions {
    /// Set the stiffness weighting policy.
    pub fn with_policy(mut self, policy: WeightPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the number of segment subdivisions per bone.
    pub fn with_samples_per_bone(mut self, samples: usize) -> Self {
        self.samples_per_bone = samples;
        self
    }

    /// Set the alignment floor for qualifying samples.
    pub fn with_min_alignment(mut self, alignment: f64) -> Self {
        self.min_alignment = alignment;
        self
    }

    /// Set the maximum influences kept per vertex.
    pub fn with_max_influences(mut self, max: usize) -> Self {
        self.max_influences = max;
        self
    }

    /// Set whether visibility sampling runs in parallel.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Disable parallel execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.samples_per_bone == 0 {
            return Err(MeshError::invalid_param(
                "samples_per_bone",
                self.samples_per_bone,
                "must be at least 1",
            ));
        }
        if self.min_alignment.is_nan() || !(0.0..=1.0).contains(&self.min_alignment) {
            return Err(MeshError::invalid_param(
                "min_alignment",
                self.min_alignment,
                "must be in [0, 1]",
            ));
        }
        if self.max_influences == 0 {
            return Err(MeshError::invalid_param(
                "max_influences",
                self.max_influences,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Visibility sampling result: per vertex, the qualifying bones with their
/// minimum squared sample distance.
#[derive(Debug, Clone)]
pub struct VisibilitySamples {
    /// `per_vertex[v]` holds `(bone_index, min_dist_sq)` pairs.
    pub per_vertex: Vec<Vec<(usize, f64)>>,
}

impl VisibilitySamples {
    /// Minimum squared distance across all sampled bones of a vertex.
    pub fn min_dist_sq(&self, vertex: usize) -> Option<f64> {
        self.per_vertex[vertex]
            .iter()
            .map(|&(_, d)| d)
            .min_by(f64::total_cmp)
    }
}

/// Per-vertex bone influences, normalized to sum 1.
#[derive(Debug, Clone)]
pub struct SkinWeights {
    /// `influences[v]` holds `(bone_index, weight)` pairs, heaviest first.
    pub influences: Vec<Vec<(usize, f64)>>,
}

impl SkinWeights {
    /// Number of vertices covered.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.influences.len()
    }

    /// Influences of one vertex, heaviest first.
    pub fn of(&self, vertex: usize) -> &[(usize, f64)] {
        &self.influences[vertex]
    }

    /// Debug colors: each vertex blends the hues of its influencing bones
    /// by weight. Useful for painting weights onto the mesh.
    pub fn debug_colors(&self) -> Vec<[f32; 4]> {
        self.influences
            .iter()
            .map(|inf| {
                let mut rgb = [0.0f32; 3];
                for &(bone, w) in inf {
                    let c = bone_color(bone);
                    for k in 0..3 {
                        rgb[k] += c[k] * w as f32;
                    }
                }
                [rgb[0], rgb[1], rgb[2], 1.0]
            })
            .collect()
    }
}

/// A distinct, stable color per bone (golden-ratio hue stepping).
fn bone_color(bone: usize) -> [f32; 3] {
    let hue = (bone as f32 * 0.618_034) % 1.0;
    hsv_to_rgb(hue, 0.8, 0.95)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match i as i32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Sample bone visibility for every vertex.
///
/// For each non-root bone, `samples_per_bone + 1` points are taken evenly
/// along the segment; a sample qualifies when the straight line to the
/// vertex is unoccluded and its direction is aligned with the bone axis by
/// at least `min_alignment`. Zero-length bones are skipped.
pub fn sample_visibility<Q>(
    mesh: &HalfEdgeMesh,
    skeleton: &Skeleton,
    occlusion: &Q,
    options: &WeightOptions,
) -> VisibilitySamples
where
    Q: OcclusionQuery + Sync + ?Sized,
{
    let positions = mesh.positions();
    let k = options.samples_per_bone;

    let sample_vertex = |v_idx: usize| -> Vec<(usize, f64)> {
        let p = positions[v_idx];
        let mut out = Vec::new();

        for (b_idx, bone) in skeleton.bones.iter().enumerate() {
            if bone.is_root() {
                continue;
            }
            let axis = bone.tail - bone.head;
            let len = axis.norm();
            if len < 1e-12 {
                continue;
            }
            let bone_dir = axis / len;

            let mut best: Option<f64> = None;
            for s in 0..=k {
                let t = s as f64 / k as f64;
                let sample = bone.point_at(t);
                let to_v = p - sample;
                let dist = to_v.norm();
                if dist < 1e-12 {
                    // Vertex sits on the bone.
                    best = Some(0.0);
                    break;
                }
                let alignment = bone_dir.dot(&(to_v / dist)).abs();
                if alignment < options.min_alignment {
                    continue;
                }
                if occlusion.segment_occluded(&sample, v_idx, &p) {
                    continue;
                }
                let d2 = dist * dist;
                best = Some(best.map_or(d2, |b: f64| b.min(d2)));
            }

            if let Some(d2) = best {
                out.push((b_idx, d2));
            }
        }

        out
    };

    let per_vertex: Vec<Vec<(usize, f64)>> = if options.parallel {
        (0..positions.len())
            .into_par_iter()
            .map(sample_vertex)
            .collect()
    } else {
        (0..positions.len()).map(sample_vertex).collect()
    };

    VisibilitySamples { per_vertex }
}

/// Compute skin weights by heat diffusion from the visibility samples.
///
/// One heat system per non-root bone: `(S + M·H) w = H·M·δ`, where `S` is
/// the stiffness, `M` the lumped mass, `H` the per-vertex heat (the ratio
/// of the bone's squared sample distance to the vertex's minimum across
/// bones) and `δ` the sampled indicator. A bone whose system cannot be
/// factorized is logged and contributes nothing. Vertices that end up with
/// no positive weight fall back to the nearest bone by segment distance.
pub fn compute_weights<Q>(
    mesh: &HalfEdgeMesh,
    skeleton: &Skeleton,
    occlusion: &Q,
    options: &WeightOptions,
) -> Result<SkinWeights>
where
    Q: OcclusionQuery + Sync + ?Sized,
{
    let n = mesh.num_vertices();
    if n == 0 || mesh.num_faces() == 0 {
        tracing::warn!("weight computation called on an empty mesh");
        return Err(MeshError::EmptyMesh);
    }
    if !skeleton.has_weightable_bones() {
        tracing::warn!("weight computation called without non-root bones");
        return Err(MeshError::EmptySkeleton);
    }
    options.validate()?;

    let samples = sample_visibility(mesh, skeleton, occlusion, options);
    let sampled_total: usize = samples.per_vertex.iter().map(Vec::len).sum();
    tracing::debug!(
        vertices = n,
        bones = skeleton.num_bones(),
        sampled_pairs = sampled_total,
        "visibility sampling done"
    );

    let lap = Laplacian::build(mesh, options.policy);
    let stiffness = lap.stiffness_triplets();

    let min_sq: Vec<f64> = (0..n)
        .map(|v| samples.min_dist_sq(v).unwrap_or(f64::INFINITY))
        .collect();

    let mut accum: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];

    for (b_idx, bone) in skeleton.bones.iter().enumerate() {
        if bone.is_root() {
            continue;
        }

        // Heat per sampled vertex: 1 for the closest bone, > 1 otherwise.
        let mut heat: Vec<(usize, f64)> = Vec::new();
        for (v, entries) in samples.per_vertex.iter().enumerate() {
            for &(bone_idx, d2) in entries {
                if bone_idx == b_idx {
                    heat.push((v, d2 / min_sq[v].max(1e-12)));
                }
            }
        }
        if heat.is_empty() {
            continue;
        }

        let mut triplets = stiffness.clone();
        let mut rhs = DVector::zeros(n);
        for &(v, h) in &heat {
            let mh = lap.mass[v] * h;
            triplets.push((v, v, mh));
            rhs[v] = mh;
        }
        // Unconnected vertices would leave an empty row; pin them to zero.
        for (v, vw) in lap.weights.iter().enumerate() {
            if vw.neighbors.is_empty() {
                triplets.push((v, v, 1.0));
            }
        }

        match SymmetricSolver::factorize(n, &triplets) {
            Ok(solver) => {
                let w = solver.solve(&rhs);
                for v in 0..n {
                    if w[v] > 0.0 && w[v].is_finite() {
                        accum[v].push((b_idx, w[v]));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(bone = b_idx, error = %e, "skipping bone, heat solve failed");
            }
        }
    }

    // Truncate to the strongest influences and normalize; vertices left
    // without weight snap to the nearest bone.
    let positions = mesh.positions();
    let mut influences = Vec::with_capacity(n);
    for (v, mut inf) in accum.into_iter().enumerate() {
        inf.sort_by(|a, b| b.1.total_cmp(&a.1));
        inf.truncate(options.max_influences);
        let sum: f64 = inf.iter().map(|&(_, w)| w).sum();
        if sum > 1e-12 {
            for entry in &mut inf {
                entry.1 /= sum;
            }
        } else {
            inf.clear();
            if let Some(b) = skeleton.nearest_bone(&positions[v]) {
                inf.push((b, 1.0));
            }
        }
        influences.push(inf);
    }

    Ok(SkinWeights { influences })
}
