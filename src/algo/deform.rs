//! Handle-constrained Laplacian deformation.
//!
//! Moves a set of handle vertices to target positions while the rest of the
//! mesh follows, preserving local surface detail. Every vertex contributes a
//! detail equation (its Laplacian coordinates should survive the edit),
//! every handle contributes a unit equation pinning it to its target, and
//! unconstrained vertices carry weak anchor equations at their rest
//! positions so the edit decays with distance from the handles instead of
//! dragging the whole surface along. The resulting overdetermined system is
//! solved through its normal equations with one Cholesky factorization
//! shared by the three coordinate axes.

use nalgebra::{DMatrix, Point3};

use super::laplacian::{Laplacian, WeightPolicy};
use super::solver::SymmetricSolver;
use crate::error::{MeshError, Result};
use crate::mesh::{HalfEdgeMesh, VertexId};

/// Weight of the rest-pose anchor rows: small enough that handles still
/// land on their targets, large enough to hold distant vertices in place.
const ANCHOR_WEIGHT: f64 = 1e-3;

/// A positional constraint on one vertex.
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    /// The constrained vertex.
    pub vertex: VertexId,

    /// Where it should end up.
    pub target: Point3<f64>,
}

impl Handle {
    /// Create a handle pinning `vertex` to `target`.
    pub fn new(vertex: VertexId, target: Point3<f64>) -> Self {
        Self { vertex, target }
    }
}

/// Options for handle deformation.
#[derive(Debug, Clone)]
pub struct DeformOptions {
    /// Weighting policy for the detail equations.
    pub policy: WeightPolicy,

    /// Blend between original (0) and fully solved (1) positions.
    pub strength: f64,
}

impl Default for DeformOptions {
    fn default() -> Self {
        Self {
            policy: WeightPolicy::default(),
            strength: 1.0,
        }
    }
}

impl DeformOptions {
    /// Set the weighting policy.
    pub fn with_policy(mut self, policy: WeightPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the blend strength.
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }
}

/// Deform the mesh so the handle vertices reach their targets.
///
/// Vertices without a handle are softly anchored to their rest positions,
/// so displacement falls off with distance from the handles.
///
/// With no handles or non-positive strength this is a no-op. On any error
/// (including a failed factorization) positions are left untouched.
pub fn deform(mesh: &mut HalfEdgeMesh, handles: &[Handle], options: &DeformOptions) -> Result<()> {
    let n = mesh.num_vertices();
    if n == 0 {
        tracing::warn!("deform called on an empty mesh");
        return Err(MeshError::EmptyMesh);
    }
    if options.strength.is_nan() || options.strength > 1.0 {
        tracing::warn!(strength = options.strength, "rejecting deform options");
        return Err(MeshError::invalid_param(
            "strength",
            options.strength,
            "must be in [0, 1]",
        ));
    }
    for h in handles {
        if !h.vertex.is_valid() || h.vertex.index() >= n {
            tracing::warn!(vertex = h.vertex.index(), "handle vertex out of range");
            return Err(MeshError::VertexOutOfRange {
                vertex: h.vertex.index(),
                count: n,
            });
        }
    }
    if handles.is_empty() || options.strength <= 0.0 {
        return Ok(());
    }

    let lap = Laplacian::build(mesh, options.policy);

    let mut handled = vec![false; n];
    for h in handles {
        handled[h.vertex.index()] = true;
    }

    // Detail rows for every vertex, a weak anchor per unconstrained
    // vertex, and a pin per handle.
    let mut rows: Vec<(Vec<(usize, f64)>, [f64; 3])> =
        Vec::with_capacity(2 * n + handles.len());

    for v in mesh.vertex_ids() {
        let i = v.index();
        let vw = &lap.weights[i];
        if vw.neighbors.is_empty() {
            // Isolated vertex: pin it where it is.
            let p = mesh.position(v);
            rows.push((vec![(i, 1.0)], [p.x, p.y, p.z]));
            continue;
        }

        let mut coeffs = Vec::with_capacity(vw.neighbors.len() + 1);
        coeffs.push((i, vw.raw_sum()));
        for (&nb, &w) in vw.neighbors.iter().zip(vw.raw.iter()) {
            coeffs.push((nb.index(), -w));
        }

        // Scaled so the row is satisfied exactly at the rest pose; the
        // anchors below then shape how far a handle edit carries.
        let delta = lap.detail_vector(mesh, v) * vw.raw_sum();
        rows.push((coeffs, [delta.x, delta.y, delta.z]));

        if !handled[i] {
            let p = mesh.position(v);
            rows.push((
                vec![(i, ANCHOR_WEIGHT)],
                [ANCHOR_WEIGHT * p.x, ANCHOR_WEIGHT * p.y, ANCHOR_WEIGHT * p.z],
            ));
        }
    }

    for h in handles {
        rows.push((
            vec![(h.vertex.index(), 1.0)],
            [h.target.x, h.target.y, h.target.z],
        ));
    }

    // Normal equations, accumulated row by row; the COO assembly sums the
    // duplicate products.
    let mut ata: Vec<(usize, usize, f64)> = Vec::new();
    let mut atb = DMatrix::<f64>::zeros(n, 3);
    for (coeffs, rhs) in &rows {
        for &(i, a) in coeffs {
            for &(j, b) in coeffs {
                ata.push((i, j, a * b));
            }
            for (k, &r) in rhs.iter().enumerate() {
                atb[(i, k)] += a * r;
            }
        }
    }

    tracing::debug!(
        vertices = n,
        handles = handles.len(),
        rows = rows.len(),
        "solving deformation system"
    );

    let solver = SymmetricSolver::factorize(n, &ata)?;
    let solved = solver.solve_columns(&atb);

    let s = options.strength;
    for v in mesh.vertex_ids().collect::<Vec<_>>() {
        let i = v.index();
        let p = *mesh.position(v);
        let target = Point3::new(solved[(i, 0)], solved[(i, 1)], solved[(i, 2)]);
        mesh.set_position(v, p + (target - p) * s);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;

    /// A flat 3x3 vertex grid in the z=0 plane.
    fn grid_mesh() -> HalfEdgeMesh {
        let mut vertices = Vec::new();
        for y in 0..3 {
            for x in 0..3 {
                vertices.push(Point3::new(x as f64, y as f64, 0.0));
            }
        }
        let mut faces = Vec::new();
        for y in 0..2 {
            for x in 0..2 {
                let i = y * 3 + x;
                faces.push([i, i + 1, i + 4]);
                faces.push([i, i + 4, i + 3]);
            }
        }
        build_from_triangles(&vertices, &faces).unwrap()
    }

    #[test]
    fn test_no_handles_is_noop() {
        let mut mesh = grid_mesh();
        let before = mesh.positions();

        deform(&mut mesh, &[], &DeformOptions::default()).unwrap();

        for (p, q) in before.iter().zip(mesh.positions().iter()) {
            assert_eq!(p, q);
        }
    }

    #[test]
    fn test_zero_strength_is_noop() {
        let mut mesh = grid_mesh();
        let before = mesh.positions();
        let handles = [Handle::new(VertexId::new(0), Point3::new(5.0, 5.0, 5.0))];

        deform(&mut mesh, &handles, &DeformOptions::default().with_strength(0.0)).unwrap();

        for (p, q) in before.iter().zip(mesh.positions().iter()) {
            assert_eq!(p, q);
        }
    }

    #[test]
    fn test_single_handle_reaches_target() {
        let mut mesh = grid_mesh();
        let target = Point3::new(0.0, 0.0, 1.0);
        let handles = [Handle::new(VertexId::new(0), target)];

        deform(&mut mesh, &handles, &DeformOptions::default()).unwrap();

        let p = mesh.position(VertexId::new(0));
        assert!((p - target).norm() < 1e-3, "handle at {p:?}");
        for q in mesh.positions() {
            assert!(q.x.is_finite() && q.y.is_finite() && q.z.is_finite());
        }
    }

    #[test]
    fn test_displacement_falls_off_with_distance() {
        let mut mesh = grid_mesh();
        let original = grid_mesh();
        // Drag one corner outward along x.
        let v0 = VertexId::new(0);
        let far = VertexId::new(8);
        let handles = [Handle::new(v0, Point3::new(-1.0, 0.0, 0.0))];

        deform(&mut mesh, &handles, &DeformOptions::default()).unwrap();

        let handle_disp = (mesh.position(v0) - original.position(v0)).norm();
        let far_disp = (mesh.position(far) - original.position(far)).norm();
        assert!(
            handle_disp > far_disp,
            "handle moved {handle_disp}, far corner moved {far_disp}"
        );
    }

    #[test]
    fn test_half_strength_blends() {
        let mut full = grid_mesh();
        let mut half = grid_mesh();
        let target = Point3::new(0.0, 0.0, 2.0);
        let handles = [Handle::new(VertexId::new(0), target)];

        deform(&mut full, &handles, &DeformOptions::default()).unwrap();
        deform(&mut half, &handles, &DeformOptions::default().with_strength(0.5)).unwrap();

        let original = grid_mesh();
        for v in full.vertex_ids() {
            let p0 = original.position(v).coords;
            let pf = full.position(v).coords;
            let ph = half.position(v).coords;
            let blend = p0 + (pf - p0) * 0.5;
            assert!((ph - blend).norm() < 1e-9);
        }
    }

    #[test]
    fn test_umbrella_policy_supported() {
        let mut mesh = grid_mesh();
        let target = Point3::new(1.0, 1.0, 1.0);
        let handles = [Handle::new(VertexId::new(4), target)];
        let options = DeformOptions::default().with_policy(WeightPolicy::Umbrella);

        deform(&mut mesh, &handles, &options).unwrap();

        let p = mesh.position(VertexId::new(4));
        assert!((p - target).norm() < 1e-3);
    }

    #[test]
    fn test_out_of_range_handle_rejected() {
        let mut mesh = grid_mesh();
        let before = mesh.positions();
        let handles = [Handle::new(VertexId::new(99), Point3::origin())];

        let result = deform(&mut mesh, &handles, &DeformOptions::default());
        assert!(matches!(
            result,
            Err(MeshError::VertexOutOfRange { vertex: 99, .. })
        ));
        // Positions untouched on error.
        for (p, q) in before.iter().zip(mesh.positions().iter()) {
            assert_eq!(p, q);
        }
    }

    #[test]
    fn test_invalid_strength_rejected() {
        let mut mesh = grid_mesh();
        let handles = [Handle::new(VertexId::new(0), Point3::origin())];

        let result = deform(
            &mut mesh,
            &handles,
            &DeformOptions::default().with_strength(f64::NAN),
        );
        assert!(matches!(result, Err(MeshError::InvalidParameter { .. })));

        let result = deform(
            &mut mesh,
            &handles,
            &DeformOptions::default().with_strength(1.5),
        );
        assert!(matches!(result, Err(MeshError::InvalidParameter { .. })));
    }
}
