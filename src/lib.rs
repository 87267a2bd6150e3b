//! # Sinew
//!
//! Laplacian geometry processing for rigging workflows: handle-driven mesh
//! deformation and skeleton-to-mesh skin weighting on a half-edge structure.
//!
//! ## Features
//!
//! - **Half-edge data structure**: O(1) adjacency queries with type-safe indices,
//!   colocal vertex rings for seam-duplicated vertices, and uniform boundary
//!   traversal
//! - **Handle deformation**: detail-preserving Laplacian editing driven by
//!   per-vertex positional handles
//! - **Skin weighting**: bone visibility sampling plus per-bone heat diffusion,
//!   producing normalized per-vertex influence lists
//! - **Pluggable occlusion**: bring your own spatial index or use the bundled
//!   triangle BVH
//!
//! ## Quick Start
//!
//! ```
//! use sinew::prelude::*;
//! use nalgebra::Point3;
//!
//! // Build a mesh from flat buffers
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//!     Point3::new(0.5, 0.5, 1.0),
//! ];
//! let faces = vec![
//!     [0, 2, 1],
//!     [0, 1, 3],
//!     [1, 2, 3],
//!     [2, 0, 3],
//! ];
//! let mut mesh = build_from_triangles(&vertices, &faces).unwrap();
//!
//! // Pull the apex upward; the rest of the mesh follows
//! let handles = [Handle::new(VertexId::new(3), Point3::new(0.5, 0.5, 2.0))];
//! deform(&mut mesh, &handles, &DeformOptions::default()).unwrap();
//!
//! let apex = mesh.position(VertexId::new(3));
//! assert!((apex.z - 2.0).abs() < 1e-3);
//! ```
//!
//! ## Skin Weighting
//!
//! ```no_run
//! use sinew::prelude::*;
//! use sinew::skeleton::{Bone, Skeleton};
//! use sinew::spatial::MeshBvh;
//! # let vertices: Vec<nalgebra::Point3<f64>> = vec![];
//! # let faces: Vec<[usize; 3]> = vec![];
//! # let skeleton = Skeleton::new();
//!
//! let mesh = build_from_triangles(&vertices, &faces).unwrap();
//! let bvh = MeshBvh::build(&vertices, &faces);
//!
//! let weights = compute_weights(&mesh, &skeleton, &bvh, &WeightOptions::default()).unwrap();
//! for v in 0..weights.num_vertices() {
//!     for &(bone, w) in weights.of(v) {
//!         println!("vertex {v}: bone {bone} weight {w:.3}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod mesh;
pub mod skeleton;
pub mod spatial;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use sinew::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::{
        compute_weights, deform, DeformOptions, Handle, SkinWeights, WeightOptions, WeightPolicy,
    };
    pub use crate::error::{MeshError, Result};
    pub use crate::mesh::{
        build_from_buffers, build_from_triangles, to_face_vertex, Face, FaceId, HalfEdge,
        HalfEdgeId, HalfEdgeMesh, Vertex, VertexId,
    };
    pub use crate::skeleton::{Bone, Skeleton};
    pub use crate::spatial::{MeshBvh, OcclusionQuery};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    fn unit_cube() -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        (vertices, faces)
    }

    #[test]
    fn test_closed_cube_topology() {
        let (vertices, faces) = unit_cube();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_vertices(), 8);
        assert_eq!(mesh.num_faces(), 12);
        assert_eq!(mesh.num_halfedges(), 36);
        assert!(mesh.is_valid());
        for v in mesh.vertex_ids() {
            assert!(!mesh.is_boundary_vertex(v));
        }
    }

    #[test]
    fn test_cube_deform_falloff() {
        // Pulling one corner outward must move that corner farther than the
        // diagonally opposite one.
        let (vertices, faces) = unit_cube();
        let mut mesh = build_from_triangles(&vertices, &faces).unwrap();

        let handle_v = VertexId::new(0);
        let opposite_v = VertexId::new(6);
        let target = Point3::new(1.0, 0.0, 0.0);
        let handles = [Handle::new(handle_v, target)];

        deform(&mut mesh, &handles, &DeformOptions::default()).unwrap();

        for p in mesh.positions() {
            assert!(p.x.is_finite() && p.y.is_finite() && p.z.is_finite());
        }

        let handle_disp = (mesh.position(handle_v) - vertices[0]).norm();
        let opposite_disp = (mesh.position(opposite_v) - vertices[6]).norm();
        assert!((mesh.position(handle_v) - target).norm() < 1e-3);
        assert!(
            handle_disp > opposite_disp,
            "handle moved {handle_disp}, opposite moved {opposite_disp}"
        );
    }

    #[test]
    fn test_cube_skinning_end_to_end() {
        // A bone rising through the cube interior sees every vertex; the
        // cube is convex so the bundled BVH finds no occluders.
        let (vertices, faces) = unit_cube();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();
        let bvh = MeshBvh::build(&vertices, &faces);

        let skeleton = Skeleton {
            joints: vec![
                Point3::new(0.5, -1.0, 0.5),
                Point3::new(0.5, 0.0, 0.5),
                Point3::new(0.5, 1.0, 0.5),
            ],
            bones: vec![
                Bone::new(Point3::new(0.5, -1.0, 0.5), Point3::new(0.5, 0.0, 0.5), 0),
                Bone::new(Point3::new(0.5, 0.0, 0.5), Point3::new(0.5, 1.0, 0.5), 1),
            ],
        };

        let weights =
            compute_weights(&mesh, &skeleton, &bvh, &WeightOptions::default()).unwrap();

        for v in 0..weights.num_vertices() {
            let inf = weights.of(v);
            assert!(!inf.is_empty(), "vertex {v} has no influences");
            let sum: f64 = inf.iter().map(|&(_, w)| w).sum();
            assert!((sum - 1.0).abs() < 1e-6);
            for &(bone, w) in inf {
                assert_ne!(bone, 0, "root bone weighted at vertex {v}");
                assert!(w.is_finite() && w >= 0.0);
            }
        }
    }

    #[test]
    fn test_seam_duplicates_form_rings() {
        // Two triangles meeting along a UV seam: the shared positions exist
        // twice and are only connected through colocal rings.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [4, 3, 5]];
        let mut mesh = build_from_triangles(&vertices, &faces).unwrap();

        mesh.link_colocals(1e-9);

        assert_eq!(mesh.colocals(VertexId::new(0)).count(), 2);
        assert_eq!(mesh.colocals(VertexId::new(4)).count(), 2);
        assert_eq!(mesh.colocals(VertexId::new(2)).count(), 1);
        assert_eq!(mesh.first_colocal(VertexId::new(3)), VertexId::new(0));
    }
}
