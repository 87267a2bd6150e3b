//! Mesh data structures and construction.

pub mod builder;
pub mod halfedge;
pub mod index;
pub mod triangulate;

pub use builder::{build_from_buffers, build_from_triangles, to_face_vertex};
pub use halfedge::{Face, HalfEdge, HalfEdgeMesh, Vertex};
pub use index::{FaceId, HalfEdgeId, VertexId};
