//! Spatial occlusion queries.
//!
//! The visibility sampling pass needs to know whether the straight segment
//! between a bone sample and a mesh vertex passes through the surface. That
//! question is behind the [`OcclusionQuery`] trait so callers can plug in
//! their own accelerator; [`MeshBvh`] is the reference implementation, a
//! median-split AABB BVH over the mesh triangles with Möller–Trumbore
//! segment tests.

use nalgebra::{Point3, Vector3};

/// Numerical guard for parallel-ray and self-intersection rejection.
const RAY_EPSILON: f64 = 1e-9;

/// A boolean segment-vs-surface occlusion test.
///
/// `vertex` identifies the endpoint vertex so implementations can exclude
/// the geometry incident to it; otherwise every query would hit the faces
/// the vertex itself sits on.
pub trait OcclusionQuery {
    /// Whether the open segment from `from` to the position of `vertex`
    /// intersects the surface (excluding `vertex`'s incident faces).
    fn segment_occluded(&self, from: &Point3<f64>, vertex: usize, to: &Point3<f64>) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v0: Point3<f64>,
    v1: Point3<f64>,
    v2: Point3<f64>,
}

impl Triangle {
    fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }
}

/// Axis-aligned bounding box for spatial acceleration.
#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    fn from_triangle(tri: &Triangle) -> Self {
        let min = Point3::new(
            tri.v0.x.min(tri.v1.x).min(tri.v2.x),
            tri.v0.y.min(tri.v1.y).min(tri.v2.y),
            tri.v0.z.min(tri.v1.z).min(tri.v2.z),
        );
        let max = Point3::new(
            tri.v0.x.max(tri.v1.x).max(tri.v2.x),
            tri.v0.y.max(tri.v1.y).max(tri.v2.y),
            tri.v0.z.max(tri.v1.z).max(tri.v2.z),
        );
        Self { min, max }
    }

    /// Expand by epsilon for numerical robustness.
    fn expand(&self, epsilon: f64) -> Self {
        Self {
            min: Point3::new(
                self.min.x - epsilon,
                self.min.y - epsilon,
                self.min.z - epsilon,
            ),
            max: Point3::new(
                self.max.x + epsilon,
                self.max.y + epsilon,
                self.max.z + epsilon,
            ),
        }
    }

    /// Slab ray-AABB intersection test.
    fn ray_intersect(&self, origin: &Point3<f64>, dir_inv: &Vector3<f64>) -> Option<(f64, f64)> {
        let t1 = (self.min.x - origin.x) * dir_inv.x;
        let t2 = (self.max.x - origin.x) * dir_inv.x;
        let t3 = (self.min.y - origin.y) * dir_inv.y;
        let t4 = (self.max.y - origin.y) * dir_inv.y;
        let t5 = (self.min.z - origin.z) * dir_inv.z;
        let t6 = (self.max.z - origin.z) * dir_inv.z;

        let t_min = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
        let t_max = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

        if t_max >= t_min && t_max >= 0.0 {
            Some((t_min.max(0.0), t_max))
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        aabb: Aabb,
        face_idx: usize,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn build(triangles: &[Triangle], indices: &mut [usize]) -> Option<Self> {
        if indices.is_empty() {
            return None;
        }

        if indices.len() == 1 {
            let idx = indices[0];
            return Some(Self::Leaf {
                aabb: Aabb::from_triangle(&triangles[idx]).expand(RAY_EPSILON),
                face_idx: idx,
            });
        }

        let mut combined = Aabb::from_triangle(&triangles[indices[0]]);
        for &idx in indices.iter().skip(1) {
            let tri_aabb = Aabb::from_triangle(&triangles[idx]);
            combined.min.x = combined.min.x.min(tri_aabb.min.x);
            combined.min.y = combined.min.y.min(tri_aabb.min.y);
            combined.min.z = combined.min.z.min(tri_aabb.min.z);
            combined.max.x = combined.max.x.max(tri_aabb.max.x);
            combined.max.y = combined.max.y.max(tri_aabb.max.y);
            combined.max.z = combined.max.z.max(tri_aabb.max.z);
        }
        let combined = combined.expand(RAY_EPSILON);

        // Median split along the longest extent.
        let extent = combined.max - combined.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        indices.sort_by(|&a, &b| {
            let ca = triangles[a].centroid()[axis];
            let cb = triangles[b].centroid()[axis];
            ca.total_cmp(&cb)
        });

        let mid = indices.len() / 2;
        let (left_indices, right_indices) = indices.split_at_mut(mid);

        let left = Self::build(triangles, left_indices);
        let right = Self::build(triangles, right_indices);

        match (left, right) {
            (Some(l), Some(r)) => Some(Self::Internal {
                aabb: combined,
                left: Box::new(l),
                right: Box::new(r),
            }),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }

    fn aabb(&self) -> &Aabb {
        match self {
            Self::Leaf { aabb, .. } | Self::Internal { aabb, .. } => aabb,
        }
    }
}

/// Möller–Trumbore ray-triangle intersection.
fn ray_triangle_intersect(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    tri: &Triangle,
) -> Option<f64> {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;

    let h = direction.cross(&edge2);
    let a = edge1.dot(&h);

    // Ray is parallel to triangle
    if a.abs() < RAY_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - tri.v0;
    let u = f * s.dot(&h);

    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * direction.dot(&q);

    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);

    if t > RAY_EPSILON {
        Some(t)
    } else {
        None
    }
}

/// Reference occlusion accelerator over the mesh's own triangles.
///
/// Built from the same flat buffers the mesh is built from, so callers can
/// construct it once and reuse it across weighting calls.
#[derive(Debug)]
pub struct MeshBvh {
    triangles: Vec<Triangle>,
    root: Option<BvhNode>,
    /// Faces incident to each vertex, for self-exclusion.
    vertex_faces: Vec<Vec<usize>>,
}

impl MeshBvh {
    /// Build a BVH from positions and triangle indices.
    pub fn build(positions: &[Point3<f64>], faces: &[[usize; 3]]) -> Self {
        let triangles: Vec<Triangle> = faces
            .iter()
            .map(|f| Triangle {
                v0: positions[f[0]],
                v1: positions[f[1]],
                v2: positions[f[2]],
            })
            .collect();

        let mut vertex_faces = vec![Vec::new(); positions.len()];
        for (face_idx, face) in faces.iter().enumerate() {
            for &vi in face {
                vertex_faces[vi].push(face_idx);
            }
        }

        let mut indices: Vec<usize> = (0..triangles.len()).collect();
        let root = BvhNode::build(&triangles, &mut indices);

        Self {
            triangles,
            root,
            vertex_faces,
        }
    }

    fn trace(
        &self,
        node: &BvhNode,
        origin: &Point3<f64>,
        direction: &Vector3<f64>,
        dir_inv: &Vector3<f64>,
        max_dist: f64,
        skip_faces: &[usize],
    ) -> bool {
        match node.aabb().ray_intersect(origin, dir_inv) {
            Some((t_near, _)) if t_near <= max_dist => {}
            _ => return false,
        }

        match node {
            BvhNode::Leaf { face_idx, .. } => {
                if skip_faces.contains(face_idx) {
                    return false;
                }
                ray_triangle_intersect(origin, direction, &self.triangles[*face_idx])
                    .is_some_and(|t| t <= max_dist)
            }
            BvhNode::Internal { left, right, .. } => {
                self.trace(left, origin, direction, dir_inv, max_dist, skip_faces)
                    || self.trace(right, origin, direction, dir_inv, max_dist, skip_faces)
            }
        }
    }
}

impl OcclusionQuery for MeshBvh {
    fn segment_occluded(&self, from: &Point3<f64>, vertex: usize, to: &Point3<f64>) -> bool {
        let Some(root) = &self.root else {
            return false;
        };

        let delta = to - from;
        let len = delta.norm();
        if len < RAY_EPSILON {
            return false;
        }
        let direction = delta / len;
        let dir_inv = Vector3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);

        // Stop just short of the vertex; its own faces are excluded anyway
        // but neighboring faces meet it at the endpoint too.
        let max_dist = len - RAY_EPSILON;
        let skip = self
            .vertex_faces
            .get(vertex)
            .map(|f| f.as_slice())
            .unwrap_or(&[]);

        self.trace(root, from, &direction, &dir_inv, max_dist, skip)
    }
}
