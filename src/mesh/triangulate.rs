//! Polygon face triangulation.
//!
//! Faces with more than three vertices are split into triangles by ear
//! clipping in the face's best-fit plane. Corner candidates are tried
//! sharpest interior angle first; an ear is valid when the corner is convex
//! and no other remaining loop vertex lies inside it or on its boundary. If
//! a (near-degenerate) loop offers no valid ear, the sharpest corner is
//! clipped anyway so the pass always terminates.
//!
//! Connectivity is rebuilt wholesale from the resulting loops; vertices and
//! their attributes are untouched, so colocal rings survive while boundary
//! links are re-established at the end.

use nalgebra::{Point2, Vector3};

use super::halfedge::HalfEdgeMesh;
use super::index::VertexId;
use crate::error::{MeshError, Result};

impl HalfEdgeMesh {
    /// Split every face with more than three vertices into triangles.
    ///
    /// Triangular faces pass through unchanged (material tags included).
    /// The mesh must not contain tombstoned faces; run
    /// [`HalfEdgeMesh::compact`] first after removals.
    pub fn triangulate(&mut self) -> Result<()> {
        let mut needs_work = false;
        for f in self.face_ids() {
            if self.face_vertex_count(f) > 3 {
                needs_work = true;
                break;
            }
        }
        if !needs_work {
            return Ok(());
        }

        let mut triangles: Vec<([VertexId; 3], u32)> = Vec::new();
        for f in self.face_ids().collect::<Vec<_>>() {
            let loop_verts: Vec<VertexId> = self.face_vertices(f).collect();
            let material = self.face(f).material;
            if loop_verts.len() == 3 {
                triangles.push(([loop_verts[0], loop_verts[1], loop_verts[2]], material));
            } else {
                for tri in self.clip_polygon(&loop_verts) {
                    triangles.push((tri, material));
                }
            }
        }

        // Rebuild connectivity; vertices (and colocal rings) stay.
        self.halfedges.clear();
        self.faces.clear();
        self.edge_map.clear();
        for v in self.vertex_ids().collect::<Vec<_>>() {
            self.vertex_mut(v).halfedge = super::index::HalfEdgeId::invalid();
        }

        for (fi, (tri, material)) in triangles.iter().enumerate() {
            let f = self.add_face(&tri[..]);
            if !f.is_valid() {
                return Err(MeshError::DegenerateFace { face: fi });
            }
            self.face_mut(f).material = *material;
        }

        self.link_boundary();
        Ok(())
    }

    /// Ear-clip one polygon loop into triangles.
    fn clip_polygon(&self, loop_verts: &[VertexId]) -> Vec<[VertexId; 3]> {
        let n = loop_verts.len();
        debug_assert!(n > 3);

        // Project onto the best-fit plane (Newell normal).
        let mut normal = Vector3::<f64>::zeros();
        for i in 0..n {
            let p0 = self.position(loop_verts[i]);
            let p1 = self.position(loop_verts[(i + 1) % n]);
            normal.x += (p0.y - p1.y) * (p0.z + p1.z);
            normal.y += (p0.z - p1.z) * (p0.x + p1.x);
            normal.z += (p0.x - p1.x) * (p0.y + p1.y);
        }
        if normal.norm() < 1e-12 {
            normal = Vector3::z(); // Collapsed loop, any plane works
        }
        let normal = normal.normalize();
        let u = pick_perpendicular(&normal);
        let v = normal.cross(&u);

        let projected: Vec<Point2<f64>> = loop_verts
            .iter()
            .map(|&vid| {
                let p = self.position(vid).coords;
                Point2::new(p.dot(&u), p.dot(&v))
            })
            .collect();

        let mut remaining: Vec<usize> = (0..n).collect();
        let mut triangles = Vec::with_capacity(n - 2);

        while remaining.len() > 3 {
            let m = remaining.len();

            // Candidate corners, sharpest interior angle first.
            let mut candidates: Vec<(f64, usize)> = (0..m)
                .map(|i| {
                    let prev = projected[remaining[(i + m - 1) % m]];
                    let here = projected[remaining[i]];
                    let next = projected[remaining[(i + 1) % m]];
                    (interior_angle(&prev, &here, &next), i)
                })
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut clipped = None;
            for &(_, i) in &candidates {
                let prev = projected[remaining[(i + m - 1) % m]];
                let here = projected[remaining[i]];
                let next = projected[remaining[(i + 1) % m]];

                // Reflex corners are not ears.
                if cross2(&prev, &here, &next) <= 0.0 {
                    continue;
                }
                // No other remaining vertex may sit inside or on the ear.
                let blocked = remaining.iter().enumerate().any(|(j, &rj)| {
                    j != i
                        && j != (i + m - 1) % m
                        && j != (i + 1) % m
                        && point_in_triangle(&projected[rj], &prev, &here, &next)
                });
                if !blocked {
                    clipped = Some(i);
                    break;
                }
            }

            // Degenerate loop: force the sharpest corner so we terminate.
            let i = clipped.unwrap_or(candidates[0].1);
            triangles.push([
                loop_verts[remaining[(i + m - 1) % m]],
                loop_verts[remaining[i]],
                loop_verts[remaining[(i + 1) % m]],
            ]);
            remaining.remove(i);
        }

        triangles.push([
            loop_verts[remaining[0]],
            loop_verts[remaining[1]],
            loop_verts[remaining[2]],
        ]);
        triangles
    }
}

/// Any unit vector perpendicular to `n`.
fn pick_perpendicular(n: &Vector3<f64>) -> Vector3<f64> {
    let axis = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    n.cross(&axis).normalize()
}

/// z-component of (b-a) x (c-b); positive for a left turn.
fn cross2(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    let ab = b - a;
    let bc = c - b;
    ab.x * bc.y - ab.y * bc.x
}

/// Interior angle at `b` of the corner a-b-c, in [0, pi].
fn interior_angle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    let ba = (a - b).normalize();
    let bc = (c - b).normalize();
    ba.dot(&bc).clamp(-1.0, 1.0).acos()
}

/// Barycentric point-in-triangle test, inclusive of the boundary.
///
/// A vertex sitting exactly on an ear's edge (a collinear reflex corner,
/// say) still blocks the ear; clipping past it would emit overlapping
/// triangles.
fn point_in_triangle(
    p: &Point2<f64>,
    a: &Point2<f64>,
    b: &Point2<f64>,
    c: &Point2<f64>,
) -> bool {
    const EPS: f64 = 1e-12;
    let d0 = cross2(a, b, p);
    let d1 = cross2(b, c, p);
    let d2 = cross2(c, a, p);
    (d0 >= -EPS && d1 >= -EPS && d2 >= -EPS) || (d0 <= EPS && d1 <= EPS && d2 <= EPS)
}
