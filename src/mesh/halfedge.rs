//! Half-edge mesh data structure.
//!
//! This module provides a half-edge (doubly-connected edge list) representation
//! for polygonal meshes. This structure enables O(1) adjacency queries and is
//! the foundation for the deformation and weighting algorithms.
//!
//! # Structure
//!
//! - Each edge is split into two **half-edges** pointing in opposite directions
//! - Each half-edge knows its **twin** (opposite half-edge), **next** (next half-edge
//!   around the face), **origin vertex**, and **incident face**
//! - Each vertex stores one outgoing half-edge
//! - Each face stores one half-edge on its boundary
//!
//! All relations are dense `u32` index lookups into arenas owned by
//! [`HalfEdgeMesh`]; there are no pointers to dangle.
//!
//! # Boundary Handling
//!
//! Interior half-edges along an open boundary initially have an invalid twin.
//! [`HalfEdgeMesh::link_boundary`] materializes a face-less twin for each of
//! them and chains those twins into boundary loops, so one-ring iteration
//! never needs to special-case interior versus boundary vertices.
//!
//! # Colocal Vertices
//!
//! Meshes with UV seams carry several vertex records at the same position.
//! [`HalfEdgeMesh::link_colocals`] threads such records into a cyclic ring
//! (via each vertex's `next_colocal` pointer) so the algorithms can treat
//! them as one geometric point while keeping per-face attributes distinct.

use std::collections::HashMap;

use nalgebra::{Point2, Point3, Vector3};

use super::index::{FaceId, HalfEdgeId, VertexId};
use crate::error::{MeshError, Result};

/// A vertex in the half-edge mesh.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// The 3D position of this vertex.
    pub position: Point3<f64>,

    /// Texture coordinate.
    pub uv: Point2<f64>,

    /// Vertex normal (zero if the caller supplied none).
    pub normal: Vector3<f64>,

    /// Vertex color, RGBA.
    pub color: [f32; 4],

    /// One outgoing half-edge from this vertex.
    /// After boundary linking, boundary vertices point at a boundary half-edge.
    pub halfedge: HalfEdgeId,

    /// Next vertex in this vertex's colocal ring (cyclic).
    /// Invalid until [`HalfEdgeMesh::link_colocals`] runs; a lone vertex
    /// points at itself afterwards.
    pub next_colocal: VertexId,
}

impl Vertex {
    /// Create a new vertex at the given position with default attributes.
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            uv: Point2::origin(),
            normal: Vector3::zeros(),
            color: [1.0; 4],
            halfedge: HalfEdgeId::invalid(),
            next_colocal: VertexId::invalid(),
        }
    }
}

/// A half-edge in the mesh.
#[derive(Debug, Clone, Copy)]
pub struct HalfEdge {
    /// The vertex this half-edge originates from.
    pub origin: VertexId,

    /// The opposite half-edge (pointing in the reverse direction).
    /// Invalid for unpaired boundary edges until [`HalfEdgeMesh::link_boundary`].
    pub twin: HalfEdgeId,

    /// The next half-edge around the face (counter-clockwise).
    pub next: HalfEdgeId,

    /// The previous half-edge around the face (clockwise).
    /// Redundant but speeds up many operations.
    pub prev: HalfEdgeId,

    /// The face this half-edge belongs to.
    /// Invalid for boundary half-edges.
    pub face: FaceId,
}

impl HalfEdge {
    /// Create a new uninitialized half-edge.
    pub fn new() -> Self {
        Self {
            origin: VertexId::invalid(),
            twin: HalfEdgeId::invalid(),
            next: HalfEdgeId::invalid(),
            prev: HalfEdgeId::invalid(),
            face: FaceId::invalid(),
        }
    }

    /// Check if this half-edge is on the boundary.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        !self.face.is_valid()
    }
}

impl Default for HalfEdge {
    fn default() -> Self {
        Self::new()
    }
}

/// A face in the half-edge mesh.
#[derive(Debug, Clone, Copy)]
pub struct Face {
    /// One half-edge on the boundary of this face.
    /// Invalid marks a removed face awaiting [`HalfEdgeMesh::compact`].
    pub halfedge: HalfEdgeId,

    /// Material/group tag, passed through untouched.
    pub material: u32,
}

impl Face {
    /// Create a new face with the given root half-edge.
    pub fn new(halfedge: HalfEdgeId) -> Self {
        Self {
            halfedge,
            material: 0,
        }
    }

    /// Whether this face slot is still alive.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.halfedge.is_valid()
    }
}

/// A half-edge mesh for polygonal (typically triangle) meshes.
///
/// Owns dense arenas of vertices, half-edges, and faces with full
/// connectivity, plus a directed-edge lookup used during construction to
/// reject non-2-manifold input.
#[derive(Debug, Clone, Default)]
pub struct HalfEdgeMesh {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) halfedges: Vec<HalfEdge>,
    pub(crate) faces: Vec<Face>,

    /// (origin, destination) -> half-edge, for twin linking and
    /// duplicate-edge rejection.
    pub(crate) edge_map: HashMap<(u32, u32), HalfEdgeId>,
}

impl HalfEdgeMesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(num_vertices: usize, num_faces: usize) -> Self {
        // Closed triangle mesh: HE = 3F; open meshes need a little slack
        // for boundary twins.
        let num_halfedges = num_faces * 3 + num_faces / 2;

        Self {
            vertices: Vec::with_capacity(num_vertices),
            halfedges: Vec::with_capacity(num_halfedges),
            faces: Vec::with_capacity(num_faces),
            edge_map: HashMap::with_capacity(num_halfedges),
        }
    }

    // ==================== Accessors ====================

    /// Get the number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of half-edges.
    #[inline]
    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len()
    }

    /// Get the number of live faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.iter().filter(|f| f.is_alive()).count()
    }

    /// Get a vertex by ID.
    #[inline]
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    /// Get a mutable vertex by ID.
    #[inline]
    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.index()]
    }

    /// Get a half-edge by ID.
    #[inline]
    pub fn halfedge(&self, id: HalfEdgeId) -> &HalfEdge {
        &self.halfedges[id.index()]
    }

    /// Get a mutable half-edge by ID.
    #[inline]
    pub fn halfedge_mut(&mut self, id: HalfEdgeId) -> &mut HalfEdge {
        &mut self.halfedges[id.index()]
    }

    /// Get a face by ID.
    #[inline]
    pub fn face(&self, id: FaceId) -> &Face {
        &self.faces[id.index()]
    }

    /// Get a mutable face by ID.
    #[inline]
    pub fn face_mut(&mut self, id: FaceId) -> &mut Face {
        &mut self.faces[id.index()]
    }

    /// Get the position of a vertex.
    #[inline]
    pub fn position(&self, v: VertexId) -> &Point3<f64> {
        &self.vertex(v).position
    }

    /// Set the position of a vertex.
    #[inline]
    pub fn set_position(&mut self, v: VertexId, pos: Point3<f64>) {
        self.vertex_mut(v).position = pos;
    }

    /// Copy all vertex positions into a flat buffer, id order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    // ==================== Topology Queries ====================

    /// Get the twin (opposite) half-edge.
    #[inline]
    pub fn twin(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).twin
    }

    /// Get the next half-edge around the face.
    #[inline]
    pub fn next(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).next
    }

    /// Get the previous half-edge around the face.
    #[inline]
    pub fn prev(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.halfedge(he).prev
    }

    /// Get the origin vertex of a half-edge.
    #[inline]
    pub fn origin(&self, he: HalfEdgeId) -> VertexId {
        self.halfedge(he).origin
    }

    /// Get the destination vertex of a half-edge.
    ///
    /// Resolved through the face loop when the twin is not linked yet, so
    /// this is usable during construction.
    #[inline]
    pub fn dest(&self, he: HalfEdgeId) -> VertexId {
        let twin = self.twin(he);
        if twin.is_valid() {
            self.origin(twin)
        } else {
            self.origin(self.next(he))
        }
    }

    /// Get the face of a half-edge.
    #[inline]
    pub fn face_of(&self, he: HalfEdgeId) -> FaceId {
        self.halfedge(he).face
    }

    /// Check if a half-edge is on the boundary.
    #[inline]
    pub fn is_boundary_halfedge(&self, he: HalfEdgeId) -> bool {
        self.halfedge(he).is_boundary()
    }

    /// Check if a vertex is on the boundary.
    pub fn is_boundary_vertex(&self, v: VertexId) -> bool {
        let start = self.vertex(v).halfedge;
        if !start.is_valid() {
            return true; // Isolated vertex
        }

        let mut he = start;
        loop {
            if self.is_boundary_halfedge(he) {
                return true;
            }
            let twin = self.twin(he);
            if !twin.is_valid() {
                return true; // Unpaired edge before boundary linking
            }
            he = self.next(twin);
            if he == start {
                break;
            }
        }
        false
    }

    // ==================== Iteration ====================

    /// Iterate over all vertex IDs.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).map(VertexId::new)
    }

    /// Iterate over all vertices with their IDs.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexId::new(i), v))
    }

    /// Iterate over all half-edge IDs.
    pub fn halfedge_ids(&self) -> impl Iterator<Item = HalfEdgeId> + '_ {
        (0..self.halfedges.len()).map(HalfEdgeId::new)
    }

    /// Iterate over the IDs of live faces.
    pub fn face_ids(&self) -> impl Iterator<Item = FaceId> + '_ {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_alive())
            .map(|(i, _)| FaceId::new(i))
    }

    /// Iterate over live faces with their IDs.
    pub fn faces(&self) -> impl Iterator<Item = (FaceId, &Face)> + '_ {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_alive())
            .map(|(i, f)| (FaceId::new(i), f))
    }

    /// Iterate over half-edges around a vertex (outgoing half-edges).
    pub fn vertex_halfedges(&self, v: VertexId) -> VertexHalfEdgeIter<'_> {
        VertexHalfEdgeIter::new(self, v)
    }

    /// Iterate over vertices adjacent to a vertex.
    pub fn vertex_neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.vertex_halfedges(v).map(|he| self.dest(he))
    }

    /// Iterate over faces adjacent to a vertex.
    pub fn vertex_faces(&self, v: VertexId) -> impl Iterator<Item = FaceId> + '_ {
        self.vertex_halfedges(v).filter_map(|he| {
            let f = self.face_of(he);
            if f.is_valid() {
                Some(f)
            } else {
                None
            }
        })
    }

    /// Iterate over half-edges around a face.
    pub fn face_halfedges(&self, f: FaceId) -> FaceHalfEdgeIter<'_> {
        FaceHalfEdgeIter::new(self, f)
    }

    /// Iterate over vertices of a face, loop order.
    pub fn face_vertices(&self, f: FaceId) -> impl Iterator<Item = VertexId> + '_ {
        self.face_halfedges(f).map(|he| self.origin(he))
    }

    /// Get the three vertices of a triangular face.
    pub fn face_triangle(&self, f: FaceId) -> [VertexId; 3] {
        let he0 = self.face(f).halfedge;
        let he1 = self.next(he0);
        let he2 = self.next(he1);
        [self.origin(he0), self.origin(he1), self.origin(he2)]
    }

    /// Get the positions of the three vertices of a triangular face.
    pub fn face_positions(&self, f: FaceId) -> [Point3<f64>; 3] {
        let [v0, v1, v2] = self.face_triangle(f);
        [*self.position(v0), *self.position(v1), *self.position(v2)]
    }

    /// Number of vertices in a face loop.
    pub fn face_vertex_count(&self, f: FaceId) -> usize {
        self.face_halfedges(f).count()
    }

    // ==================== Geometry ====================

    /// Compute the normal of a face (Newell's method for polygons).
    pub fn face_normal(&self, f: FaceId) -> Vector3<f64> {
        let mut normal = Vector3::<f64>::zeros();
        let loop_verts: Vec<VertexId> = self.face_vertices(f).collect();
        for (i, &v) in loop_verts.iter().enumerate() {
            let p0 = self.position(v);
            let p1 = self.position(loop_verts[(i + 1) % loop_verts.len()]);
            normal.x += (p0.y - p1.y) * (p0.z + p1.z);
            normal.y += (p0.z - p1.z) * (p0.x + p1.x);
            normal.z += (p0.x - p1.x) * (p0.y + p1.y);
        }
        let len = normal.norm();
        if len > 1e-12 {
            normal / len
        } else {
            Vector3::zeros()
        }
    }

    /// Compute the area of a triangular face.
    pub fn face_area(&self, f: FaceId) -> f64 {
        let [p0, p1, p2] = self.face_positions(f);
        let e1 = p1 - p0;
        let e2 = p2 - p0;
        0.5 * e1.cross(&e2).norm()
    }

    /// Compute the length of an edge.
    pub fn edge_length(&self, he: HalfEdgeId) -> f64 {
        let p0 = self.position(self.origin(he));
        let p1 = self.position(self.dest(he));
        (p1 - p0).norm()
    }

    /// Compute the valence (degree) of a vertex.
    pub fn valence(&self, v: VertexId) -> usize {
        self.vertex_halfedges(v).count()
    }

    // ==================== Construction ====================

    /// Add a new vertex and return its ID.
    pub fn add_vertex(&mut self, position: Point3<f64>) -> VertexId {
        let id = VertexId::new(self.vertices.len());
        self.vertices.push(Vertex::new(position));
        id
    }

    /// Add a batch of vertices with optional per-vertex attributes.
    ///
    /// Each attribute slice, when provided, must match `positions` in
    /// length; otherwise nothing is added and an error is returned.
    pub fn add_vertices(
        &mut self,
        positions: &[Point3<f64>],
        normals: Option<&[Vector3<f64>]>,
        uvs: Option<&[Point2<f64>]>,
        colors: Option<&[[f32; 4]]>,
    ) -> Result<Vec<VertexId>> {
        let n = positions.len();
        if let Some(normals) = normals {
            if normals.len() != n {
                return Err(MeshError::AttributeCountMismatch {
                    attribute: "normal",
                    expected: n,
                    actual: normals.len(),
                });
            }
        }
        if let Some(uvs) = uvs {
            if uvs.len() != n {
                return Err(MeshError::AttributeCountMismatch {
                    attribute: "uv",
                    expected: n,
                    actual: uvs.len(),
                });
            }
        }
        if let Some(colors) = colors {
            if colors.len() != n {
                return Err(MeshError::AttributeCountMismatch {
                    attribute: "color",
                    expected: n,
                    actual: colors.len(),
                });
            }
        }

        let mut ids = Vec::with_capacity(n);
        for (i, &pos) in positions.iter().enumerate() {
            let id = self.add_vertex(pos);
            let v = self.vertex_mut(id);
            if let Some(normals) = normals {
                v.normal = normals[i];
            }
            if let Some(uvs) = uvs {
                v.uv = uvs[i];
            }
            if let Some(colors) = colors {
                v.color = colors[i];
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Add a polygonal face from a vertex loop, counter-clockwise.
    ///
    /// Returns `FaceId::invalid()` without modifying the mesh when the loop
    /// is shorter than 3, repeats a vertex, references a missing vertex, or
    /// any requested directed edge already exists (which would make the
    /// edge non-2-manifold). Callers must check the returned handle.
    pub fn add_face(&mut self, loop_verts: &[VertexId]) -> FaceId {
        let k = loop_verts.len();
        if k < 3 {
            return FaceId::invalid();
        }
        for (i, &v) in loop_verts.iter().enumerate() {
            if !v.is_valid() || v.index() >= self.vertices.len() {
                return FaceId::invalid();
            }
            for &w in &loop_verts[i + 1..] {
                if v == w {
                    return FaceId::invalid();
                }
            }
        }
        // Reject before any mutation: a directed edge may appear only once.
        for i in 0..k {
            let a = loop_verts[i].index() as u32;
            let b = loop_verts[(i + 1) % k].index() as u32;
            if self.edge_map.contains_key(&(a, b)) {
                return FaceId::invalid();
            }
        }

        let base = self.halfedges.len();
        let face_id = FaceId::new(self.faces.len());
        for _ in 0..k {
            self.halfedges.push(HalfEdge::new());
        }
        self.faces.push(Face::new(HalfEdgeId::new(base)));

        for i in 0..k {
            let he_id = HalfEdgeId::new(base + i);
            let a = loop_verts[i];
            let b = loop_verts[(i + 1) % k];

            {
                let he = self.halfedge_mut(he_id);
                he.origin = a;
                he.next = HalfEdgeId::new(base + (i + 1) % k);
                he.prev = HalfEdgeId::new(base + (i + k - 1) % k);
                he.face = face_id;
            }

            if !self.vertex(a).halfedge.is_valid() {
                self.vertex_mut(a).halfedge = he_id;
            }

            self.edge_map
                .insert((a.index() as u32, b.index() as u32), he_id);

            // Link twins eagerly when the opposite direction already exists.
            if let Some(&twin) = self.edge_map.get(&(b.index() as u32, a.index() as u32)) {
                self.halfedge_mut(he_id).twin = twin;
                self.halfedge_mut(twin).twin = he_id;
            }
        }

        face_id
    }

    // ==================== Boundary Linking ====================

    /// Materialize boundary twins and chain them into boundary loops.
    ///
    /// After this runs, `twin(twin(he)) == he` holds for every half-edge and
    /// every boundary vertex's outgoing half-edge is a boundary half-edge,
    /// so one-ring iteration is uniform for interior and boundary vertices.
    pub fn link_boundary(&mut self) {
        // Create a face-less twin for every unpaired half-edge.
        let unpaired: Vec<HalfEdgeId> = self
            .halfedge_ids()
            .filter(|&he| !self.twin(he).is_valid())
            .collect();

        for he in unpaired {
            let boundary_he = HalfEdgeId::new(self.halfedges.len());
            let origin = self.dest(he);
            self.halfedges.push(HalfEdge::new());

            self.halfedge_mut(he).twin = boundary_he;
            let bhe = self.halfedge_mut(boundary_he);
            bhe.origin = origin;
            bhe.twin = he;
            // Face stays invalid (boundary).
        }

        // Chain boundary half-edges: the next one starts where this one ends.
        let boundary_hes: Vec<HalfEdgeId> = self
            .halfedge_ids()
            .filter(|&he| self.is_boundary_halfedge(he))
            .collect();

        let mut outgoing: HashMap<usize, HalfEdgeId> = HashMap::new();
        for &he in &boundary_hes {
            outgoing.insert(self.origin(he).index(), he);
        }

        for &he in &boundary_hes {
            let dest = self.origin(self.twin(he)).index();
            if let Some(&next_he) = outgoing.get(&dest) {
                self.halfedge_mut(he).next = next_he;
                self.halfedge_mut(next_he).prev = he;
            }
        }

        // Boundary vertices point at a boundary half-edge so the one-ring
        // walk starts on the open side.
        for vid in self.vertex_ids().collect::<Vec<_>>() {
            let start = self.vertex(vid).halfedge;
            if !start.is_valid() {
                continue;
            }
            let mut he = start;
            loop {
                if self.is_boundary_halfedge(he) {
                    self.vertex_mut(vid).halfedge = he;
                    break;
                }
                he = self.next(self.twin(he));
                if he == start {
                    break;
                }
            }
        }
    }

    // ==================== Colocal Linking ====================

    /// Thread vertices at (epsilon-)identical positions into cyclic rings.
    ///
    /// Every vertex ends up in exactly one ring; a vertex with no duplicates
    /// forms a ring of size one (pointing at itself). Re-linking with a
    /// different epsilon rebuilds all rings.
    pub fn link_colocals(&mut self, epsilon: f64) {
        let epsilon = epsilon.max(1e-12);
        let inv = 1.0 / epsilon;

        // Hash-grid bucketing; candidates come from the cell and its 26
        // neighbors so ring membership does not depend on cell alignment.
        let mut grid: HashMap<(i64, i64, i64), Vec<VertexId>> = HashMap::new();

        for v in self.vertex_ids().collect::<Vec<_>>() {
            self.vertex_mut(v).next_colocal = v;
        }

        for v in self.vertex_ids().collect::<Vec<_>>() {
            let p = *self.position(v);
            let key = (
                (p.x * inv).floor() as i64,
                (p.y * inv).floor() as i64,
                (p.z * inv).floor() as i64,
            );

            let mut ring_rep = None;
            'search: for dx in -1..=1i64 {
                for dy in -1..=1i64 {
                    for dz in -1..=1i64 {
                        let k = (key.0 + dx, key.1 + dy, key.2 + dz);
                        if let Some(cell) = grid.get(&k) {
                            for &other in cell {
                                if (self.position(other) - p).norm() <= epsilon {
                                    ring_rep = Some(other);
                                    break 'search;
                                }
                            }
                        }
                    }
                }
            }

            if let Some(rep) = ring_rep {
                // Splice v into rep's ring.
                let after = self.vertex(rep).next_colocal;
                self.vertex_mut(rep).next_colocal = v;
                self.vertex_mut(v).next_colocal = after;
            }
            grid.entry(key).or_default().push(v);
        }
    }

    /// Iterate over the colocal ring of a vertex, starting with `v` itself.
    pub fn colocals(&self, v: VertexId) -> ColocalIter<'_> {
        ColocalIter {
            mesh: self,
            start: v,
            current: v,
            done: false,
        }
    }

    /// The canonical (lowest-id) member of a vertex's colocal ring.
    pub fn first_colocal(&self, v: VertexId) -> VertexId {
        self.colocals(v).min().unwrap_or(v)
    }

    // ==================== Removal & Compaction ====================

    /// Remove a face, tombstoning its half-edges.
    ///
    /// The arenas keep their holes until [`HalfEdgeMesh::compact`] runs;
    /// iteration skips dead faces but half-edge storage is left ragged, so
    /// removal should be followed by compaction before running algorithms.
    pub fn remove_face(&mut self, f: FaceId) {
        if !self.face(f).is_alive() {
            return;
        }
        let loop_hes: Vec<HalfEdgeId> = self.face_halfedges(f).collect();
        for &he in &loop_hes {
            let origin = self.origin(he);
            let dest = self.dest(he);
            self.edge_map
                .remove(&(origin.index() as u32, dest.index() as u32));
            let twin = self.twin(he);
            if twin.is_valid() {
                self.halfedge_mut(twin).twin = HalfEdgeId::invalid();
            }
        }
        for &he in &loop_hes {
            *self.halfedge_mut(he) = HalfEdge::new();
        }
        self.face_mut(f).halfedge = HalfEdgeId::invalid();
    }

    /// Reclaim holes left by removals, dropping unreferenced vertices.
    ///
    /// Rebuilds the arenas from the surviving faces. Vertex ids are
    /// remapped densely (relative order preserved); the returned table maps
    /// old vertex ids to new ones (invalid = dropped). Boundary and colocal
    /// links must be re-established afterwards.
    pub fn compact(&mut self) -> Vec<VertexId> {
        let old_vertex_count = self.vertices.len();
        let mut used = vec![false; old_vertex_count];
        let mut face_loops: Vec<(Vec<VertexId>, u32)> = Vec::with_capacity(self.num_faces());

        for f in self.face_ids().collect::<Vec<_>>() {
            let loop_verts: Vec<VertexId> = self.face_vertices(f).collect();
            for &v in &loop_verts {
                used[v.index()] = true;
            }
            face_loops.push((loop_verts, self.face(f).material));
        }

        let mut remap = vec![VertexId::invalid(); old_vertex_count];
        let mut new_vertices = Vec::new();
        for (old, vertex) in self.vertices.iter().enumerate() {
            if used[old] {
                remap[old] = VertexId::new(new_vertices.len());
                let mut v = vertex.clone();
                v.halfedge = HalfEdgeId::invalid();
                v.next_colocal = VertexId::invalid();
                new_vertices.push(v);
            }
        }

        self.vertices = new_vertices;
        self.halfedges = Vec::new();
        self.faces = Vec::new();
        self.edge_map = HashMap::new();

        for (loop_verts, material) in face_loops {
            let mapped: Vec<VertexId> = loop_verts.iter().map(|v| remap[v.index()]).collect();
            let f = self.add_face(&mapped);
            debug_assert!(f.is_valid());
            if f.is_valid() {
                self.face_mut(f).material = material;
            }
        }

        remap
    }

    // ==================== Validation ====================

    /// Check that all connectivity is consistent.
    pub fn is_valid(&self) -> bool {
        for (vid, v) in self.vertices() {
            if v.halfedge.is_valid() && self.origin(v.halfedge) != vid {
                return false;
            }
        }

        for heid in self.halfedge_ids() {
            let he = self.halfedge(heid);
            if !he.origin.is_valid() {
                continue; // Tombstoned by removal
            }
            if he.twin.is_valid() && self.twin(he.twin) != heid {
                return false;
            }
            if he.next.is_valid() && self.prev(he.next) != heid {
                return false;
            }
            if he.prev.is_valid() && self.next(he.prev) != heid {
                return false;
            }
        }

        for (fid, _) in self.faces() {
            let mut count = 0;
            for he in self.face_halfedges(fid) {
                if self.face_of(he) != fid {
                    return false;
                }
                count += 1;
                if count > self.halfedges.len() {
                    return false; // Unclosed loop
                }
            }
            if count < 3 {
                return false;
            }
        }

        true
    }
}

/// Iterator over outgoing half-edges around a vertex.
pub struct VertexHalfEdgeIter<'a> {
    mesh: &'a HalfEdgeMesh,
    start: HalfEdgeId,
    current: HalfEdgeId,
    done: bool,
}

impl<'a> VertexHalfEdgeIter<'a> {
    fn new(mesh: &'a HalfEdgeMesh, v: VertexId) -> Self {
        let start = mesh.vertex(v).halfedge;
        Self {
            mesh,
            start,
            current: start,
            done: !start.is_valid(),
        }
    }
}

impl<'a> Iterator for VertexHalfEdgeIter<'a> {
    type Item = HalfEdgeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;

        // Next outgoing half-edge: twin -> next. Stops early if twins are
        // not linked yet (open boundary before link_boundary).
        let twin = self.mesh.twin(self.current);
        if !twin.is_valid() {
            self.done = true;
            return Some(result);
        }
        self.current = self.mesh.next(twin);

        if self.current == self.start || !self.current.is_valid() {
            self.done = true;
        }

        Some(result)
    }
}

/// Iterator over half-edges around a face.
pub struct FaceHalfEdgeIter<'a> {
    mesh: &'a HalfEdgeMesh,
    start: HalfEdgeId,
    current: HalfEdgeId,
    done: bool,
}

impl<'a> FaceHalfEdgeIter<'a> {
    fn new(mesh: &'a HalfEdgeMesh, f: FaceId) -> Self {
        let start = mesh.face(f).halfedge;
        Self {
            mesh,
            start,
            current: start,
            done: !start.is_valid(),
        }
    }
}

impl<'a> Iterator for FaceHalfEdgeIter<'a> {
    type Item = HalfEdgeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;
        self.current = self.mesh.next(self.current);

        if self.current == self.start || !self.current.is_valid() {
            self.done = true;
        }

        Some(result)
    }
}

/// Iterator over a colocal ring.
pub struct ColocalIter<'a> {
    mesh: &'a HalfEdgeMesh,
    start: VertexId,
    current: VertexId,
    done: bool,
}

impl<'a> Iterator for ColocalIter<'a> {
    type Item = VertexId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;
        let next = self.mesh.vertex(self.current).next_colocal;

        if !next.is_valid() || next == self.start {
            self.done = true;
        } else {
            self.current = next;
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_loop(mesh: &mut HalfEdgeMesh) -> Vec<VertexId> {
        vec![
            mesh.add_vertex(Point3::new(0.0, 0.0, 0.0)),
            mesh.add_vertex(Point3::new(1.0, 0.0, 0.0)),
            mesh.add_vertex(Point3::new(1.0, 1.0, 0.0)),
            mesh.add_vertex(Point3::new(0.0, 1.0, 0.0)),
        ]
    }

    #[test]
    fn test_empty_mesh() {
        let mesh = HalfEdgeMesh::new();
        assert_eq!(mesh.num_vertices(), 0);
        assert_eq!(mesh.num_halfedges(), 0);
        assert_eq!(mesh.num_faces(), 0);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_add_face_triangle() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        let f = mesh.add_face(&[v[0], v[1], v[2]]);
        assert!(f.is_valid());
        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(mesh.num_halfedges(), 3);
        assert!(mesh.is_valid());
        assert_eq!(mesh.face_triangle(f), [v[0], v[1], v[2]]);
    }

    #[test]
    fn test_add_face_rejects_duplicate_directed_edge() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        let f0 = mesh.add_face(&[v[0], v[1], v[2]]);
        assert!(f0.is_valid());

        // Same winding reuses directed edge (v0, v1): non-2-manifold.
        let f1 = mesh.add_face(&[v[0], v[1], v[3]]);
        assert!(!f1.is_valid());
        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(mesh.num_halfedges(), 3);

        // Opposite winding shares the edge legally.
        let f2 = mesh.add_face(&[v[1], v[0], v[3]]);
        assert!(f2.is_valid());
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn test_add_face_rejects_degenerate_loop() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        assert!(!mesh.add_face(&[v[0], v[1]]).is_valid());
        assert!(!mesh.add_face(&[v[0], v[1], v[0]]).is_valid());
        assert_eq!(mesh.num_faces(), 0);
    }

    #[test]
    fn test_twin_linking() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        mesh.add_face(&[v[0], v[1], v[2]]);
        mesh.add_face(&[v[0], v[2], v[3]]);

        // The shared edge (v0,v2)/(v2,v0) must be twinned.
        let he = mesh.edge_map[&(v[0].index() as u32, v[2].index() as u32)];
        let twin = mesh.twin(he);
        assert!(twin.is_valid());
        assert_eq!(mesh.twin(twin), he);
        assert_eq!(mesh.origin(twin), v[2]);
    }

    #[test]
    fn test_link_boundary_closes_twins() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        mesh.add_face(&[v[0], v[1], v[2]]);
        mesh.link_boundary();

        // 3 interior + 3 boundary half-edges.
        assert_eq!(mesh.num_halfedges(), 6);
        for he in mesh.halfedge_ids() {
            assert!(mesh.twin(he).is_valid());
            assert_eq!(mesh.twin(mesh.twin(he)), he);
        }
        assert!(mesh.is_valid());

        // The boundary loop closes.
        let bhe = mesh
            .halfedge_ids()
            .find(|&he| mesh.is_boundary_halfedge(he))
            .unwrap();
        let mut he = bhe;
        let mut steps = 0;
        loop {
            he = mesh.next(he);
            steps += 1;
            if he == bhe {
                break;
            }
            assert!(steps <= 3);
        }
        assert_eq!(steps, 3);
    }

    #[test]
    fn test_one_ring_uniform_at_boundary() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        mesh.add_face(&[v[0], v[1], v[2]]);
        mesh.add_face(&[v[0], v[2], v[3]]);
        mesh.link_boundary();

        // v0 touches both faces; its one-ring covers v1, v2, v3.
        let neighbors: Vec<VertexId> = mesh.vertex_neighbors(v[0]).collect();
        assert_eq!(neighbors.len(), 3);
        for n in [v[1], v[2], v[3]] {
            assert!(neighbors.contains(&n), "missing neighbor {:?}", n);
        }
        assert!(mesh.is_boundary_vertex(v[0]));
    }

    #[test]
    fn test_link_colocals_ring_size() {
        let mut mesh = HalfEdgeMesh::new();
        // Three records at one position, two elsewhere.
        let p = Point3::new(1.0, 2.0, 3.0);
        let a = mesh.add_vertex(p);
        let b = mesh.add_vertex(Point3::new(5.0, 0.0, 0.0));
        let c = mesh.add_vertex(p);
        let d = mesh.add_vertex(p);

        mesh.link_colocals(1e-9);

        let ring: Vec<VertexId> = mesh.colocals(c).collect();
        assert_eq!(ring.len(), 3);
        for v in [a, c, d] {
            assert!(ring.contains(&v));
        }
        assert_eq!(mesh.colocals(b).count(), 1);
        assert_eq!(mesh.first_colocal(d), a);
        assert_eq!(mesh.first_colocal(a), a);
    }

    #[test]
    fn test_link_colocals_epsilon_grouping() {
        let mut mesh = HalfEdgeMesh::new();
        let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Point3::new(0.0005, 0.0, 0.0));
        let c = mesh.add_vertex(Point3::new(0.5, 0.0, 0.0));

        mesh.link_colocals(1e-3);

        assert_eq!(mesh.colocals(a).count(), 2);
        assert_eq!(mesh.first_colocal(b), a);
        assert_eq!(mesh.colocals(c).count(), 1);
    }

    #[test]
    fn test_remove_face_and_compact() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        let f0 = mesh.add_face(&[v[0], v[1], v[2]]);
        let f1 = mesh.add_face(&[v[0], v[2], v[3]]);
        assert!(f0.is_valid() && f1.is_valid());

        mesh.remove_face(f0);
        assert_eq!(mesh.num_faces(), 1);

        let remap = mesh.compact();
        // v1 was only used by the removed face and is dropped.
        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.num_faces(), 1);
        assert!(!remap[v[1].index()].is_valid());
        assert!(remap[v[0].index()].is_valid());
        assert!(mesh.is_valid());

        // The removed directed edge is free again after compaction.
        let nv0 = remap[v[0].index()];
        let nv2 = remap[v[2].index()];
        let apex = mesh.add_vertex(Point3::new(0.5, -1.0, 0.0));
        let g = mesh.add_face(&[nv2, nv0, apex]);
        assert!(g.is_valid());
    }

    #[test]
    fn test_face_normal_and_area() {
        let mut mesh = HalfEdgeMesh::new();
        let v = quad_loop(&mut mesh);
        let f = mesh.add_face(&[v[0], v[1], v[2]]);
        let n = mesh.face_normal(f);
        assert!((n.z - 1.0).abs() < 1e-12);
        assert!((mesh.face_area(f) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_add_vertices_attribute_mismatch() {
        let mut mesh = HalfEdgeMesh::new();
        let positions = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let normals = [Vector3::z()];
        let result = mesh.add_vertices(&positions, Some(&normals), None, None);
        assert!(result.is_err());
        assert_eq!(mesh.num_vertices(), 0);
    }
}
