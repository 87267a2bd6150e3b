//! Skeleton input types.
//!
//! A skeleton is a read-only bag of joints and bone segments fed to the
//! skin-weighting pass. Bones are straight segments from `head` to `tail`;
//! the bone whose `start_joint` is 0 is the root and never receives weights.

use nalgebra::Point3;

/// A single bone segment.
#[derive(Debug, Clone, Copy)]
pub struct Bone {
    /// Segment start, at the parent joint.
    pub head: Point3<f64>,

    /// Segment end.
    pub tail: Point3<f64>,

    /// Index of the joint this bone starts at; 0 marks the root bone.
    pub start_joint: usize,
}

impl Bone {
    /// Create a bone from head to tail starting at the given joint.
    pub fn new(head: Point3<f64>, tail: Point3<f64>, start_joint: usize) -> Self {
        Self {
            head,
            tail,
            start_joint,
        }
    }

    /// Whether this bone is the root (excluded from weighting).
    #[inline]
    pub fn is_root(&self) -> bool {
        self.start_joint == 0
    }

    /// Segment length.
    pub fn length(&self) -> f64 {
        (self.tail - self.head).norm()
    }

    /// The point at parameter `t` in [0, 1] along the segment.
    pub fn point_at(&self, t: f64) -> Point3<f64> {
        self.head + (self.tail - self.head) * t
    }

    /// Squared distance from a point to this segment.
    pub fn distance_sq(&self, p: &Point3<f64>) -> f64 {
        let d = self.tail - self.head;
        let len_sq = d.norm_squared();
        let t = if len_sq > 1e-24 {
            ((p - self.head).dot(&d) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (p - self.point_at(t)).norm_squared()
    }
}

/// A skeleton: joint positions plus ordered bone segments.
///
/// Bone order is the output order for skin weights, so callers can map
/// influence indices straight back to their rig.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    /// Joint positions, indexed by `Bone::start_joint`.
    pub joints: Vec<Point3<f64>>,

    /// Bones in rig order.
    pub bones: Vec<Bone>,
}

impl Skeleton {
    /// Create an empty skeleton.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bones, root included.
    #[inline]
    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    /// Whether any non-root bone exists.
    pub fn has_weightable_bones(&self) -> bool {
        self.bones.iter().any(|b| !b.is_root())
    }

    /// Index of the non-root bone whose segment is nearest to `p`.
    pub fn nearest_bone(&self, p: &Point3<f64>) -> Option<usize> {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_root())
            .min_by(|(_, a), (_, b)| a.distance_sq(p).total_cmp(&b.distance_sq(p)))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bone_skeleton() -> Skeleton {
        Skeleton {
            joints: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 2.0, 0.0),
            ],
            bones: vec![
                Bone::new(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0), 0),
                Bone::new(Point3::new(0.0, 1.0, 0.0), Point3::new(0.0, 2.0, 0.0), 1),
            ],
        }
    }

    #[test]
    fn test_root_detection() {
        let skel = two_bone_skeleton();
        assert!(skel.bones[0].is_root());
        assert!(!skel.bones[1].is_root());
        assert!(skel.has_weightable_bones());
    }

    #[test]
    fn test_segment_distance() {
        let bone = Bone::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0), 1);

        // Beside the middle of the segment.
        assert!((bone.distance_sq(&Point3::new(1.0, 3.0, 0.0)) - 9.0).abs() < 1e-12);
        // Beyond the tail: clamped to the endpoint.
        assert!((bone.distance_sq(&Point3::new(3.0, 0.0, 0.0)) - 1.0).abs() < 1e-12);
        // Zero-length bone degenerates to point distance.
        let stub = Bone::new(Point3::origin(), Point3::origin(), 1);
        assert!((stub.distance_sq(&Point3::new(0.0, 2.0, 0.0)) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_bone_skips_root() {
        let skel = two_bone_skeleton();
        // Closest to the root segment, but the root is ineligible.
        let near_root = Point3::new(0.1, 0.2, 0.0);
        assert_eq!(skel.nearest_bone(&near_root), Some(1));
    }

    #[test]
    fn test_nearest_bone_empty() {
        let skel = Skeleton::new();
        assert_eq!(skel.nearest_bone(&Point3::origin()), None);
    }
}
