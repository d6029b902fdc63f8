//! Spatial clustering of same-signature instances
//!
//! Within one combine volume, every unclaimed instance of a signature bucket
//! whose scaled collision bounds touch the volume joins the volume's group.
//! A group is placed at the mean member origin with the mean yaw snapped to a
//! fixed step; each member is then expressed relative to that placement with
//! quantized offsets so rebuilding the same layout yields the same key.

use glam::Vec3;

use crate::instance::PlacedInstance;
use crate::library::ModelLibrary;
use crate::math::{angle_matrix, quantize_vec3, snap_yaw, Angles};
use crate::volume::CombineVolume;

/// Result of scanning one bucket against one volume
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Cluster {
    /// Instances claimed into the group, in bucket order
    pub members: Vec<usize>,
    /// Instances claimed because their model has no collision hull
    pub unhulled: Vec<usize>,
}

/// Claim the bucket's instances that fall inside `volume`.
///
/// `claimed` is indexed by instance and updated for every instance returned,
/// grouped or not.
pub fn cluster_volume(
    volume: &CombineVolume,
    bucket: &[usize],
    instances: &[PlacedInstance],
    claimed: &mut [bool],
    library: &dyn ModelLibrary,
) -> Cluster {
    let mut cluster = Cluster::default();

    for &index in bucket {
        if claimed[index] {
            continue;
        }
        let instance = &instances[index];

        let Some(bounds) = library.collision_bounds(&instance.model, instance.origin, instance.angles)
        else {
            claimed[index] = true;
            cluster.unhulled.push(index);
            continue;
        };

        let bounds = bounds.scaled_about(instance.origin, instance.scale);
        if volume.intersects_box(&bounds) {
            claimed[index] = true;
            cluster.members.push(index);
        }
    }

    cluster
}

/// Placement of one member relative to its group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberTransform {
    pub index: usize,
    /// Quantized offset in the group's yaw frame, as integer steps
    pub origin_steps: [i32; 3],
    /// Quantized relative angles, as integer steps
    pub angle_steps: [i32; 3],
    pub offset: Vec3,
    pub angles: Angles,
}

/// Canonical placement of a group plus each member relative to it
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTransform {
    pub origin: Vec3,
    /// Snapped mean yaw in degrees
    pub yaw: f32,
    pub members: Vec<MemberTransform>,
}

impl GroupTransform {
    /// Transform for `members`, `None` for an empty group
    pub fn compute(
        instances: &[PlacedInstance],
        members: &[usize],
        yaw_snap: f32,
        quantum: f32,
    ) -> Option<Self> {
        if members.is_empty() {
            return None;
        }

        let count = members.len() as f32;
        let (sum_origin, sum_yaw) = members
            .iter()
            .map(|&i| &instances[i])
            .fold((Vec3::ZERO, 0.0f32), |(o, y), inst| (o + inst.origin, y + inst.angles.yaw));

        let origin = sum_origin / count;
        let yaw = snap_yaw(sum_yaw / count, yaw_snap);
        let to_group = angle_matrix(Angles::yaw(-yaw));

        let members = members
            .iter()
            .map(|&index| {
                let inst = &instances[index];
                let relative = to_group * (inst.origin - origin);
                let mut angles = inst.angles;
                angles.yaw -= yaw;

                let (origin_steps, offset) = quantize_vec3(relative, quantum);
                let (angle_steps, quantized) =
                    quantize_vec3(Vec3::from_array(angles.to_array()), quantum);

                MemberTransform {
                    index,
                    origin_steps,
                    angle_steps,
                    offset,
                    angles: Angles::from_array(quantized.to_array()),
                }
            })
            .collect();

        Some(Self {
            origin,
            yaw,
            members,
        })
    }

    /// Angles the merged model is placed with
    pub fn placement_angles(&self) -> Angles {
        Angles::yaw(self.yaw - 90.0)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
