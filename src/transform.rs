//! Image-space to Cartesian conversion and rigid transforms.

use crate::types::{SensorImagePoint, SensorPoint};

/// Convert an image point to a 3D point.
///
/// The image coordinates are tangents of an undistorted pinhole ray, so the
/// ray is normalized and scaled by `distance`. `y` is the forward axis.
pub fn to_cartesian(image_x: f32, image_z: f32, distance: f32) -> [f32; 3] {
    let hypotenuse = (image_x * image_x + image_z * image_z + 1.0).sqrt();
    let ratio = distance / hypotenuse;
    [-image_x * ratio, ratio, -image_z * ratio]
}

/// Translation followed by a precomputed rotation matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    translation: [f32; 3],
    /// 3x3 row-major rotation matrix.
    rotation: [[f32; 3]; 3],
}

impl RigidTransform {
    /// Build from a translation and a rotation quaternion `[x, y, z, w]`.
    ///
    /// The quaternion must be unit length; it is expanded as given, without
    /// normalization.
    pub fn new(translation: [f32; 3], quaternion: [f32; 4]) -> Self {
        let [x, y, z, w] = quaternion;
        let (xx, xy, xz, xw) = (x * x, x * y, x * z, x * w);
        let (yy, yz, yw) = (y * y, y * z, y * w);
        let (zz, zw) = (z * z, z * w);

        let rotation = [
            [1.0 - 2.0 * (yy + zz), 2.0 * (xy - zw),       2.0 * (xz + yw)],
            [2.0 * (xy + zw),       1.0 - 2.0 * (xx + zz), 2.0 * (yz - xw)],
            [2.0 * (xz - yw),       2.0 * (yz + xw),       1.0 - 2.0 * (xx + yy)],
        ];

        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new([0.0; 3], [0.0, 0.0, 0.0, 1.0])
    }

    pub fn translation(&self) -> [f32; 3] {
        self.translation
    }

    pub fn rotation(&self) -> &[[f32; 3]; 3] {
        &self.rotation
    }

    /// `R·p + t`.
    pub fn apply(&self, point: [f32; 3]) -> [f32; 3] {
        let m = &self.rotation;
        let t = &self.translation;
        let [x, y, z] = point;
        [
            x * m[0][0] + y * m[0][1] + z * m[0][2] + t[0],
            x * m[1][0] + y * m[1][1] + z * m[1][2] + t[1],
            x * m[2][0] + y * m[2][1] + z * m[2][2] + t[2],
        ]
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SensorPoint {
    pub fn from_image_point(image_point: &SensorImagePoint) -> Self {
        let [x, y, z] = to_cartesian(
            image_point.image_x,
            image_point.image_z,
            image_point.distance,
        );
        Self {
            timestamp: image_point.timestamp.max(0) as u64,
            x,
            y,
            z,
            intensity: image_point.intensity,
            return_number: image_point.return_type,
            valid: image_point.is_valid(),
            saturated: image_point.is_saturated(),
        }
    }

    /// Copy of this point with its position moved by `transform`.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        let [x, y, z] = transform.apply([self.x, self.y, self.z]);
        Self { x, y, z, ..*self }
    }
}
