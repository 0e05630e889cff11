//! Rotation-matrix / Euler-angle conversions
//!
//! The sensor stack reports orientation as a body rotation matrix; the
//! controller works in Euler angles. The extraction convention is
//!
//! ```text
//! pitch = asin(R[1,2])
//! roll  = atan2(−R[1,0]/cos(pitch), R[1,1]/cos(pitch))
//! yaw   = atan2(−R[0,2]/cos(pitch), R[2,2]/cos(pitch))
//! ```
//!
//! which is undefined at pitch = ±π/2. The extraction detects that
//! singularity instead of propagating NaN into the optimizer.

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Orientation singularity: |cos(pitch)| below threshold
#[derive(Debug, Clone, Copy, Error)]
#[error("orientation singular at pitch {pitch:.4} rad (|cos(pitch)| = {cos_pitch:.2e})")]
pub struct SingularOrientation {
    /// Pitch angle at which the extraction broke down [rad]
    pub pitch: f64,
    /// Magnitude of cos(pitch) that fell below the threshold
    pub cos_pitch: f64,
}

/// Default |cos(pitch)| threshold below which extraction is rejected
pub const SINGULARITY_THRESHOLD: f64 = 1e-6;

/// Extract (roll, pitch, yaw) from a rotation matrix
///
/// Fails with [`SingularOrientation`] when pitch is within `threshold`
/// of ±π/2.
pub fn euler_from_rotation(
    r: &Matrix3<f64>,
    threshold: f64,
) -> Result<Vector3<f64>, SingularOrientation> {
    let sin_pitch = r[(1, 2)].clamp(-1.0, 1.0);
    let pitch = sin_pitch.asin();
    let cos_pitch = pitch.cos();

    if cos_pitch.abs() < threshold {
        return Err(SingularOrientation {
            pitch,
            cos_pitch: cos_pitch.abs(),
        });
    }

    let roll = (-r[(1, 0)] / cos_pitch).atan2(r[(1, 1)] / cos_pitch);
    let yaw = (-r[(0, 2)] / cos_pitch).atan2(r[(2, 2)] / cos_pitch);

    Ok(Vector3::new(roll, pitch, yaw))
}

/// Build the rotation matrix for (roll, pitch, yaw)
///
/// Exact inverse of [`euler_from_rotation`] for pitch strictly inside
/// (−π/2, π/2).
pub fn rotation_from_euler(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    Matrix3::new(
        cy * cr - sy * sp * sr,
        cy * sr + sy * sp * cr,
        -sy * cp,
        -cp * sr,
        cp * cr,
        sp,
        sy * cr + cy * sp * sr,
        sy * sr - cy * sp * cr,
        cy * cp,
    )
}
