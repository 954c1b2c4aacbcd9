//! Fitting the directional light camera around the scene bounds

use glam::{Quat, Vec3};

/// Rotation taking the camera forward axis (-Z) onto `direction`
pub fn light_rotation(direction: Vec3) -> Quat {
    Quat::from_rotation_arc(Vec3::NEG_Z, direction.normalize())
}

/// Half extents, in light space, of the axis-aligned box of dimensions `size` centered on
/// the origin
pub fn light_half_extents(rotation: Quat, size: Vec3) -> Vec3 {
    let inverse = rotation.inverse();
    let half = size * 0.5;
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { -half.x } else { half.x },
            if i & 2 == 0 { -half.y } else { half.y },
            if i & 4 == 0 { -half.z } else { half.z },
        );
        let rotated = inverse * corner;
        min = min.min(rotated);
        max = max.max(rotated);
    }
    (max - min) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_rotation_points_forward_along_direction() {
        let direction = Vec3::new(-1.0, -1.0, -1.0).normalize();
        let rotation = light_rotation(direction);
        assert!((rotation * Vec3::NEG_Z).abs_diff_eq(direction, 1e-5));
    }

    #[rstest]
    #[case(Vec3::NEG_Y, Vec3::new(5.0, 15.0, 10.0))]
    #[case(Vec3::NEG_Z, Vec3::new(5.0, 10.0, 15.0))]
    fn test_box_extents_in_light_space(#[case] direction: Vec3, #[case] expected: Vec3) {
        let extents = light_half_extents(light_rotation(direction), Vec3::new(10.0, 20.0, 30.0));
        assert!(extents.abs_diff_eq(expected, 1e-4), "{extents}");
    }

    #[test]
    fn test_opposite_direction_is_finite() {
        let rotation = light_rotation(Vec3::Z);
        assert!(rotation.is_finite());
        assert!((rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::Z, 1e-5));
    }
}
