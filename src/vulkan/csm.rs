use cgmath::{ortho, InnerSpace, Matrix4, Point3, SquareMatrix, Vector4};

use crate::math::{Mat4f, Vec3f};
use crate::vulkan::uniforms::correct_projection;

/// One shadow cascade: the light-space matrix meshes are rendered with and
/// the view-space depth where this cascade hands over to the next.
#[derive(Clone, Copy, Debug)]
pub struct Cascade {
    pub view_proj: Mat4f,
    pub split_depth: f32,
}

/// Practical split scheme: blend of logarithmic and linear distributions
/// with ratio 0.5, so near cascades stay tight without starving the far
/// ones.
pub fn split_distances(num_cascades: usize, near: f32, far: f32) -> Vec<f32> {
    const LAMBDA: f32 = 0.5;
    (1..=num_cascades)
        .map(|i| {
            let p = i as f32 / num_cascades as f32;
            let log = near * (far / near).powf(p);
            let linear = near + p * (far - near);
            log * LAMBDA + linear * (1.0 - LAMBDA)
        })
        .collect()
}

/// Builds the cascade matrices for one frame.
///
/// Per cascade: slice the camera frustum at the split distances, unproject
/// the slice corners, bound them with a sphere (stable under camera
/// rotation), snap the center to the shadow-map texel grid, then build the
/// light-space view + ortho pair.
pub fn compute_cascades(
    num_cascades: usize,
    near: f32,
    far: f32,
    view: Mat4f,
    projection: Mat4f,
    light_direction: Vec3f,
    resolution: u32,
) -> Vec<Cascade> {
    let splits = split_distances(num_cascades, near, far);
    let inv_view_proj = match (projection * view).invert() {
        Some(m) => m,
        None => return Vec::new(),
    };

    // Full-frustum corners in world space, near plane first.
    let mut corners = [Vec3f::new(0.0, 0.0, 0.0); 8];
    let mut index = 0;
    for z in [-1.0f32, 1.0] {
        for y in [-1.0f32, 1.0] {
            for x in [-1.0f32, 1.0] {
                let clip = Vector4::new(x, y, z, 1.0);
                let world = inv_view_proj * clip;
                corners[index] = Vec3f::new(world.x, world.y, world.z) / world.w;
                index += 1;
            }
        }
    }

    let light_dir = if light_direction.magnitude2() > 1e-12 {
        light_direction.normalize()
    } else {
        Vec3f::new(0.0, -1.0, 0.0)
    };

    let mut cascades = Vec::with_capacity(num_cascades);
    let mut previous_split = near;
    for &split in &splits {
        let t0 = (previous_split - near) / (far - near);
        let t1 = (split - near) / (far - near);

        // Corners of this slice: lerp along the near->far corner rays.
        let mut slice = [Vec3f::new(0.0, 0.0, 0.0); 8];
        for i in 0..4 {
            let ray = corners[i + 4] - corners[i];
            slice[i] = corners[i] + ray * t0;
            slice[i + 4] = corners[i] + ray * t1;
        }

        let mut center = Vec3f::new(0.0, 0.0, 0.0);
        for corner in &slice {
            center += *corner;
        }
        center /= 8.0;

        // Bounding sphere kills the shimmer from the box changing shape as
        // the camera rotates.
        let mut radius: f32 = 0.0;
        for corner in &slice {
            radius = radius.max((*corner - center).magnitude());
        }
        radius = (radius * 16.0).ceil() / 16.0;

        // Snap the center to the texel grid of the shadow map.
        let texels_per_unit = resolution as f32 / (radius * 2.0);
        let up = if light_dir.y.abs() > 0.99 {
            Vec3f::new(0.0, 0.0, 1.0)
        } else {
            Vec3f::new(0.0, 1.0, 0.0)
        };
        let snap_view = Matrix4::look_at_rh(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(light_dir.x, light_dir.y, light_dir.z),
            up,
        );
        let center_light = snap_view * Vector4::new(center.x, center.y, center.z, 1.0);
        let snapped = Vector4::new(
            (center_light.x * texels_per_unit).floor() / texels_per_unit,
            (center_light.y * texels_per_unit).floor() / texels_per_unit,
            center_light.z,
            1.0,
        );
        let back = snap_view
            .invert()
            .map(|inv| inv * snapped)
            .unwrap_or(Vector4::new(center.x, center.y, center.z, 1.0));
        let center = Vec3f::new(back.x, back.y, back.z);

        let eye = center - light_dir * radius * 2.0;
        let light_view = Matrix4::look_at_rh(
            Point3::new(eye.x, eye.y, eye.z),
            Point3::new(center.x, center.y, center.z),
            up,
        );
        let light_proj = ortho(-radius, radius, -radius, radius, 0.0, radius * 4.0);

        cascades.push(Cascade {
            view_proj: correct_projection(light_proj) * light_view,
            split_depth: split,
        });
        previous_split = split;
    }
    cascades
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{perspective, Deg};

    #[test]
    fn splits_are_monotonic_and_bounded() {
        let splits = split_distances(4, 0.1, 100.0);
        assert_eq!(splits.len(), 4);
        for pair in splits.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(splits[0] > 0.1);
        assert!((splits[3] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn split_formula_blends_log_and_linear() {
        // Single cascade degenerates to the far plane under both schemes.
        let splits = split_distances(1, 1.0, 64.0);
        assert!((splits[0] - 64.0).abs() < 1e-4);
        // Half-way split of two cascades: 0.5 * sqrt(near*far-ish log term)
        // + 0.5 * midpoint.
        let splits = split_distances(2, 1.0, 64.0);
        let expected = 0.5 * (64.0f32).powf(0.5) + 0.5 * (1.0 + 0.5 * 63.0);
        assert!((splits[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn cascade_matrices_cover_slice_corners() {
        let view = Matrix4::look_at_rh(
            Point3::new(0.0, 5.0, 10.0),
            Point3::new(0.0, 0.0, 0.0),
            Vec3f::new(0.0, 1.0, 0.0),
        );
        let projection = perspective(Deg(60.0f32), 16.0 / 9.0, 0.5, 50.0);
        let cascades = compute_cascades(
            4,
            0.5,
            50.0,
            view,
            projection,
            Vec3f::new(-0.5, -1.0, -0.3),
            2048,
        );
        assert_eq!(cascades.len(), 4);
        // A point in front of the camera lands inside the first cascade's
        // clip volume.
        let probe = cascades[0].view_proj * Vector4::new(0.0, 0.0, 5.0, 1.0);
        let ndc = probe / probe.w;
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
