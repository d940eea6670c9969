use crate::math::{Mat3f, Mat4f, Vec3f};
use crate::scene::view::{FrameData, LightSet};
use crate::scene::Material;

pub const MAX_POINT_LIGHTS: usize = 16;
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
pub const MAX_CASCADES: usize = 4;
pub const MAX_BONES: usize = 128;

/// Per-frame camera block, bound as set 0 in every scene pass.
/// std140: matrices are naturally aligned, vec3 is padded to vec4.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PerFrameUbo {
    pub view: Mat4f,
    pub projection: Mat4f,
    pub inv_view_proj: Mat4f,
    pub camera_pos: [f32; 4],
    pub time: f32,
    pub _pad: [f32; 3],
}

/// Per-object push constants, 112 bytes: the model matrix plus the three
/// normal-matrix columns (last lane unused).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PushConstants {
    pub model: Mat4f,
    pub normal_columns: [[f32; 4]; 3],
}

/// Material block for the G-buffer shader. The `has_*` ints mirror the
/// texture slots the variant was compiled with; lod_alpha supports
/// crossfades driven by the host.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialUbo {
    pub albedo: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub alpha_cutoff: f32,
    pub emissive: [f32; 4],
    pub clearcoat: f32,
    pub clearcoat_roughness: f32,
    pub subsurface: f32,
    pub parallax_height_scale: f32,
    pub has_albedo_map: i32,
    pub has_normal_map: i32,
    pub has_metallic_roughness_map: i32,
    pub has_ao_map: i32,
    pub has_emissive_map: i32,
    pub has_height_map: i32,
    pub lod_alpha: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PointLightUbo {
    /// xyz = position, w unused.
    pub position: [f32; 4],
    /// rgb = color, a = intensity.
    pub color: [f32; 4],
    /// x = range, yzw unused.
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectionalLightUbo {
    pub direction: [f32; 4],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LightsUbo {
    pub point: [PointLightUbo; MAX_POINT_LIGHTS],
    pub directional: [DirectionalLightUbo; MAX_DIRECTIONAL_LIGHTS],
    /// x = point count, y = directional count.
    pub counts: [i32; 4],
    /// x = has environment map, y = IBL intensity.
    pub ibl: [f32; 4],
}

/// Cascade matrices plus split planes. std140 float arrays stride to 16
/// bytes, hence the vec4-per-split layout.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ShadowUbo {
    pub cascades: [Mat4f; MAX_CASCADES],
    pub splits: [[f32; 4]; 5],
    pub num_cascades: i32,
    pub has_shadows: i32,
    pub _pad: [i32; 2],
}

/// Bone palette: 16-byte header then 128 matrix slots. The `has_skinning`
/// flag is redundant with the SKINNING shader variant but kept honored at
/// the shader level.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BoneUbo {
    pub bone_count: i32,
    pub has_skinning: i32,
    pub _pad: [i32; 2],
    pub bones: [Mat4f; MAX_BONES],
}

/// Parameter block shared by the post-process family of passes; each pass
/// reads the lanes it cares about.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PostParamsUbo {
    pub matrix_a: Mat4f,
    pub matrix_b: Mat4f,
    pub params0: [f32; 4],
    pub params1: [f32; 4],
    pub flags: [i32; 4],
}

impl Default for PostParamsUbo {
    fn default() -> Self {
        Self {
            matrix_a: identity(),
            matrix_b: identity(),
            params0: [0.0; 4],
            params1: [0.0; 4],
            flags: [0; 4],
        }
    }
}

/// Terrain material block: per-layer tiling and roughness.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TerrainUbo {
    pub uv_scales: [f32; 4],
    pub roughness: [f32; 4],
}

/// SSAO kernel block: 64 tangent-space hemisphere samples.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SsaoUbo {
    pub projection: Mat4f,
    pub inv_projection: Mat4f,
    pub samples: [[f32; 4]; 64],
    /// x = radius, y = bias, z = power, w = noise scale.
    pub params: [f32; 4],
}

fn identity() -> Mat4f {
    use cgmath::SquareMatrix;
    Mat4f::identity()
}

/// Mirrors the projection's second row: the view builder produces GL
/// conventions (Y up), Vulkan NDC has Y down. Clip depth is remapped from
/// [-1, 1] to [0, 1] in the same multiply.
pub fn correct_projection(projection: Mat4f) -> Mat4f {
    #[rustfmt::skip]
    let correction = Mat4f::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.0,
        0.0,  0.0, 0.5, 1.0,
    );
    correction * projection
}

pub fn pack_per_frame(frame: &FrameData, time: f32) -> PerFrameUbo {
    use cgmath::SquareMatrix;
    let projection = correct_projection(frame.projection);
    let view_proj = projection * frame.view;
    PerFrameUbo {
        view: frame.view,
        projection,
        inv_view_proj: view_proj.invert().unwrap_or_else(Mat4f::identity),
        camera_pos: [
            frame.camera_position.x,
            frame.camera_position.y,
            frame.camera_position.z,
            1.0,
        ],
        time,
        _pad: [0.0; 3],
    }
}

pub fn pack_material(material: &Material, lod_alpha: f32) -> MaterialUbo {
    let presence = |present: bool| if present { 1 } else { 0 };
    MaterialUbo {
        albedo: [
            material.albedo.x as f32,
            material.albedo.y as f32,
            material.albedo.z as f32,
            material.opacity as f32,
        ],
        metallic: material.metallic as f32,
        roughness: material.roughness as f32,
        ao: 1.0,
        alpha_cutoff: material.alpha_cutoff as f32,
        emissive: [
            material.emissive.x as f32,
            material.emissive.y as f32,
            material.emissive.z as f32,
            0.0,
        ],
        clearcoat: material.clearcoat as f32,
        clearcoat_roughness: material.clearcoat_roughness as f32,
        subsurface: material.subsurface as f32,
        parallax_height_scale: material.parallax_height_scale as f32,
        has_albedo_map: presence(material.albedo_map.is_some()),
        has_normal_map: presence(material.normal_map.is_some()),
        has_metallic_roughness_map: presence(material.metallic_roughness_map.is_some()),
        has_ao_map: presence(material.ao_map.is_some()),
        has_emissive_map: presence(material.emissive_map.is_some()),
        has_height_map: presence(material.height_map.is_some()),
        lod_alpha,
        _pad: 0.0,
    }
}

pub fn pack_lights(lights: &LightSet, has_ibl: bool, ibl_intensity: f32) -> LightsUbo {
    let mut ubo = LightsUbo {
        point: [PointLightUbo::default(); MAX_POINT_LIGHTS],
        directional: [DirectionalLightUbo::default(); MAX_DIRECTIONAL_LIGHTS],
        counts: [
            lights.point.len().min(MAX_POINT_LIGHTS) as i32,
            lights.directional.len().min(MAX_DIRECTIONAL_LIGHTS) as i32,
            0,
            0,
        ],
        ibl: [
            if has_ibl { 1.0 } else { 0.0 },
            ibl_intensity,
            0.0,
            0.0,
        ],
    };
    for (slot, light) in lights.point.iter().take(MAX_POINT_LIGHTS).enumerate() {
        ubo.point[slot] = PointLightUbo {
            position: [light.position.x, light.position.y, light.position.z, 0.0],
            color: [light.color.x, light.color.y, light.color.z, light.intensity],
            params: [light.range, 0.0, 0.0, 0.0],
        };
    }
    for (slot, light) in lights
        .directional
        .iter()
        .take(MAX_DIRECTIONAL_LIGHTS)
        .enumerate()
    {
        ubo.directional[slot] = DirectionalLightUbo {
            direction: [light.direction.x, light.direction.y, light.direction.z, 0.0],
            color: [light.color.x, light.color.y, light.color.z, light.intensity],
        };
    }
    ubo
}

pub fn pack_push_constants(model: Mat4f, normal: Mat3f) -> PushConstants {
    PushConstants {
        model,
        normal_columns: [
            [normal.x.x, normal.x.y, normal.x.z, 0.0],
            [normal.y.x, normal.y.y, normal.y.z, 0.0],
            [normal.z.x, normal.z.y, normal.z.z, 0.0],
        ],
    }
}

pub fn pack_bones(matrices: &[Mat4f]) -> BoneUbo {
    let mut ubo = BoneUbo {
        bone_count: matrices.len().min(MAX_BONES) as i32,
        has_skinning: if matrices.is_empty() { 0 } else { 1 },
        _pad: [0; 2],
        bones: [identity(); MAX_BONES],
    };
    for (slot, m) in matrices.iter().take(MAX_BONES).enumerate() {
        ubo.bones[slot] = *m;
    }
    ubo
}

/// Hammersley low-discrepancy points mapped into the tangent-space
/// hemisphere, denser near the origin.
pub fn ssao_kernel() -> [[f32; 4]; 64] {
    fn radical_inverse(mut bits: u32) -> f32 {
        bits = (bits << 16) | (bits >> 16);
        bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xaaaa_aaaa) >> 1);
        bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xcccc_cccc) >> 2);
        bits = ((bits & 0x0f0f_0f0f) << 4) | ((bits & 0xf0f0_f0f0) >> 4);
        bits = ((bits & 0x00ff_00ff) << 8) | ((bits & 0xff00_ff00) >> 8);
        bits as f32 * 2.328_306_4e-10
    }

    let mut kernel = [[0.0f32; 4]; 64];
    for (i, sample) in kernel.iter_mut().enumerate() {
        let u = i as f32 / 64.0;
        let v = radical_inverse(i as u32);
        // Cosine-ish hemisphere point.
        let phi = 2.0 * std::f32::consts::PI * u;
        let cos_theta = (1.0 - v).sqrt();
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        let dir = Vec3f::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);
        // Scale samples toward the center of the kernel.
        let scale = 0.1 + 0.9 * (i as f32 / 64.0) * (i as f32 / 64.0);
        *sample = [dir.x * scale, dir.y * scale, dir.z * scale, 0.0];
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use std::mem::size_of;

    #[test]
    fn std140_sizes_match_shader_expectations() {
        assert_eq!(size_of::<PerFrameUbo>(), 3 * 64 + 16 + 16);
        assert_eq!(size_of::<PushConstants>(), 112);
        assert_eq!(size_of::<MaterialUbo>(), 96);
        assert_eq!(size_of::<PointLightUbo>(), 48);
        assert_eq!(size_of::<DirectionalLightUbo>(), 32);
        assert_eq!(
            size_of::<LightsUbo>(),
            MAX_POINT_LIGHTS * 48 + MAX_DIRECTIONAL_LIGHTS * 32 + 16 + 16
        );
        assert_eq!(size_of::<ShadowUbo>(), MAX_CASCADES * 64 + 5 * 16 + 16);
        assert_eq!(size_of::<BoneUbo>(), 16 + MAX_BONES * 64);
    }

    #[test]
    fn material_packing_is_bit_exact() {
        let material = Material {
            albedo: Vec3::new(0.25, 0.5, 0.125),
            opacity: 0.75,
            metallic: 0.3,
            roughness: 0.4,
            alpha_cutoff: 0.5,
            emissive: Vec3::new(1.5, 0.0, 2.0),
            clearcoat: 0.6,
            clearcoat_roughness: 0.2,
            subsurface: 0.1,
            parallax_height_scale: 0.05,
            albedo_map: Some("a.png".into()),
            normal_map: None,
            metallic_roughness_map: Some("mr.png".into()),
            ao_map: None,
            emissive_map: None,
            height_map: None,
        };
        let ubo = pack_material(&material, 1.0);
        assert_eq!(ubo.albedo, [0.25, 0.5, 0.125, 0.75]);
        assert_eq!(ubo.metallic, 0.3f64 as f32);
        assert_eq!(ubo.roughness, 0.4f64 as f32);
        assert_eq!(ubo.alpha_cutoff, 0.5);
        assert_eq!(ubo.emissive, [1.5, 0.0, 2.0, 0.0]);
        assert_eq!(
            [
                ubo.has_albedo_map,
                ubo.has_normal_map,
                ubo.has_metallic_roughness_map,
                ubo.has_ao_map,
                ubo.has_emissive_map,
                ubo.has_height_map
            ],
            [1, 0, 1, 0, 0, 0]
        );
        // Packing twice yields the identical block.
        assert_eq!(ubo, pack_material(&material, 1.0));
    }

    #[test]
    fn projection_correction_mirrors_second_row() {
        let projection = cgmath::perspective(cgmath::Deg(60.0f32), 1.5, 0.1, 100.0);
        let corrected = correct_projection(projection);
        for column in 0..4 {
            assert_eq!(corrected[column][1], -projection[column][1]);
        }
    }

    #[test]
    fn light_counts_are_clamped() {
        use crate::scene::view::{DirectionalLightData, PointLightData};
        let mut lights = LightSet::default();
        for i in 0..40 {
            lights.point.push(PointLightData {
                position: Vec3f::new(i as f32, 0.0, 0.0),
                color: Vec3f::new(1.0, 1.0, 1.0),
                intensity: 1.0,
                range: 10.0,
            });
        }
        lights.directional.push(DirectionalLightData {
            direction: Vec3f::new(0.0, -1.0, 0.0),
            color: Vec3f::new(1.0, 1.0, 1.0),
            intensity: 2.0,
        });
        let ubo = pack_lights(&lights, false, 0.0);
        assert_eq!(ubo.counts[0], MAX_POINT_LIGHTS as i32);
        assert_eq!(ubo.counts[1], 1);
    }

    #[test]
    fn ssao_kernel_stays_in_hemisphere() {
        for sample in ssao_kernel() {
            assert!(sample[2] >= 0.0);
            let len = (sample[0] * sample[0] + sample[1] * sample[1] + sample[2] * sample[2]).sqrt();
            assert!(len <= 1.0 + 1e-5);
        }
    }
}
