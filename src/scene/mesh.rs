use std::sync::Arc;

use crate::math::Mat4f;
use crate::scene::material::Material;

/// Indexed triangle list as produced by an importer. Immutable once built;
/// the backend uploads it on first sight and caches the GPU copy by entity.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    /// Present only for skinned meshes, always both or neither.
    pub bone_weights: Option<Vec<[f32; 4]>>,
    pub bone_indices: Option<Vec<[u16; 4]>>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_skinned(&self) -> bool {
        self.bone_weights.is_some() && self.bone_indices.is_some()
    }

    /// Local-space bounding sphere radius around the origin.
    pub fn bounding_radius(&self) -> f64 {
        let mut max2: f32 = 0.0;
        for p in &self.positions {
            let d2 = p[0] * p[0] + p[1] * p[1] + p[2] * p[2];
            if d2 > max2 {
                max2 = d2;
            }
        }
        f64::from(max2.sqrt())
    }
}

/// Renderable component: shared mesh data plus the material it is shaded
/// with. The cached bounding radius feeds frustum culling.
#[derive(Clone, Debug)]
pub struct MeshComponent {
    pub mesh: Arc<MeshData>,
    pub material: Material,
    pub cast_shadows: bool,
    bounding_radius: f64,
}

impl MeshComponent {
    pub fn new(mesh: Arc<MeshData>, material: Material) -> Self {
        let bounding_radius = mesh.bounding_radius();
        Self {
            mesh,
            material,
            cast_shadows: true,
            bounding_radius,
        }
    }

    pub fn bounding_radius(&self) -> f64 {
        self.bounding_radius
    }
}

/// Per-entity palette of bone matrices, written by the animation system
/// each frame and read by the skinned draw path. Capped at 128 bones to
/// match the bone UBO layout.
#[derive(Clone, Debug, Default)]
pub struct SkinComponent {
    pub bone_matrices: Vec<Mat4f>,
}

pub const MAX_BONES: usize = 128;
