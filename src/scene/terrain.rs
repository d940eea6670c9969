use std::path::PathBuf;
use std::sync::Arc;

use crate::scene::mesh::MeshData;

/// Renderable terrain chunk: a mesh generated by the terrain collaborator
/// plus a splat-blended material of up to four layers. Rendered inside the
/// G-buffer pass with its own pipeline.
#[derive(Clone, Debug)]
pub struct TerrainComponent {
    pub mesh: Arc<MeshData>,
    pub splatmap: PathBuf,
    pub layers: [Option<PathBuf>; 4],
    pub uv_scales: [f32; 4],
    pub layer_roughness: [f32; 4],
}

impl TerrainComponent {
    pub fn new(mesh: Arc<MeshData>, splatmap: PathBuf) -> Self {
        Self {
            mesh,
            splatmap,
            layers: [None, None, None, None],
            uv_scales: [16.0; 4],
            layer_roughness: [0.9; 4],
        }
    }
}
