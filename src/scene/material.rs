use std::path::PathBuf;

use crate::math::Vec3;

/// Surface description consumed by the deferred shading path.
///
/// Texture slots are path references resolved through the backend's
/// path-keyed texture cache; the set of present slots (plus a few scalar
/// thresholds) determines the shader variant the material compiles to.
#[derive(Clone, Debug)]
pub struct Material {
    pub albedo: Vec3,
    pub opacity: f64,
    pub metallic: f64,
    pub roughness: f64,
    /// Fragments below this alpha are discarded. Zero disables cutoff.
    pub alpha_cutoff: f64,
    pub emissive: Vec3,
    pub clearcoat: f64,
    pub clearcoat_roughness: f64,
    pub subsurface: f64,
    pub parallax_height_scale: f64,

    pub albedo_map: Option<PathBuf>,
    pub normal_map: Option<PathBuf>,
    pub metallic_roughness_map: Option<PathBuf>,
    pub ao_map: Option<PathBuf>,
    pub emissive_map: Option<PathBuf>,
    pub height_map: Option<PathBuf>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::new(1.0, 1.0, 1.0),
            opacity: 1.0,
            metallic: 0.0,
            roughness: 0.8,
            alpha_cutoff: 0.0,
            emissive: Vec3::new(0.0, 0.0, 0.0),
            clearcoat: 0.0,
            clearcoat_roughness: 0.0,
            subsurface: 0.0,
            parallax_height_scale: 0.0,
            albedo_map: None,
            normal_map: None,
            metallic_roughness_map: None,
            ao_map: None,
            emissive_map: None,
            height_map: None,
        }
    }
}

impl Material {
    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    /// Transparent surfaces are drawn back-to-front in the forward-ish
    /// composite instead of the G-buffer.
    pub fn is_transparent(&self) -> bool {
        self.opacity < 1.0 || self.alpha_cutoff > 0.0
    }
}
