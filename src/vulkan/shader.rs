use anyhow::{anyhow, Result};
use bitflags::bitflags;
use log::debug;

use crate::scene::Material;
use crate::vulkan::errors::ShaderCompileError;

bitflags! {
    /// Feature set a material's shader permutation is compiled with. The
    /// presence bitmask of the material's texture slots plus rig flags.
    /// Equal keys always resolve to the same pipeline handle.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderVariantKey: u32 {
        const ALBEDO_MAP             = 1 << 0;
        const NORMAL_MAP             = 1 << 1;
        const METALLIC_ROUGHNESS_MAP = 1 << 2;
        const AO_MAP                 = 1 << 3;
        const EMISSIVE_MAP           = 1 << 4;
        const ALPHA_CUTOFF           = 1 << 5;
        const CLEARCOAT              = 1 << 6;
        const PARALLAX_MAPPING       = 1 << 7;
        const SUBSURFACE             = 1 << 8;
        const SKINNING               = 1 << 9;
        const INSTANCED              = 1 << 10;
    }
}

impl ShaderVariantKey {
    /// Derives the material half of the key; SKINNING and INSTANCED are
    /// decided per draw.
    pub fn from_material(material: &Material) -> Self {
        let mut key = Self::empty();
        key.set(Self::ALBEDO_MAP, material.albedo_map.is_some());
        key.set(Self::NORMAL_MAP, material.normal_map.is_some());
        key.set(
            Self::METALLIC_ROUGHNESS_MAP,
            material.metallic_roughness_map.is_some(),
        );
        key.set(Self::AO_MAP, material.ao_map.is_some());
        key.set(Self::EMISSIVE_MAP, material.emissive_map.is_some());
        key.set(Self::ALPHA_CUTOFF, material.alpha_cutoff > 0.0);
        key.set(Self::CLEARCOAT, material.clearcoat > 0.0);
        key.set(
            Self::PARALLAX_MAPPING,
            material.height_map.is_some() && material.parallax_height_scale > 0.0,
        );
        key.set(Self::SUBSURFACE, material.subsurface > 0.0);
        key
    }

    /// Macro names injected as `#define FEATURE_*` into the GLSL source.
    pub fn defines(self) -> Vec<&'static str> {
        let table = [
            (Self::ALBEDO_MAP, "FEATURE_ALBEDO_MAP"),
            (Self::NORMAL_MAP, "FEATURE_NORMAL_MAP"),
            (Self::METALLIC_ROUGHNESS_MAP, "FEATURE_METALLIC_ROUGHNESS_MAP"),
            (Self::AO_MAP, "FEATURE_AO_MAP"),
            (Self::EMISSIVE_MAP, "FEATURE_EMISSIVE_MAP"),
            (Self::ALPHA_CUTOFF, "FEATURE_ALPHA_CUTOFF"),
            (Self::CLEARCOAT, "FEATURE_CLEARCOAT"),
            (Self::PARALLAX_MAPPING, "FEATURE_PARALLAX_MAPPING"),
            (Self::SUBSURFACE, "FEATURE_SUBSURFACE"),
            (Self::SKINNING, "FEATURE_SKINNING"),
            (Self::INSTANCED, "FEATURE_INSTANCED"),
        ];
        table
            .into_iter()
            .filter_map(|(flag, name)| self.contains(flag).then_some(name))
            .collect()
    }
}

pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// GLSL -> SPIR-V front end. Sources are embedded in the binary and
/// compiled lazily per variant; the SPIR-V is dropped once the pipeline
/// exists.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
}

impl ShaderCompiler {
    pub fn new() -> Result<Self> {
        let compiler =
            shaderc::Compiler::new().ok_or_else(|| anyhow!("failed to initialize shaderc"))?;
        Ok(Self { compiler })
    }

    pub fn compile(
        &self,
        name: &str,
        source: &str,
        stage: ShaderStage,
        defines: &[&str],
    ) -> Result<Vec<u32>> {
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| anyhow!("failed to create shaderc options"))?;
        for define in defines {
            options.add_macro_definition(define, None);
        }
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let kind = match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        };

        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&options))
            .map_err(|error| {
                ShaderCompileError {
                    name: name.to_string(),
                    diagnostic: error.to_string(),
                }
            })?;
        debug!("compiled shader '{}' ({:?})", name, defines);
        Ok(artifact.as_binary().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_materials_share_a_key() {
        let mut a = Material::default();
        a.albedo_map = Some("wood.png".into());
        a.alpha_cutoff = 0.5;
        let b = a.clone();
        assert_eq!(
            ShaderVariantKey::from_material(&a),
            ShaderVariantKey::from_material(&b)
        );
    }

    #[test]
    fn key_tracks_presence_bits() {
        let mut material = Material::default();
        material.normal_map = Some("n.png".into());
        material.clearcoat = 0.4;
        let key = ShaderVariantKey::from_material(&material);
        assert!(key.contains(ShaderVariantKey::NORMAL_MAP));
        assert!(key.contains(ShaderVariantKey::CLEARCOAT));
        assert!(!key.contains(ShaderVariantKey::ALBEDO_MAP));
        assert!(!key.contains(ShaderVariantKey::SKINNING));
    }

    #[test]
    fn defines_match_set_flags() {
        let key = ShaderVariantKey::ALBEDO_MAP | ShaderVariantKey::INSTANCED;
        let defines = key.defines();
        assert_eq!(defines, vec!["FEATURE_ALBEDO_MAP", "FEATURE_INSTANCED"]);
    }
}
