pub use crate::physics::PhysicsConfig;

/// Tone-mapping operator applied in the composite / present passes.
/// Discriminants are the values the shaders switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ToneMapping {
    Reinhard = 0,
    Aces = 1,
    Uncharted2 = 2,
    Passthrough = 3,
}

/// Keyframe interpolation modes recognized from animation assets. Clip
/// evaluation itself lives with the animation collaborator; the runtime
/// only agrees on the vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
    CubicSpline,
}

/// Post-processing toggles and parameters. Passes gated off here are
/// skipped cleanly; downstream passes read whatever the previous enabled
/// pass wrote.
#[derive(Clone, Debug)]
pub struct PostProcessConfig {
    pub bloom_enabled: bool,
    pub ssao_enabled: bool,
    pub fxaa_enabled: bool,
    pub taa_enabled: bool,
    pub dof_enabled: bool,
    pub motion_blur_enabled: bool,
    pub vignette_enabled: bool,
    pub color_grading_enabled: bool,

    pub tone_mapping: ToneMapping,
    pub gamma: f32,
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    /// TAA history blend weight.
    pub taa_feedback: f32,
    pub dof_focus_distance: f32,
    pub dof_focus_range: f32,
    pub motion_blur_samples: i32,
    pub motion_blur_strength: f32,
    pub vignette_strength: f32,
    /// Per-channel multiplier for color grading.
    pub color_grading: [f32; 3],
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            bloom_enabled: true,
            ssao_enabled: true,
            fxaa_enabled: false,
            taa_enabled: true,
            dof_enabled: false,
            motion_blur_enabled: false,
            vignette_enabled: false,
            color_grading_enabled: false,
            tone_mapping: ToneMapping::Aces,
            gamma: 2.2,
            bloom_threshold: 1.0,
            bloom_intensity: 0.6,
            taa_feedback: 0.9,
            dof_focus_distance: 8.0,
            dof_focus_range: 5.0,
            motion_blur_samples: 12,
            motion_blur_strength: 0.5,
            vignette_strength: 0.35,
            color_grading: [1.0, 1.0, 1.0],
        }
    }
}

/// Cascaded-shadow-map setup, fixed at creation through `create_csm`.
#[derive(Clone, Debug)]
pub struct ShadowConfig {
    pub num_cascades: usize,
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            num_cascades: 4,
            resolution: 2048,
            near: 0.1,
            far: 120.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub post: PostProcessConfig,
    pub shadows: ShadowConfig,
    pub debug_lines_enabled: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            post: PostProcessConfig::default(),
            shadows: ShadowConfig::default(),
            debug_lines_enabled: false,
        }
    }
}

/// Top-level engine configuration consumed by `Engine::initialize`.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub render: RenderConfig,
    pub physics: PhysicsConfig,
    /// Enables the data-parallel narrowphase and view-builder sections.
    pub threading_enabled: bool,
}
