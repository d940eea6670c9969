use thiserror::Error;

/// A physical device failed one of the suitability checks.
#[derive(Debug, Error)]
#[error("suitability error: {0}")]
pub struct SuitabilityError(pub &'static str);

/// GLSL -> SPIR-V compilation failed. Carries the compiler diagnostic so
/// the caller sees the actual error text; the pipeline cache is left
/// untouched for the failing variant.
#[derive(Debug, Error)]
#[error("failed to compile shader '{name}':\n{diagnostic}")]
pub struct ShaderCompileError {
    pub name: String,
    pub diagnostic: String,
}
