pub mod buffer;
pub mod commands;
pub mod csm;
pub mod descriptors;
pub mod device;
pub mod errors;
pub mod frame;
pub mod ibl;
pub mod image;
pub mod instance;
pub mod mesh;
pub mod overlay;
pub mod passes;
pub mod physical_device;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod targets;
pub mod texture;
pub mod uniforms;

pub use errors::{ShaderCompileError, SuitabilityError};
pub use frame::{Renderer, MAX_FRAMES_IN_FLIGHT};
pub use overlay::{DebugLineBuffer, Particle, ParticlePool, UiCallback, UiVertex};
pub use shader::ShaderVariantKey;
