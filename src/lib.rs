#![allow(
    dead_code,
    clippy::too_many_arguments,
    clippy::unnecessary_wraps
)]

//! A frame-coherent 3D runtime: a deferred Vulkan render graph driven by
//! an entity-component world, and a fixed-timestep rigid-body physics
//! pipeline feeding it through the shared transform store.

pub mod audio;
pub mod config;
pub mod ecs;
pub mod engine;
pub mod math;
pub mod physics;
pub mod scene;
pub mod vulkan;

pub use config::{
    EngineConfig, Interpolation, PhysicsConfig, PostProcessConfig, RenderConfig, ToneMapping,
};
pub use ecs::{CommandQueue, Entity, World, WorldCommand};
pub use engine::Engine;
pub use physics::{
    BodyType, Collider, ColliderShape, CollisionCallbackComponent, ContactManifold, Joint,
    JointKind, RayHit, RigidBody, TriggerComponent,
};
pub use scene::{
    CameraComponent, FrameData, LightComponent, Material, MeshComponent, MeshData, SkinComponent,
    TerrainComponent, Transform,
};
pub use vulkan::Renderer;
