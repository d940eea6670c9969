use std::time::Duration;

use anyhow::Result;
use log::info;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::pump_events::EventLoopExtPumpEvents;
use winit::window::{Window, WindowBuilder};

use crate::config::EngineConfig;
use crate::ecs::World;
use crate::vulkan::Renderer;

/// Top-level runtime: window, ECS world and renderer under one tick.
/// A host drives it as
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// let mut engine = onyx::Engine::initialize(1280, 720, "demo", Default::default())?;
/// while !engine.should_close() {
///     engine.tick(1.0 / 60.0)?;
/// }
/// engine.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    event_loop: EventLoop<()>,
    window: Window,
    pub world: World,
    pub renderer: Renderer,
    should_close: bool,
}

impl Engine {
    /// Creates the window, the Vulkan backend and an empty world.
    pub fn initialize(width: u32, height: u32, title: &str, config: EngineConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(LogicalSize::new(width, height))
            .build(&event_loop)?;

        let mut physics = config.physics.clone();
        physics.threading_enabled = config.threading_enabled;
        let world = World::with_physics_config(physics);
        let renderer =
            unsafe { Renderer::create(&window, config.render.clone(), config.threading_enabled)? };

        info!("engine initialized: {width}x{height} '{title}'");
        Ok(Self {
            event_loop,
            window,
            world,
            renderer,
            should_close: false,
        })
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// Pumps pending window events without blocking.
    pub fn poll_events(&mut self) {
        let should_close = &mut self.should_close;
        let renderer = &mut self.renderer;
        let window = &self.window;
        let _ = self
            .event_loop
            .pump_events(Some(Duration::ZERO), |event, _elwt| {
                match event {
                    Event::WindowEvent { event, .. } => match event {
                        WindowEvent::CloseRequested => *should_close = true,
                        WindowEvent::Resized(_) => renderer.resized = true,
                        _ => {}
                    },
                    Event::AboutToWait => window.request_redraw(),
                    _ => {}
                }
            });
    }

    /// Blocks on the event queue; used while the window is minimized and
    /// there is nothing to render.
    fn wait_events(&mut self) {
        let should_close = &mut self.should_close;
        let renderer = &mut self.renderer;
        let _ = self.event_loop.pump_events(None, |event, _elwt| {
            if let Event::WindowEvent { event, .. } = event {
                match event {
                    WindowEvent::CloseRequested => *should_close = true,
                    WindowEvent::Resized(_) => renderer.resized = true,
                    _ => {}
                }
            }
        });
    }

    /// Advances physics by `dt` seconds.
    pub fn world_step(&mut self, dt: f64) {
        self.world.step(dt);
    }

    /// Records and submits one frame of the current world.
    pub fn render_frame(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.wait_events();
            return Ok(());
        }
        if self.renderer.data.swapchain_extent.width == 0 {
            // Coming back from minimized: the swapchain was parked.
            unsafe { self.renderer.recreate_swapchain(&self.window)? };
        }
        unsafe { self.renderer.render_frame(&self.window, &self.world) }
    }

    /// One full tick: events, physics, then rendering.
    pub fn tick(&mut self, dt: f64) -> Result<()> {
        self.poll_events();
        if self.should_close {
            return Ok(());
        }
        self.world_step(dt);
        self.render_frame()
    }

    /// Waits for the GPU and releases every resource. The engine is
    /// unusable afterwards.
    pub fn shutdown(&mut self) {
        unsafe {
            self.renderer.destroy();
        }
        info!("engine shut down");
    }
}
