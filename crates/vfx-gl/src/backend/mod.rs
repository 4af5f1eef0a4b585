//! Graphics backends the builder issues its GL calls against.
//!
//! ```text
//! OpenGlBuilder
//!     └── GlContext<B>
//!             └── GlBackend trait
//!                     ├── HeadlessBackend (software emulation)
//!                     └── GlowBackend (glow::Context, feature "glow")
//! ```
//!
//! Every call targets the context the host made current; backends never
//! switch contexts themselves.

mod headless;

#[cfg(feature = "glow")]
mod glow_backend;

pub use headless::{HeadlessBackend, HeadlessUniform};

#[cfg(feature = "glow")]
pub use glow_backend::GlowBackend;

use std::fmt::Debug;

use crate::context::GlCapabilities;
use crate::desc::{GpuTexture, GpuTextureType, UniformType, UniformValue};

/// Texture, shader and program primitives of a GL-like API.
///
/// Handles are plain copyable names; ownership of the objects they name is
/// tracked by the caller, which must pair every `create_*`/`compile_*`/`link_*`
/// with the matching `delete_*`.
pub trait GlBackend {
    /// Texture object name.
    type Texture: Copy + Eq + Debug;
    /// Shader object name.
    type Shader: Copy + Eq + Debug;
    /// Program object name.
    type Program: Copy + Eq + Debug;
    /// Uniform location within a linked program.
    type UniformLocation: Clone + Debug;

    /// Backend name.
    fn name(&self) -> &'static str;

    /// Queries driver limits and extensions. Expensive; callers cache it.
    fn query_capabilities(&self) -> GlCapabilities;

    /// Creates a texture of the declared kind and uploads its pixels.
    ///
    /// Returns the driver message on failure; no object is left behind.
    fn create_texture(&self, texture: &GpuTexture) -> Result<Self::Texture, String>;

    /// Deletes a texture.
    fn delete_texture(&self, texture: Self::Texture);

    /// Binds a texture to a texture unit.
    fn bind_texture(&self, unit: u32, texture_type: GpuTextureType, texture: Self::Texture);

    /// Compiles a fragment shader, returning the info log on failure.
    fn compile_fragment_shader(&self, source: &str) -> Result<Self::Shader, String>;

    /// Deletes a shader.
    fn delete_shader(&self, shader: Self::Shader);

    /// Links a program from a compiled fragment shader, returning the info
    /// log on failure.
    fn link_program(&self, fragment: Self::Shader) -> Result<Self::Program, String>;

    /// Deletes a program.
    fn delete_program(&self, program: Self::Program);

    /// Makes a program current.
    fn use_program(&self, program: Self::Program);

    /// Resolves a uniform by name; `None` if absent or optimized out.
    fn uniform_location(&self, program: Self::Program, name: &str) -> Option<Self::UniformLocation>;

    /// Type of an active uniform, `None` for samplers or unknown names.
    fn active_uniform_type(&self, program: Self::Program, name: &str) -> Option<UniformType>;

    /// Pushes a value to a uniform of the current program.
    fn set_uniform(&self, location: &Self::UniformLocation, value: &UniformValue);

    /// Points a sampler uniform of the current program at a texture unit.
    fn set_sampler(&self, location: &Self::UniformLocation, unit: u32);
}
