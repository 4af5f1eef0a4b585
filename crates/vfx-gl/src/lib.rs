//! OpenGL program builder for OCIO GPU shaders.
//!
//! Takes a [`ShaderDesc`] (generated GLSL transform body, LUT textures and
//! dynamic parameters), uploads the LUTs as textures, compiles the transform
//! together with the host's own fragment code and keeps the program's
//! uniforms in sync with the description's dynamic values.
//!
//! # Architecture
//!
//! ```text
//! OpenGlBuilder
//!     ├── TextureRegistry   LUT textures + texture unit assignment
//!     ├── UniformTable      dynamic parameters -> uniform locations
//!     └── ProgramCache      compile/link, reused while the key is unchanged
//!             └── GlContext<B: GlBackend>  (HeadlessBackend, GlowBackend)
//! ```
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use vfx_gl::{DynamicProperty, GlContext, GpuShaderDesc, HeadlessBackend, OpenGlBuilder};
//! use vfx_gl::{UniformType, UniformValue};
//!
//! let ctx = GlContext::acquire(HeadlessBackend::new())?;
//!
//! let exposure = DynamicProperty::new(UniformValue::Float(0.0));
//! let desc = GpuShaderDesc::builder()
//!     .shader_text("uniform float exposure;\nvec4 ocio(vec4 c) { return c * exp2(exposure); }")
//!     .uniform("exposure", UniformType::Float, exposure.clone())
//!     .build();
//!
//! let mut builder = OpenGlBuilder::new(&ctx, Rc::new(desc));
//! builder.allocate_all_textures(1)?;
//! builder.build_program("uniform sampler2D img;\nvoid main() { gl_FragColor = ocio(texture2D(img, gl_TexCoord[0].st)); }")?;
//!
//! // Per frame
//! exposure.set(UniformValue::Float(1.0));
//! builder.activate_all_textures()?;
//! builder.refresh_all_uniforms()?;
//! builder.activate_program()?;
//! # Ok::<(), vfx_gl::GlError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod desc;
mod context;
mod texture;
mod uniform;
mod program;
mod builder;

pub mod backend;

// Re-exports
pub use error::{ErrorKind, GlError, GlResult, ShaderStage, format_shader_log};
pub use desc::{
    CacheId, DynamicProperty, GpuInterpolation, GpuShaderDesc, GpuShaderDescBuilder,
    GpuTexture, GpuTextureType, GpuUniform, ShaderDesc, UniformType, UniformValue,
};
pub use context::{ContextSwitch, GlCapabilities, GlContext, ScopedCurrent};
pub use texture::{TextureRegistry, TextureResource};
pub use uniform::{UniformBinding, UniformTable};
pub use program::{ProgramBuild, ProgramCache, ProgramKey, ProgramState};
pub use builder::{BuilderOptions, DiagnosticSink, OpenGlBuilder, TracingSink};
pub use backend::{GlBackend, HeadlessBackend};

#[cfg(feature = "glow")]
pub use backend::GlowBackend;
