//! Builder facade tying textures, uniforms and the program together.
//!
//! Typical host flow:
//!
//! ```text
//! OpenGlBuilder::new(&ctx, desc)
//!     allocate_all_textures(start)      once, or after a description change
//!     build_program(client_src)         once, or after a source change
//!     per frame:
//!         activate_all_textures()
//!         refresh_all_uniforms()
//!         activate_program()
//!         <host draw calls>
//! ```
//!
//! The builder owns every GL object it creates and deletes them on
//! [`OpenGlBuilder::release`] or drop. It is neither `Clone` nor `Send`.

use std::env;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::GlBackend;
use crate::context::GlContext;
use crate::desc::ShaderDesc;
use crate::error::{GlError, GlResult};
use crate::program::{ProgramBuild, ProgramCache};
use crate::texture::TextureRegistry;
use crate::uniform::UniformTable;

/// Receives the combined shader source of each build when verbose.
pub trait DiagnosticSink {
    /// Called with the full fragment source after a successful compile.
    fn shader_source(&mut self, source: &str);
}

impl<F: FnMut(&str)> DiagnosticSink for F {
    fn shader_source(&mut self, source: &str) {
        self(source)
    }
}

/// Default sink: logs the source at `info` on target `vfx_gl::shader`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn shader_source(&mut self, source: &str) {
        info!(target: "vfx_gl::shader", "\n{source}");
    }
}

/// Builder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderOptions {
    /// Route the combined shader source to the diagnostic sink on build.
    pub verbose: bool,
    /// First texture unit used for LUT textures.
    pub start_index: u32,
}

impl BuilderOptions {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `VFX_GL_VERBOSE` and `VFX_GL_TEXTURE_UNIT` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(verbose) = env_verbose() {
            self.verbose = verbose;
        }
        if let Some(unit) = env_texture_unit() {
            self.start_index = unit;
        }
        self
    }
}

fn env_verbose() -> Option<bool> {
    env::var("VFX_GL_VERBOSE")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_texture_unit() -> Option<u32> {
    env::var("VFX_GL_TEXTURE_UNIT")
        .ok()
        .and_then(|v| v.parse().ok())
}

/// Builds and drives the GL program for one shader description.
pub struct OpenGlBuilder<'ctx, B: GlBackend> {
    ctx: &'ctx GlContext<B>,
    desc: Rc<dyn ShaderDesc>,
    options: BuilderOptions,
    textures: TextureRegistry<B>,
    uniforms: UniformTable<B>,
    program: ProgramCache<B>,
    sink: Box<dyn DiagnosticSink>,
    released: bool,
}

impl<'ctx, B: GlBackend> OpenGlBuilder<'ctx, B> {
    /// Creates a builder with default options.
    pub fn new(ctx: &'ctx GlContext<B>, desc: Rc<dyn ShaderDesc>) -> Self {
        Self::with_options(ctx, desc, BuilderOptions::default())
    }

    /// Creates a builder with explicit options.
    pub fn with_options(
        ctx: &'ctx GlContext<B>,
        desc: Rc<dyn ShaderDesc>,
        options: BuilderOptions,
    ) -> Self {
        Self {
            ctx,
            desc,
            options,
            textures: TextureRegistry::new(),
            uniforms: UniformTable::new(),
            program: ProgramCache::new(),
            sink: Box::new(TracingSink),
            released: false,
        }
    }

    fn ensure_live(&self) -> GlResult<()> {
        if self.released {
            return Err(GlError::IllegalState("builder has been released".into()));
        }
        Ok(())
    }

    /// Allocates and uploads every texture, assigning units from
    /// `start_index`. Previously allocated textures are released first.
    pub fn allocate_all_textures(&mut self, start_index: u32) -> GlResult<()> {
        self.ensure_live()?;
        self.textures.allocate(self.ctx, self.desc.as_ref(), start_index)?;
        self.options.start_index = start_index;
        Ok(())
    }

    /// Re-runs allocation with the configured start index.
    pub fn reallocate_textures(&mut self) -> GlResult<()> {
        self.allocate_all_textures(self.options.start_index)
    }

    /// Deletes every allocated texture. The program and uniforms are kept.
    pub fn release_all_textures(&mut self) -> GlResult<()> {
        self.ensure_live()?;
        self.textures.release_all(self.ctx);
        Ok(())
    }

    /// Binds every texture to its unit and wires the sampler uniforms.
    ///
    /// Makes the program current; fails if no program has been built.
    pub fn activate_all_textures(&self) -> GlResult<()> {
        self.ensure_live()?;
        let program = self.program.activate(self.ctx)?;
        self.textures.activate_all(self.ctx, program);
        Ok(())
    }

    /// Pushes the live value of every dynamic parameter to the program.
    ///
    /// Makes the program current. Before the first build there are no
    /// bindings and this does nothing.
    pub fn refresh_all_uniforms(&self) -> GlResult<()> {
        self.ensure_live()?;
        if self.program.handle().is_none() {
            return Ok(());
        }
        self.program.activate(self.ctx)?;
        self.uniforms.refresh_all(self.ctx)
    }

    /// Builds the program from the description and `client_source`.
    ///
    /// Returns the existing program when neither the description identity
    /// nor the client source changed since the last successful build.
    pub fn build_program(&mut self, client_source: &str) -> GlResult<B::Program> {
        self.ensure_live()?;
        let built = self
            .program
            .build(self.ctx, self.desc.as_ref(), client_source, &mut self.uniforms)?;
        if let ProgramBuild::Compiled { source, .. } = &built {
            if self.options.verbose {
                self.sink.shader_source(source);
            }
        }
        Ok(built.program())
    }

    /// Makes the program current for the host's draw calls.
    pub fn activate_program(&self) -> GlResult<()> {
        self.ensure_live()?;
        self.program.activate(self.ctx).map(|_| ())
    }

    /// Current program, `None` until a build succeeds.
    pub fn handle(&self) -> Option<B::Program> {
        self.program.handle()
    }

    /// Driver limit on single-dimension texture width.
    pub fn max_supported_width(&self) -> u32 {
        TextureRegistry::<B>::max_supported_width(self.ctx)
    }

    /// Rebinds the builder to another description.
    ///
    /// Textures of the previous description are released; call
    /// [`Self::allocate_all_textures`] again. The next build recompiles only
    /// if the identity changed.
    ///
    /// Uniform bindings always follow the new description's properties: with
    /// an unchanged identity they are re-linked against the current program
    /// right away, otherwise they are dropped until the next build.
    pub fn set_shader_desc(&mut self, desc: Rc<dyn ShaderDesc>) {
        self.textures.release_all(self.ctx);
        self.desc = desc;
        self.rebind_uniforms();
    }

    fn rebind_uniforms(&mut self) {
        let (Some(program), Some(key)) = (self.program.handle(), self.program.key()) else {
            self.uniforms.clear();
            return;
        };
        if key.desc_id() != self.desc.cache_id() {
            self.uniforms.clear();
            return;
        }
        let mut table = UniformTable::new();
        match table.link(self.ctx, self.desc.as_ref(), program) {
            Ok(()) => self.uniforms = table,
            Err(err) => {
                warn!(%err, "uniform relink failed");
                self.uniforms.clear();
            }
        }
    }

    /// Bound description.
    pub fn shader_desc(&self) -> &Rc<dyn ShaderDesc> {
        &self.desc
    }

    /// Enables or disables shader source dumps.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.options.verbose = verbose;
    }

    /// Returns true if shader source dumps are enabled.
    pub fn is_verbose(&self) -> bool {
        self.options.verbose
    }

    /// Current options.
    pub fn options(&self) -> BuilderOptions {
        self.options
    }

    /// Replaces the diagnostic sink.
    pub fn set_diagnostic_sink(&mut self, sink: impl DiagnosticSink + 'static) {
        self.sink = Box::new(sink);
    }

    /// Texture registry.
    pub fn textures(&self) -> &TextureRegistry<B> {
        &self.textures
    }

    /// Uniform bindings of the current program.
    pub fn uniforms(&self) -> &UniformTable<B> {
        &self.uniforms
    }

    /// Number of shader compilations attempted.
    pub fn compile_count(&self) -> usize {
        self.program.compile_count()
    }

    /// Deletes all GL objects. Later calls fail with `IllegalState`.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.textures.release_all(self.ctx);
        self.uniforms.clear();
        self.program.release(self.ctx);
        self.released = true;
    }

    /// Returns true after [`Self::release`].
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<B: GlBackend> Drop for OpenGlBuilder<'_, B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: GlBackend> std::fmt::Debug for OpenGlBuilder<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenGlBuilder")
            .field("desc_id", &self.desc.cache_id())
            .field("options", &self.options)
            .field("textures", &self.textures.len())
            .field("uniforms", &self.uniforms.len())
            .field("program", &self.program.handle())
            .field("released", &self.released)
            .finish()
    }
}
