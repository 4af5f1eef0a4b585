//! Program compilation with rebuild avoidance.
//!
//! A program is keyed by the description's cache identity and a hash of the
//! client shader source. Building with an unchanged key returns the existing
//! program without touching the driver.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::{debug, info};

use crate::backend::GlBackend;
use crate::context::GlContext;
use crate::desc::{CacheId, ShaderDesc};
use crate::error::{format_shader_log, GlError, GlResult, ShaderStage};
use crate::uniform::UniformTable;

/// Cache identity of a built program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    desc: CacheId,
    client: u64,
}

impl ProgramKey {
    /// Combines a description identity with the client source.
    pub fn new(desc: CacheId, client_source: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        client_source.hash(&mut hasher);
        Self {
            desc,
            client: hasher.finish(),
        }
    }

    /// Description part of the key.
    pub fn desc_id(&self) -> CacheId {
        self.desc
    }
}

/// The live program and the fragment shader it was linked from.
#[derive(Debug)]
pub struct ProgramState<B: GlBackend> {
    program: B::Program,
    fragment: B::Shader,
    key: ProgramKey,
}

/// Result of a build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramBuild<P> {
    /// The key was unchanged; the current program was reused.
    Cached(P),
    /// A new program was compiled from `source`.
    Compiled {
        /// New program.
        program: P,
        /// Combined shader source.
        source: String,
    },
}

impl<P: Copy> ProgramBuild<P> {
    /// Program handle in either case.
    pub fn program(&self) -> P {
        match self {
            Self::Cached(p) => *p,
            Self::Compiled { program, .. } => *program,
        }
    }
}

/// Holds at most one program and rebuilds it only when its key changes.
#[derive(Debug)]
pub struct ProgramCache<B: GlBackend> {
    state: Option<ProgramState<B>>,
    compiles: usize,
}

impl<B: GlBackend> Default for ProgramCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GlBackend> ProgramCache<B> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            state: None,
            compiles: 0,
        }
    }

    /// Builds the program for `desc` + `client_source`, or reuses the current
    /// one if the key is unchanged.
    ///
    /// On rebuild the shader text, a newline and the client source are
    /// compiled and linked, then `uniforms` is re-linked against the new
    /// program. Any failure leaves the previous program and bindings current.
    pub fn build(
        &mut self,
        ctx: &GlContext<B>,
        desc: &dyn ShaderDesc,
        client_source: &str,
        uniforms: &mut UniformTable<B>,
    ) -> GlResult<ProgramBuild<B::Program>> {
        let key = ProgramKey::new(desc.cache_id(), client_source);
        if let Some(state) = &self.state {
            if state.key == key {
                debug!(desc_id = %key.desc, "program cache hit");
                return Ok(ProgramBuild::Cached(state.program));
            }
        }

        let gl = ctx.backend();
        let source = format!("{}\n{}", desc.shader_text(), client_source);
        self.compiles += 1;

        let fragment = gl
            .compile_fragment_shader(&source)
            .map_err(|log| GlError::ShaderCompile {
                stage: ShaderStage::Fragment,
                log: format_shader_log(&source, &log),
            })?;

        let program = match gl.link_program(fragment) {
            Ok(p) => p,
            Err(log) => {
                gl.delete_shader(fragment);
                return Err(GlError::ShaderCompile {
                    stage: ShaderStage::Link,
                    log: format_shader_log(&source, &log),
                });
            }
        };

        let mut table = UniformTable::new();
        if let Err(err) = table.link(ctx, desc, program) {
            gl.delete_program(program);
            gl.delete_shader(fragment);
            return Err(err);
        }
        *uniforms = table;

        self.release(ctx);
        self.state = Some(ProgramState {
            program,
            fragment,
            key,
        });
        info!(
            desc_id = %key.desc,
            uniforms = uniforms.len(),
            active = uniforms.active_count(),
            "built program"
        );
        Ok(ProgramBuild::Compiled { program, source })
    }

    /// Makes the current program active.
    pub fn activate(&self, ctx: &GlContext<B>) -> GlResult<B::Program> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| GlError::IllegalState("program has not been built".into()))?;
        ctx.backend().use_program(state.program);
        Ok(state.program)
    }

    /// Current program, `None` if unbuilt.
    pub fn handle(&self) -> Option<B::Program> {
        self.state.as_ref().map(|s| s.program)
    }

    /// Key of the current program.
    pub fn key(&self) -> Option<ProgramKey> {
        self.state.as_ref().map(|s| s.key)
    }

    /// Number of compilations attempted, successful or not.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    /// Deletes the program and its shader.
    pub fn release(&mut self, ctx: &GlContext<B>) {
        if let Some(state) = self.state.take() {
            ctx.backend().delete_program(state.program);
            ctx.backend().delete_shader(state.fragment);
        }
    }
}
