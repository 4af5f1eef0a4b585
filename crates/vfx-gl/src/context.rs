//! Explicit GL context object and capability snapshot.
//!
//! The host creates a [`GlContext`] around a backend bound to its own graphics
//! context and hands it to builders by reference. Driver limits are queried
//! once, on first use, and cached immutably for the context's lifetime.
//!
//! Hosts that already have a context current (plugin hosts typically do) wrap
//! their calls in [`GlContext::scoped`], which makes the plugin context current
//! and restores the previous one when the closure returns.

use std::cell::OnceCell;
use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::backend::GlBackend;
use crate::error::{GlError, GlResult};

/// Extensions the builder relies on, with the core version that absorbed them.
const REQUIRED_EXTENSIONS: &[(&str, (u32, u32))] = &[
    ("GL_ARB_color_buffer_float", (3, 0)),
    ("GL_ARB_texture_float", (3, 0)),
    ("GL_ARB_vertex_shader", (2, 0)),
    ("GL_ARB_fragment_shader", (2, 0)),
    ("GL_ARB_draw_buffers", (2, 0)),
    ("GL_ARB_framebuffer_object", (3, 0)),
];

const MIN_VERSION: (u32, u32) = (2, 0);
const MIN_TEXTURE_UNITS: u32 = 2;

/// Snapshot of driver limits and extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlCapabilities {
    /// GL version (major, minor).
    pub version: (u32, u32),
    /// Renderer description reported by the driver.
    pub renderer: String,
    /// Maximum width/height of 1D and 2D textures.
    pub max_texture_size: u32,
    /// Maximum edge length of 3D textures.
    pub max_3d_texture_size: u32,
    /// Number of texture image units available to fragment shaders.
    pub max_texture_units: u32,
    /// Advertised extensions.
    pub extensions: BTreeSet<String>,
}

impl GlCapabilities {
    /// Returns true if the extension is advertised.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Lists the requirements this context does not meet.
    ///
    /// An extension counts as present when advertised or when the context
    /// version includes it in core.
    pub fn missing_requirements(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.version < MIN_VERSION {
            missing.push(format!(
                "GL {}.{} (have {}.{})",
                MIN_VERSION.0, MIN_VERSION.1, self.version.0, self.version.1
            ));
        }
        for (ext, core) in REQUIRED_EXTENSIONS {
            if self.version < *core && !self.has_extension(ext) {
                missing.push((*ext).to_string());
            }
        }
        if self.max_texture_units < MIN_TEXTURE_UNITS {
            missing.push(format!(
                "{} texture units (have {})",
                MIN_TEXTURE_UNITS, self.max_texture_units
            ));
        }
        missing
    }

    /// Returns true if all requirements are met.
    pub fn meets_requirements(&self) -> bool {
        self.missing_requirements().is_empty()
    }
}

/// Save/make-current/restore hook over the host's windowing layer.
pub trait ContextSwitch {
    /// Whatever identifies the previously current context.
    type Saved;

    /// Saves the current context and makes the plugin context current.
    fn make_current(&self) -> GlResult<Self::Saved>;

    /// Restores a previously saved context.
    fn restore(&self, saved: Self::Saved);
}

/// Guard restoring the saved context on drop.
pub struct ScopedCurrent<'a, S: ContextSwitch> {
    switch: &'a S,
    saved: Option<S::Saved>,
}

impl<'a, S: ContextSwitch> ScopedCurrent<'a, S> {
    /// Makes the plugin context current until the guard drops.
    pub fn enter(switch: &'a S) -> GlResult<Self> {
        let saved = switch.make_current()?;
        Ok(Self {
            switch,
            saved: Some(saved),
        })
    }
}

impl<S: ContextSwitch> Drop for ScopedCurrent<'_, S> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.switch.restore(saved);
        }
    }
}

/// Graphics context handed to builders.
pub struct GlContext<B: GlBackend> {
    backend: B,
    capabilities: OnceCell<GlCapabilities>,
}

impl<B: GlBackend> GlContext<B> {
    /// Wraps a backend without checking capabilities.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            capabilities: OnceCell::new(),
        }
    }

    /// Wraps a backend, rejecting contexts that miss required capabilities.
    pub fn acquire(backend: B) -> GlResult<Self> {
        let ctx = Self::new(backend);
        let missing = ctx.capabilities().missing_requirements();
        if !missing.is_empty() {
            warn!(backend = ctx.backend.name(), ?missing, "GL context rejected");
            return Err(GlError::UnsupportedContext(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        Ok(ctx)
    }

    /// Underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Capability snapshot, queried from the driver on first call only.
    pub fn capabilities(&self) -> &GlCapabilities {
        self.capabilities.get_or_init(|| {
            let caps = self.backend.query_capabilities();
            debug!(
                backend = self.backend.name(),
                version = ?caps.version,
                max_texture_size = caps.max_texture_size,
                max_texture_units = caps.max_texture_units,
                "queried GL capabilities"
            );
            caps
        })
    }

    /// Maximum width of a single-dimension texture on this driver.
    ///
    /// Used to decide whether a long 1D LUT must be packed as a 2D grid.
    pub fn max_texture_width(&self) -> u32 {
        self.capabilities().max_texture_size
    }

    /// Runs `f` with the plugin context current, restoring the prior context
    /// afterwards.
    pub fn scoped<S, R>(&self, switch: &S, f: impl FnOnce(&Self) -> R) -> GlResult<R>
    where
        S: ContextSwitch,
    {
        let _guard = ScopedCurrent::enter(switch)?;
        Ok(f(self))
    }

    /// Ends the context's use by the core and returns the backend.
    pub fn release(self) -> B {
        self.backend
    }
}

impl<B: GlBackend> std::fmt::Debug for GlContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlContext")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities.get())
            .finish()
    }
}
