//! Uniform binding table for dynamic parameters.
//!
//! Each binding pairs a dynamic parameter of the shader description with its
//! location in the current program. Locations are only valid for the program
//! they were resolved against, so the table is re-linked after every rebuild.

use tracing::{debug, trace};

use crate::backend::GlBackend;
use crate::context::GlContext;
use crate::desc::{DynamicProperty, ShaderDesc, UniformType};
use crate::error::{GlError, GlResult};

/// A dynamic parameter bound to a program uniform.
#[derive(Debug, Clone)]
pub struct UniformBinding<L> {
    name: String,
    uniform_type: UniformType,
    value: DynamicProperty,
    location: Option<L>,
}

impl<L> UniformBinding<L> {
    /// Uniform name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn uniform_type(&self) -> UniformType {
        self.uniform_type
    }

    /// Shared value read on every refresh.
    pub fn value(&self) -> &DynamicProperty {
        &self.value
    }

    /// Location in the program, `None` if optimized out.
    pub fn location(&self) -> Option<&L> {
        self.location.as_ref()
    }

    /// Returns true if the program uses this uniform.
    pub fn is_active(&self) -> bool {
        self.location.is_some()
    }
}

/// Uniform bindings of the current program.
#[derive(Debug)]
pub struct UniformTable<B: GlBackend> {
    bindings: Vec<UniformBinding<B::UniformLocation>>,
}

impl<B: GlBackend> Default for UniformTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GlBackend> UniformTable<B> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Resolves every dynamic parameter of `desc` in `program`.
    ///
    /// Parameters the compiler optimized out become inactive bindings. A
    /// parameter whose declared type differs from the program's uniform type
    /// is an error; the table is left empty in that case.
    pub fn link(
        &mut self,
        ctx: &GlContext<B>,
        desc: &dyn ShaderDesc,
        program: B::Program,
    ) -> GlResult<()> {
        self.bindings.clear();
        let gl = ctx.backend();

        let mut bindings = Vec::with_capacity(desc.uniforms().len());
        for uniform in desc.uniforms() {
            if let Some(found) = gl.active_uniform_type(program, &uniform.name) {
                if found != uniform.uniform_type {
                    return Err(GlError::UniformTypeMismatch {
                        name: uniform.name.clone(),
                        expected: uniform.uniform_type,
                        found,
                    });
                }
            }

            let location = gl.uniform_location(program, &uniform.name);
            if location.is_none() {
                debug!(name = %uniform.name, "uniform inactive in program");
            }
            bindings.push(UniformBinding {
                name: uniform.name.clone(),
                uniform_type: uniform.uniform_type,
                value: uniform.value.clone(),
                location,
            });
        }

        self.bindings = bindings;
        Ok(())
    }

    /// Pushes the live value of every active binding to the current program.
    ///
    /// Values are sent unconditionally; there is no change tracking.
    pub fn refresh_all(&self, ctx: &GlContext<B>) -> GlResult<()> {
        let gl = ctx.backend();
        for binding in &self.bindings {
            let Some(location) = &binding.location else {
                continue;
            };
            let value = binding.value.get();
            if value.uniform_type() != binding.uniform_type {
                return Err(GlError::UniformTypeMismatch {
                    name: binding.name.clone(),
                    expected: binding.uniform_type,
                    found: value.uniform_type(),
                });
            }
            trace!(name = %binding.name, ?value, "uniform");
            gl.set_uniform(location, &value);
        }
        Ok(())
    }

    /// Drops all bindings.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Binding for the named uniform.
    pub fn binding(&self, name: &str) -> Option<&UniformBinding<B::UniformLocation>> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// All bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &UniformBinding<B::UniformLocation>> {
        self.bindings.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of bindings the program uses.
    pub fn active_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.is_active()).count()
    }
}
