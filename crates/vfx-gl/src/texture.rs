//! LUT texture registry.
//!
//! Owns the GPU textures backing a shader description's lookup tables and
//! their texture-unit assignment. Units are contiguous and ascending from the
//! start index passed to [`TextureRegistry::allocate`], in declaration order.

use tracing::{debug, trace};

use crate::backend::GlBackend;
use crate::context::{GlCapabilities, GlContext};
use crate::desc::{GpuInterpolation, GpuTexture, GpuTextureType, ShaderDesc};
use crate::error::{GlError, GlResult};

/// A texture owned by the registry.
#[derive(Debug, Clone)]
pub struct TextureResource<T> {
    /// GPU texture name.
    pub handle: T,
    /// Texture name from the description.
    pub name: String,
    /// Sampler uniform the texture feeds.
    pub sampler_name: String,
    /// Texture kind.
    pub texture_type: GpuTextureType,
    /// Width, height, depth.
    pub dims: [u32; 3],
    /// Interpolation mode.
    pub interpolation: GpuInterpolation,
    /// Assigned texture unit.
    pub unit: u32,
}

/// Creates, binds and releases LUT textures.
#[derive(Debug)]
pub struct TextureRegistry<B: GlBackend> {
    textures: Vec<TextureResource<B::Texture>>,
}

impl<B: GlBackend> Default for TextureRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GlBackend> TextureRegistry<B> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            textures: Vec::new(),
        }
    }

    /// Releases previous textures, then creates and uploads every texture
    /// declared by `desc`, assigning units from `start_index` upwards.
    ///
    /// On failure every texture created by this call is deleted and the
    /// registry is left empty.
    pub fn allocate(
        &mut self,
        ctx: &GlContext<B>,
        desc: &dyn ShaderDesc,
        start_index: u32,
    ) -> GlResult<()> {
        self.release_all(ctx);

        let caps = ctx.capabilities();
        let mut created = Vec::with_capacity(desc.textures().len());

        for (i, texture) in desc.textures().iter().enumerate() {
            let unit = start_index.saturating_add(i as u32);
            let result = validate(texture, &created, unit, caps).and_then(|()| {
                ctx.backend()
                    .create_texture(texture)
                    .map_err(|reason| GlError::resource(&texture.name, reason))
            });

            match result {
                Ok(handle) => {
                    trace!(name = %texture.name, unit, "uploaded texture");
                    created.push(TextureResource {
                        handle,
                        name: texture.name.clone(),
                        sampler_name: texture.sampler_name.clone(),
                        texture_type: texture.texture_type,
                        dims: [texture.width, texture.height, texture.depth],
                        interpolation: texture.interpolation,
                        unit,
                    });
                }
                Err(err) => {
                    for res in created {
                        ctx.backend().delete_texture(res.handle);
                    }
                    return Err(err);
                }
            }
        }

        debug!(count = created.len(), start_index, "allocated textures");
        self.textures = created;
        Ok(())
    }

    /// Binds every texture to its unit and points its sampler uniform at it.
    ///
    /// `program` must be the current program. Samplers optimized out of the
    /// program are skipped.
    pub fn activate_all(&self, ctx: &GlContext<B>, program: B::Program) {
        let gl = ctx.backend();
        for tex in &self.textures {
            gl.bind_texture(tex.unit, tex.texture_type, tex.handle);
            let sampler = if tex.sampler_name.is_empty() {
                &tex.name
            } else {
                &tex.sampler_name
            };
            match gl.uniform_location(program, sampler) {
                Some(loc) => gl.set_sampler(&loc, tex.unit),
                None => trace!(sampler = %sampler, "sampler not active in program"),
            }
        }
    }

    /// Deletes all textures. No-op when empty.
    pub fn release_all(&mut self, ctx: &GlContext<B>) {
        if self.textures.is_empty() {
            return;
        }
        for tex in self.textures.drain(..) {
            ctx.backend().delete_texture(tex.handle);
        }
        debug!("released textures");
    }

    /// Driver limit on single-dimension texture width, queried once per
    /// context.
    pub fn max_supported_width(ctx: &GlContext<B>) -> u32 {
        ctx.max_texture_width()
    }

    /// Unit assigned to the named texture.
    pub fn unit_of(&self, name: &str) -> Option<u32> {
        self.textures.iter().find(|t| t.name == name).map(|t| t.unit)
    }

    /// `(name, unit)` pairs in declaration order.
    pub fn assignments(&self) -> Vec<(String, u32)> {
        self.textures.iter().map(|t| (t.name.clone(), t.unit)).collect()
    }

    /// Owned textures.
    pub fn iter(&self) -> impl Iterator<Item = &TextureResource<B::Texture>> {
        self.textures.iter()
    }

    /// Number of owned textures.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Returns true if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

fn validate<T>(
    texture: &GpuTexture,
    created: &[TextureResource<T>],
    unit: u32,
    caps: &GlCapabilities,
) -> GlResult<()> {
    let fail = |reason: String| Err(GlError::resource(&texture.name, reason));

    if created.iter().any(|t| t.name == texture.name) {
        return fail("duplicate texture name".into());
    }
    if unit >= caps.max_texture_units {
        return fail(format!(
            "texture unit {unit} exceeds limit of {} units",
            caps.max_texture_units
        ));
    }
    if texture.width == 0 || texture.height == 0 || texture.depth == 0 {
        return fail("zero-sized texture".into());
    }
    let consistent = match texture.texture_type {
        GpuTextureType::Texture1D => texture.height == 1 && texture.depth == 1,
        GpuTextureType::Texture2D => texture.depth == 1,
        GpuTextureType::Texture3D => true,
    };
    if !consistent {
        return fail(format!(
            "{:?} cannot be {}x{}x{}",
            texture.texture_type, texture.width, texture.height, texture.depth
        ));
    }
    let limit = match texture.texture_type {
        GpuTextureType::Texture3D => caps.max_3d_texture_size,
        _ => caps.max_texture_size,
    };
    let largest = texture.width.max(texture.height).max(texture.depth);
    if largest > limit {
        return fail(format!("dimension {largest} exceeds driver limit {limit}"));
    }
    if texture.data.len() != texture.expected_len() {
        return fail(format!(
            "pixel data has {} floats, expected {}",
            texture.data.len(),
            texture.expected_len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::desc::GpuShaderDesc;
    use crate::error::ErrorKind;

    fn desc(textures: Vec<GpuTexture>) -> GpuShaderDesc {
        textures
            .into_iter()
            .fold(GpuShaderDesc::builder(), |b, t| b.texture(t))
            .build()
    }

    fn lut1d(name: &str, len: usize) -> GpuTexture {
        GpuTexture::lut1d(name, vec![0.5; len * 3], GpuInterpolation::Linear)
    }

    #[test]
    fn units_follow_declaration_order() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let desc = desc(vec![lut1d("a", 4), lut1d("b", 4), lut1d("c", 4)]);
        let mut reg = TextureRegistry::new();
        reg.allocate(&ctx, &desc, 2).unwrap();
        assert_eq!(
            reg.assignments(),
            vec![("a".into(), 2), ("b".into(), 3), ("c".into(), 4)]
        );
        assert_eq!(ctx.backend().live_textures(), 3);
    }

    #[test]
    fn reallocation_frees_previous_textures() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let desc = desc(vec![lut1d("a", 4)]);
        let mut reg = TextureRegistry::new();
        reg.allocate(&ctx, &desc, 0).unwrap();
        reg.allocate(&ctx, &desc, 0).unwrap();
        assert_eq!(ctx.backend().live_textures(), 1);
        reg.release_all(&ctx);
        reg.release_all(&ctx);
        assert!(reg.is_empty());
        assert_eq!(ctx.backend().live_textures(), 0);
    }

    #[test]
    fn failed_upload_rolls_back() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let desc = desc(vec![lut1d("a", 4), lut1d("b", 4), lut1d("c", 4)]);
        let mut reg = TextureRegistry::new();
        reg.allocate(&ctx, &desc, 0).unwrap();

        ctx.backend().fail_texture("c");
        let err = reg.allocate(&ctx, &desc, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(reg.is_empty());
        assert_eq!(ctx.backend().live_textures(), 0);
    }

    #[test]
    fn payload_length_is_checked() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let mut bad = lut1d("a", 4);
        bad.data.pop();
        let mut reg = TextureRegistry::new();
        let err = reg.allocate(&ctx, &desc(vec![bad]), 0).unwrap_err();
        assert!(err.to_string().contains("expected 12"), "{err}");
    }

    #[test]
    fn width_limit_is_checked_before_upload() {
        let ctx = GlContext::new(HeadlessBackend::new().with_max_texture_size(8));
        let mut reg = TextureRegistry::new();
        let err = reg.allocate(&ctx, &desc(vec![lut1d("a", 16)]), 0).unwrap_err();
        assert!(err.to_string().contains("driver limit 8"), "{err}");
        assert_eq!(ctx.backend().live_textures(), 0);
    }

    #[test]
    fn empty_sampler_name_falls_back_to_texture_name() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let desc = desc(vec![lut1d("lut_b", 4).with_sampler("")]);
        let mut reg = TextureRegistry::new();
        reg.allocate(&ctx, &desc, 1).unwrap();

        let gl = ctx.backend();
        let shader = gl
            .compile_fragment_shader("uniform sampler1D lut_b;\nvoid main() { texture(lut_b, 0.5); }")
            .unwrap();
        let program = gl.link_program(shader).unwrap();
        reg.activate_all(&ctx, program);
        assert_eq!(gl.sampler_unit(program, "lut_b"), Some(1));
    }

    #[test]
    fn unit_limit_is_enforced() {
        let ctx = GlContext::new(HeadlessBackend::new().with_max_texture_units(4));
        let desc = desc(vec![lut1d("a", 4), lut1d("b", 4)]);
        let mut reg = TextureRegistry::new();
        assert!(reg.allocate(&ctx, &desc, 2).is_ok());
        assert!(reg.allocate(&ctx, &desc, 3).is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn activation_binds_units() {
        let ctx = GlContext::new(HeadlessBackend::new());
        let desc = desc(vec![lut1d("lut_a", 4)]);
        let mut reg = TextureRegistry::new();
        reg.allocate(&ctx, &desc, 5).unwrap();

        let gl = ctx.backend();
        let shader = gl
            .compile_fragment_shader("uniform sampler1D lut_a;\nvoid main() { texture(lut_a, 0.5); }")
            .unwrap();
        let program = gl.link_program(shader).unwrap();
        reg.activate_all(&ctx, program);

        let handle = reg.iter().next().unwrap().handle;
        assert_eq!(gl.bound_texture(5), Some(handle));
        assert_eq!(gl.sampler_unit(program, "lut_a"), Some(5));
    }
}
