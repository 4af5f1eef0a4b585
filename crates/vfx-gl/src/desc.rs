//! Shader description consumed by the builder.
//!
//! A description carries everything the GPU side of a color transform needs:
//! the generated GLSL body, the LUT textures it samples and the dynamic
//! parameters it reads as uniforms. The builder only reads descriptions; they
//! are produced by the color-transform compiler.
//!
//! # Example
//!
//! ```
//! use vfx_gl::{DynamicProperty, GpuInterpolation, GpuShaderDesc, GpuTexture, ShaderDesc};
//! use vfx_gl::{UniformType, UniformValue};
//!
//! let exposure = DynamicProperty::new(UniformValue::Float(0.0));
//! let desc = GpuShaderDesc::builder()
//!     .shader_text("uniform float exposure;\nvec4 ocio(vec4 c) { return c * exp2(exposure); }")
//!     .texture(GpuTexture::lut3d("lut3d_0", 2, vec![0.0; 2 * 2 * 2 * 3], GpuInterpolation::Linear))
//!     .uniform("exposure", UniformType::Float, exposure.clone())
//!     .build();
//!
//! let id = desc.cache_id();
//! exposure.set(UniformValue::Float(1.5));
//! // Value changes do not change the identity.
//! assert_eq!(desc.cache_id(), id);
//! ```

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Texture type for GPU LUTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuTextureType {
    /// 1D texture (for 1D LUTs).
    Texture1D,
    /// 2D texture (1D LUT packed as a grid).
    Texture2D,
    /// 3D texture (for 3D LUTs).
    Texture3D,
}

/// Texture interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GpuInterpolation {
    /// Nearest neighbor.
    Nearest,
    /// Linear interpolation.
    #[default]
    Linear,
}

/// GPU texture requirement for LUT sampling.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    /// Texture name, unique within a description.
    pub name: String,
    /// Name of the sampler uniform in the shader text.
    pub sampler_name: String,
    /// Texture type.
    pub texture_type: GpuTextureType,
    /// Texture width.
    pub width: u32,
    /// Texture height (1 for 1D textures).
    pub height: u32,
    /// Texture depth (1 for 1D/2D textures).
    pub depth: u32,
    /// Channels per texel: 1 (red) or 3 (RGB) or 4 (RGBA).
    pub channels: u32,
    /// Pixel data, `width * height * depth * channels` floats.
    pub data: Vec<f32>,
    /// Interpolation mode.
    pub interpolation: GpuInterpolation,
}

impl GpuTexture {
    /// Creates a 1D RGB LUT texture. The sampler uses the texture name.
    pub fn lut1d(name: impl Into<String>, data: Vec<f32>, interpolation: GpuInterpolation) -> Self {
        let name = name.into();
        let width = (data.len() / 3) as u32;
        Self {
            sampler_name: name.clone(),
            name,
            texture_type: GpuTextureType::Texture1D,
            width,
            height: 1,
            depth: 1,
            channels: 3,
            data,
            interpolation,
        }
    }

    /// Creates a 1D RGB LUT, packed as a 2D grid when longer than `max_width`.
    ///
    /// Rows are `max_width` texels wide; the last row is padded by repeating
    /// the final entry. Hosts pass [`crate::GlContext::max_texture_width`] here.
    pub fn lut1d_packed(
        name: impl Into<String>,
        mut data: Vec<f32>,
        max_width: u32,
        interpolation: GpuInterpolation,
    ) -> Self {
        let len = (data.len() / 3) as u32;
        if max_width == 0 || len <= max_width {
            return Self::lut1d(name, data, interpolation);
        }

        let height = len.div_ceil(max_width);
        let padded = (max_width * height) as usize;
        let last = [data[data.len() - 3], data[data.len() - 2], data[data.len() - 1]];
        while data.len() / 3 < padded {
            data.extend_from_slice(&last);
        }

        let name = name.into();
        Self {
            sampler_name: name.clone(),
            name,
            texture_type: GpuTextureType::Texture2D,
            width: max_width,
            height,
            depth: 1,
            channels: 3,
            data,
            interpolation,
        }
    }

    /// Creates a 3D RGB LUT texture with `edge` samples per axis.
    pub fn lut3d(
        name: impl Into<String>,
        edge: u32,
        data: Vec<f32>,
        interpolation: GpuInterpolation,
    ) -> Self {
        let name = name.into();
        Self {
            sampler_name: name.clone(),
            name,
            texture_type: GpuTextureType::Texture3D,
            width: edge,
            height: edge,
            depth: edge,
            channels: 3,
            data,
            interpolation,
        }
    }

    /// Overrides the sampler uniform name.
    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler_name = sampler.into();
        self
    }

    /// Number of texels.
    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Number of floats the pixel payload must hold.
    pub fn expected_len(&self) -> usize {
        (self.texel_count() * self.channels as u64) as usize
    }

    /// Size of the uploaded payload in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }

    fn hash_decl<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.sampler_name.hash(state);
        self.texture_type.hash(state);
        (self.width, self.height, self.depth, self.channels).hash(state);
        self.interpolation.hash(state);
        bytemuck::cast_slice::<f32, u8>(&self.data).hash(state);
    }
}

/// Uniform variable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    /// Single float.
    Float,
    /// 2-component vector.
    Vec2,
    /// 3-component vector.
    Vec3,
    /// 4-component vector.
    Vec4,
    /// 3x3 matrix.
    Mat3,
    /// 4x4 matrix.
    Mat4,
    /// Signed integer.
    Int,
    /// Boolean.
    Bool,
}

impl UniformType {
    /// GLSL keyword for this type.
    pub fn glsl_name(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Int => "int",
            Self::Bool => "bool",
        }
    }

    /// Parses a GLSL type keyword.
    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::Float,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            "int" => Self::Int,
            "bool" => Self::Bool,
            _ => return None,
        })
    }
}

impl std::fmt::Display for UniformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// Current value of a dynamic parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Int(i32),
    Bool(bool),
}

impl UniformValue {
    /// Type tag carried by this value.
    pub fn uniform_type(&self) -> UniformType {
        match self {
            Self::Float(_) => UniformType::Float,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Mat3(_) => UniformType::Mat3,
            Self::Mat4(_) => UniformType::Mat4,
            Self::Int(_) => UniformType::Int,
            Self::Bool(_) => UniformType::Bool,
        }
    }
}

/// Shared handle to a dynamic parameter value.
///
/// Clones share the same cell: the description mutates it between frames and
/// the uniform table reads it on every refresh. Single-threaded by
/// construction (`!Send`).
#[derive(Debug, Clone)]
pub struct DynamicProperty(Rc<Cell<UniformValue>>);

impl DynamicProperty {
    /// Creates a property holding `value`.
    pub fn new(value: UniformValue) -> Self {
        Self(Rc::new(Cell::new(value)))
    }

    /// Returns the current value.
    pub fn get(&self) -> UniformValue {
        self.0.get()
    }

    /// Replaces the current value.
    pub fn set(&self, value: UniformValue) {
        self.0.set(value);
    }

    /// Returns true if both handles share one value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Shader uniform backed by a dynamic property.
#[derive(Debug, Clone)]
pub struct GpuUniform {
    /// Uniform name.
    pub name: String,
    /// Declared uniform type.
    pub uniform_type: UniformType,
    /// Live value.
    pub value: DynamicProperty,
}

/// Opaque content identity of a shader description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheId(u64);

impl CacheId {
    /// Wraps a raw identity value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identity value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Interface the builder consumes from a shader description.
pub trait ShaderDesc {
    /// Generated GLSL implementing the transform body.
    fn shader_text(&self) -> &str;

    /// Required textures, in declaration order.
    fn textures(&self) -> &[GpuTexture];

    /// Dynamic parameters, in declaration order.
    fn uniforms(&self) -> &[GpuUniform];

    /// Identity that changes iff the transform, its textures or its parameter
    /// declarations change. Parameter values never affect it.
    fn cache_id(&self) -> CacheId;
}

/// Concrete shader description.
#[derive(Debug, Clone)]
pub struct GpuShaderDesc {
    text: String,
    textures: Vec<GpuTexture>,
    uniforms: Vec<GpuUniform>,
    cache_id: CacheId,
}

impl GpuShaderDesc {
    /// Starts building a description.
    pub fn builder() -> GpuShaderDescBuilder {
        GpuShaderDescBuilder::default()
    }

    /// Returns the dynamic property declared under `name`.
    pub fn dynamic_property(&self, name: &str) -> Option<&DynamicProperty> {
        self.uniforms.iter().find(|u| u.name == name).map(|u| &u.value)
    }

    /// Returns true if any textures are required.
    pub fn has_textures(&self) -> bool {
        !self.textures.is_empty()
    }

    fn compute_cache_id(text: &str, textures: &[GpuTexture], uniforms: &[GpuUniform]) -> CacheId {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        textures.len().hash(&mut hasher);
        for tex in textures {
            tex.hash_decl(&mut hasher);
        }
        uniforms.len().hash(&mut hasher);
        for u in uniforms {
            u.name.hash(&mut hasher);
            u.uniform_type.hash(&mut hasher);
        }
        CacheId(hasher.finish())
    }
}

impl ShaderDesc for GpuShaderDesc {
    fn shader_text(&self) -> &str {
        &self.text
    }

    fn textures(&self) -> &[GpuTexture] {
        &self.textures
    }

    fn uniforms(&self) -> &[GpuUniform] {
        &self.uniforms
    }

    fn cache_id(&self) -> CacheId {
        self.cache_id
    }
}

/// Builder for [`GpuShaderDesc`].
///
/// Adding a texture or uniform under an existing name replaces the earlier
/// declaration in place, so names stay unique and order stays stable.
#[derive(Debug, Default)]
pub struct GpuShaderDescBuilder {
    text: String,
    textures: Vec<GpuTexture>,
    uniforms: Vec<GpuUniform>,
}

impl GpuShaderDescBuilder {
    /// Sets the generated shader body.
    pub fn shader_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Declares a texture.
    pub fn texture(mut self, texture: GpuTexture) -> Self {
        match self.textures.iter_mut().find(|t| t.name == texture.name) {
            Some(slot) => *slot = texture,
            None => self.textures.push(texture),
        }
        self
    }

    /// Declares a dynamic parameter.
    pub fn uniform(
        mut self,
        name: impl Into<String>,
        uniform_type: UniformType,
        value: DynamicProperty,
    ) -> Self {
        let uniform = GpuUniform {
            name: name.into(),
            uniform_type,
            value,
        };
        match self.uniforms.iter_mut().find(|u| u.name == uniform.name) {
            Some(slot) => *slot = uniform,
            None => self.uniforms.push(uniform),
        }
        self
    }

    /// Finishes the description and computes its identity.
    pub fn build(self) -> GpuShaderDesc {
        let cache_id = GpuShaderDesc::compute_cache_id(&self.text, &self.textures, &self.uniforms);
        GpuShaderDesc {
            text: self.text,
            textures: self.textures,
            uniforms: self.uniforms,
            cache_id,
        }
    }
}
