//! OpenGL backend over `glow`.
//!
//! Wraps a `glow::Context` created by the host for its current GL context.
//! All calls assume that context is current on the calling thread.

use glow::HasContext;

use super::GlBackend;
use crate::context::GlCapabilities;
use crate::desc::{GpuInterpolation, GpuTexture, GpuTextureType, UniformType, UniformValue};

/// Backend issuing real GL calls.
pub struct GlowBackend {
    gl: glow::Context,
}

impl GlowBackend {
    /// Wraps a loaded `glow` context.
    pub fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    /// Underlying `glow` context, for the host's own draw calls.
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Returns the wrapped context.
    pub fn into_inner(self) -> glow::Context {
        self.gl
    }
}

impl std::fmt::Debug for GlowBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowBackend").finish_non_exhaustive()
    }
}

fn target(texture_type: GpuTextureType) -> u32 {
    match texture_type {
        GpuTextureType::Texture1D => glow::TEXTURE_1D,
        GpuTextureType::Texture2D => glow::TEXTURE_2D,
        GpuTextureType::Texture3D => glow::TEXTURE_3D,
    }
}

/// Internal and pixel formats for a channel count.
fn formats(channels: u32) -> Option<(u32, u32)> {
    match channels {
        1 => Some((glow::R32F, glow::RED)),
        3 => Some((glow::RGB32F, glow::RGB)),
        4 => Some((glow::RGBA32F, glow::RGBA)),
        _ => None,
    }
}

fn uniform_type_from_gl(utype: u32) -> Option<UniformType> {
    Some(match utype {
        glow::FLOAT => UniformType::Float,
        glow::FLOAT_VEC2 => UniformType::Vec2,
        glow::FLOAT_VEC3 => UniformType::Vec3,
        glow::FLOAT_VEC4 => UniformType::Vec4,
        glow::FLOAT_MAT3 => UniformType::Mat3,
        glow::FLOAT_MAT4 => UniformType::Mat4,
        glow::INT => UniformType::Int,
        glow::BOOL => UniformType::Bool,
        _ => return None,
    })
}

impl GlBackend for GlowBackend {
    type Texture = glow::Texture;
    type Shader = glow::Shader;
    type Program = glow::Program;
    type UniformLocation = glow::UniformLocation;

    fn name(&self) -> &'static str {
        "glow"
    }

    #[allow(unsafe_code)]
    fn query_capabilities(&self) -> GlCapabilities {
        let version = self.gl.version();
        // SAFETY: parameter queries on the current context with valid enums.
        let (max_texture_size, max_3d_texture_size, max_texture_units, renderer) = unsafe {
            (
                self.gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE),
                self.gl.get_parameter_i32(glow::MAX_3D_TEXTURE_SIZE),
                self.gl.get_parameter_i32(glow::MAX_TEXTURE_IMAGE_UNITS),
                self.gl.get_parameter_string(glow::RENDERER),
            )
        };
        GlCapabilities {
            version: (version.major, version.minor),
            renderer,
            max_texture_size: max_texture_size.max(0) as u32,
            max_3d_texture_size: max_3d_texture_size.max(0) as u32,
            max_texture_units: max_texture_units.max(0) as u32,
            extensions: self.gl.supported_extensions().iter().cloned().collect(),
        }
    }

    #[allow(unsafe_code)]
    fn create_texture(&self, texture: &GpuTexture) -> Result<glow::Texture, String> {
        let (internal, format) = formats(texture.channels)
            .ok_or_else(|| format!("unsupported texture format with {} channels", texture.channels))?;
        let target = target(texture.texture_type);
        let filter = match texture.interpolation {
            GpuInterpolation::Nearest => glow::NEAREST,
            GpuInterpolation::Linear => glow::LINEAR,
        } as i32;
        let pixels = glow::PixelUnpackData::Slice(Some(bytemuck::cast_slice(&texture.data)));
        let (w, h, d) = (texture.width as i32, texture.height as i32, texture.depth as i32);

        // SAFETY: the texture is created, bound and filled on the current
        // context; the payload slice outlives the upload call. On error the
        // texture is deleted before returning.
        unsafe {
            // Flush stale errors so the check below only sees this upload.
            for _ in 0..16 {
                if self.gl.get_error() == glow::NO_ERROR {
                    break;
                }
            }

            let tex = self.gl.create_texture()?;
            self.gl.bind_texture(target, Some(tex));
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            if texture.texture_type != GpuTextureType::Texture1D {
                self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            }
            if texture.texture_type == GpuTextureType::Texture3D {
                self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_R, glow::CLAMP_TO_EDGE as i32);
            }
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

            match texture.texture_type {
                GpuTextureType::Texture1D => self.gl.tex_image_1d(
                    target, 0, internal as i32, w, 0, format, glow::FLOAT, pixels,
                ),
                GpuTextureType::Texture2D => self.gl.tex_image_2d(
                    target, 0, internal as i32, w, h, 0, format, glow::FLOAT, pixels,
                ),
                GpuTextureType::Texture3D => self.gl.tex_image_3d(
                    target, 0, internal as i32, w, h, d, 0, format, glow::FLOAT, pixels,
                ),
            }
            self.gl.bind_texture(target, None);

            match self.gl.get_error() {
                glow::NO_ERROR => Ok(tex),
                glow::OUT_OF_MEMORY => {
                    self.gl.delete_texture(tex);
                    Err("GL_OUT_OF_MEMORY".to_string())
                }
                code => {
                    self.gl.delete_texture(tex);
                    Err(format!("GL error 0x{code:04x} during texture upload"))
                }
            }
        }
    }

    #[allow(unsafe_code)]
    fn delete_texture(&self, texture: glow::Texture) {
        // SAFETY: texture was created on this context.
        unsafe { self.gl.delete_texture(texture) }
    }

    #[allow(unsafe_code)]
    fn bind_texture(&self, unit: u32, texture_type: GpuTextureType, texture: glow::Texture) {
        // SAFETY: unit is below the queried unit limit; texture is live.
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(target(texture_type), Some(texture));
        }
    }

    #[allow(unsafe_code)]
    fn compile_fragment_shader(&self, source: &str) -> Result<glow::Shader, String> {
        // SAFETY: shader object is created and compiled on the current
        // context and deleted on failure.
        unsafe {
            let shader = self.gl.create_shader(glow::FRAGMENT_SHADER)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if self.gl.get_shader_compile_status(shader) {
                Ok(shader)
            } else {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                Err(log)
            }
        }
    }

    #[allow(unsafe_code)]
    fn delete_shader(&self, shader: glow::Shader) {
        // SAFETY: shader was created on this context.
        unsafe { self.gl.delete_shader(shader) }
    }

    #[allow(unsafe_code)]
    fn link_program(&self, fragment: glow::Shader) -> Result<glow::Program, String> {
        // SAFETY: program is created on the current context with a live
        // compiled shader and deleted on failure.
        unsafe {
            let program = self.gl.create_program()?;
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            if self.gl.get_program_link_status(program) {
                Ok(program)
            } else {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                Err(log)
            }
        }
    }

    #[allow(unsafe_code)]
    fn delete_program(&self, program: glow::Program) {
        // SAFETY: program was created on this context.
        unsafe { self.gl.delete_program(program) }
    }

    #[allow(unsafe_code)]
    fn use_program(&self, program: glow::Program) {
        // SAFETY: program is live and linked.
        unsafe { self.gl.use_program(Some(program)) }
    }

    #[allow(unsafe_code)]
    fn uniform_location(&self, program: glow::Program, name: &str) -> Option<glow::UniformLocation> {
        // SAFETY: program is live and linked.
        unsafe { self.gl.get_uniform_location(program, name) }
    }

    #[allow(unsafe_code)]
    fn active_uniform_type(&self, program: glow::Program, name: &str) -> Option<UniformType> {
        // SAFETY: indices come from GL_ACTIVE_UNIFORMS of a live program.
        unsafe {
            let count = self.gl.get_active_uniforms(program);
            (0..count)
                .filter_map(|i| self.gl.get_active_uniform(program, i))
                .find(|u| u.name == name)
                .and_then(|u| uniform_type_from_gl(u.utype))
        }
    }

    #[allow(unsafe_code)]
    fn set_uniform(&self, location: &glow::UniformLocation, value: &UniformValue) {
        let loc = Some(location);
        // SAFETY: location belongs to the current program.
        unsafe {
            match value {
                UniformValue::Float(v) => self.gl.uniform_1_f32(loc, *v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32(loc, v.x, v.y),
                UniformValue::Vec3(v) => self.gl.uniform_3_f32(loc, v.x, v.y, v.z),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32(loc, v.x, v.y, v.z, v.w),
                UniformValue::Mat3(m) => {
                    self.gl.uniform_matrix_3_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::Mat4(m) => {
                    self.gl.uniform_matrix_4_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::Int(v) => self.gl.uniform_1_i32(loc, *v),
                UniformValue::Bool(v) => self.gl.uniform_1_i32(loc, i32::from(*v)),
            }
        }
    }

    #[allow(unsafe_code)]
    fn set_sampler(&self, location: &glow::UniformLocation, unit: u32) {
        // SAFETY: location belongs to the current program.
        unsafe { self.gl.uniform_1_i32(Some(location), unit as i32) }
    }
}
