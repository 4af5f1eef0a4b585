//! End-to-end builder tests against the headless backend.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use glam::{Mat3, Vec3};
use proptest::prelude::*;
use vfx_gl::{
    ContextSwitch, DynamicProperty, ErrorKind, GlContext, GlError, GlResult, GpuInterpolation,
    GpuShaderDesc, GpuTexture, GpuTextureType, HeadlessBackend, OpenGlBuilder, ShaderStage,
    UniformType, UniformValue,
};

const CLIENT: &str = "uniform sampler2D img;\n\
                      void main() {\n\
                      \x20   gl_FragColor = ocio(texture2D(img, gl_TexCoord[0].st));\n\
                      }";

const BODY: &str = "uniform sampler3D lut3d_0;\n\
                    uniform sampler1D lut1d_0;\n\
                    uniform float exposure;\n\
                    uniform mat3 to_display;\n\
                    vec4 ocio(vec4 c) {\n\
                    \x20   c.rgb = to_display * (c.rgb * exp2(exposure));\n\
                    \x20   c.rgb = texture3D(lut3d_0, c.rgb).rgb;\n\
                    \x20   c.r = texture1D(lut1d_0, c.r).r;\n\
                    \x20   return c;\n\
                    }";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    desc: Rc<GpuShaderDesc>,
    exposure: DynamicProperty,
    to_display: DynamicProperty,
}

fn fixture() -> Fixture {
    init_tracing();
    let exposure = DynamicProperty::new(UniformValue::Float(1.0));
    let to_display = DynamicProperty::new(UniformValue::Mat3(Mat3::IDENTITY));
    let desc = GpuShaderDesc::builder()
        .shader_text(BODY)
        .texture(GpuTexture::lut3d(
            "lut3d_0",
            32,
            vec![0.0; 32 * 32 * 32 * 3],
            GpuInterpolation::Linear,
        ))
        .texture(GpuTexture::lut1d("lut1d_0", vec![0.0; 4096 * 3], GpuInterpolation::Nearest))
        .uniform("exposure", UniformType::Float, exposure.clone())
        .uniform("to_display", UniformType::Mat3, to_display.clone())
        .build();
    Fixture {
        desc: Rc::new(desc),
        exposure,
        to_display,
    }
}

fn lut_desc(count: usize) -> Rc<GpuShaderDesc> {
    let builder = (0..count).fold(GpuShaderDesc::builder(), |b, i| {
        b.texture(GpuTexture::lut1d(
            format!("lut1d_{i}"),
            vec![0.5; 16 * 3],
            GpuInterpolation::Linear,
        ))
    });
    Rc::new(builder.build())
}

#[test]
fn lut_scenario_assigns_units_in_order() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    builder.allocate_all_textures(3).unwrap();
    assert_eq!(builder.textures().unit_of("lut3d_0"), Some(3));
    assert_eq!(builder.textures().unit_of("lut1d_0"), Some(4));

    let lut3d = builder.textures().iter().next().unwrap();
    assert_eq!(lut3d.texture_type, GpuTextureType::Texture3D);
    assert_eq!(lut3d.dims, [32, 32, 32]);

    let first = builder.max_supported_width();
    let second = builder.max_supported_width();
    assert_eq!(first, second);
    assert_eq!(ctx.backend().capability_queries(), 1);
}

#[test]
fn allocation_is_idempotent() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    builder.allocate_all_textures(2).unwrap();
    let first = builder.textures().assignments();
    builder.allocate_all_textures(2).unwrap();
    assert_eq!(builder.textures().assignments(), first);
    assert_eq!(ctx.backend().live_textures(), 2);
}

#[test]
fn release_then_allocate_reproduces_assignments() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let mut builder = OpenGlBuilder::new(&ctx, lut_desc(3));

    builder.allocate_all_textures(1).unwrap();
    let first = builder.textures().assignments();

    builder.release_all_textures().unwrap();
    assert!(builder.textures().is_empty());
    assert_eq!(ctx.backend().live_textures(), 0);

    builder.allocate_all_textures(1).unwrap();
    assert_eq!(builder.textures().assignments(), first);
    assert_eq!(ctx.backend().live_textures(), 3);
}

#[test]
fn new_description_drops_old_textures() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let mut builder = OpenGlBuilder::new(&ctx, lut_desc(3));
    builder.allocate_all_textures(1).unwrap();
    let first = builder.textures().assignments();

    builder.set_shader_desc(lut_desc(3));
    assert!(builder.textures().is_empty());
    assert_eq!(ctx.backend().live_textures(), 0);

    builder.reallocate_textures().unwrap();
    assert_eq!(builder.textures().assignments(), first);
}

#[test]
fn failed_allocation_leaves_registry_empty() {
    let ctx = GlContext::new(HeadlessBackend::new().with_memory_budget(400_000));
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    let err = builder.allocate_all_textures(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(err.to_string().contains("GL_OUT_OF_MEMORY"), "{err}");
    assert!(builder.textures().is_empty());
    assert_eq!(ctx.backend().live_textures(), 0);
    assert_eq!(ctx.backend().used_bytes(), 0);
}

#[test]
fn unchanged_build_does_not_recompile() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    let a = builder.build_program(CLIENT).unwrap();
    let b = builder.build_program(CLIENT).unwrap();
    assert_eq!(a, b);
    assert_eq!(builder.compile_count(), 1);
    assert_eq!(ctx.backend().compile_count(), 1);
    assert_eq!(ctx.backend().link_count(), 1);
}

#[test]
fn changed_source_rebuilds_and_relinks_uniforms() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    let a = builder.build_program(CLIENT).unwrap();
    let loc_a = *builder.uniforms().binding("exposure").unwrap().location().unwrap();

    let client2 = format!("{CLIENT}\n// variant");
    let b = builder.build_program(&client2).unwrap();
    assert_ne!(a, b);
    assert_eq!(builder.compile_count(), 2);

    let loc_b = *builder.uniforms().binding("exposure").unwrap().location().unwrap();
    assert_ne!(loc_a, loc_b);

    builder.refresh_all_uniforms().unwrap();
    assert_eq!(ctx.backend().uniform_value(b, "exposure"), Some(UniformValue::Float(1.0)));
    assert_eq!(ctx.backend().live_programs(), 1);
}

#[test]
fn changed_identity_rebuilds() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());
    let a = builder.build_program(CLIENT).unwrap();

    // Same content, new description object: identity unchanged.
    builder.set_shader_desc(fixture().desc);
    assert_eq!(builder.build_program(CLIENT).unwrap(), a);
    assert_eq!(builder.compile_count(), 1);

    let changed = GpuShaderDesc::builder()
        .shader_text(BODY.replace("exp2(exposure)", "exp(exposure)"))
        .uniform("exposure", UniformType::Float, fx.exposure.clone())
        .build();
    builder.set_shader_desc(Rc::new(changed));
    assert!(builder.uniforms().is_empty());
    let b = builder.build_program(CLIENT).unwrap();
    assert_ne!(a, b);
    assert_eq!(builder.compile_count(), 2);
}

#[test]
fn equal_description_swap_pushes_new_values() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let first = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, first.desc.clone());
    let program = builder.build_program(CLIENT).unwrap();
    builder.refresh_all_uniforms().unwrap();

    let second = fixture();
    second.exposure.set(UniformValue::Float(7.0));
    builder.set_shader_desc(second.desc.clone());
    assert_eq!(builder.build_program(CLIENT).unwrap(), program);
    assert_eq!(builder.compile_count(), 1);

    let bound = builder.uniforms().binding("exposure").unwrap();
    assert!(bound.value().ptr_eq(&second.exposure));

    builder.refresh_all_uniforms().unwrap();
    assert_eq!(ctx.backend().uniform_value(program, "exposure"), Some(UniformValue::Float(7.0)));

    first.exposure.set(UniformValue::Float(3.0));
    builder.refresh_all_uniforms().unwrap();
    assert_eq!(ctx.backend().uniform_value(program, "exposure"), Some(UniformValue::Float(7.0)));
}

#[test]
fn refresh_reflects_latest_value() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());
    let program = builder.build_program(CLIENT).unwrap();

    builder.refresh_all_uniforms().unwrap();
    let Some(UniformValue::Float(v)) = ctx.backend().uniform_value(program, "exposure") else {
        panic!("exposure not pushed");
    };
    assert_relative_eq!(v, 1.0);

    fx.exposure.set(UniformValue::Float(2.0));
    builder.refresh_all_uniforms().unwrap();
    let Some(UniformValue::Float(v)) = ctx.backend().uniform_value(program, "exposure") else {
        panic!("exposure not pushed");
    };
    assert_relative_eq!(v, 2.0);

    let m = Mat3::from_diagonal(Vec3::new(0.9, 1.0, 1.1));
    fx.to_display.set(UniformValue::Mat3(m));
    builder.refresh_all_uniforms().unwrap();
    assert_eq!(
        ctx.backend().uniform_value(program, "to_display"),
        Some(UniformValue::Mat3(m))
    );
}

#[test]
fn frame_sequence_wires_samplers() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());
    builder.allocate_all_textures(3).unwrap();
    let program = builder.build_program(CLIENT).unwrap();

    builder.activate_all_textures().unwrap();
    builder.refresh_all_uniforms().unwrap();
    builder.activate_program().unwrap();

    let gl = ctx.backend();
    assert_eq!(gl.current_program(), Some(program));
    assert_eq!(gl.sampler_unit(program, "lut3d_0"), Some(3));
    assert_eq!(gl.sampler_unit(program, "lut1d_0"), Some(4));
    let lut1d = builder.textures().iter().nth(1).unwrap().handle;
    assert_eq!(gl.bound_texture(4), Some(lut1d));
    assert_eq!(gl.texture_interpolation(lut1d), Some(GpuInterpolation::Nearest));
}

#[test]
fn syntax_error_then_recovery() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    let err = builder.activate_program().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(builder.handle(), None);

    let broken = "void main() {\n    gl_FragColor = ocio(vec4(1.0);\n}";
    let err = builder.build_program(broken).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShaderCompile);
    let GlError::ShaderCompile { stage, log } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(*stage, ShaderStage::Fragment);
    assert!(log.contains("syntax error"), "{log}");
    assert!(log.contains("gl_FragColor = ocio(vec4(1.0);"), "{log}");
    assert_eq!(builder.handle(), None);
    assert!(builder.activate_program().is_err());

    let program = builder.build_program(CLIENT).unwrap();
    assert_eq!(builder.handle(), Some(program));
    builder.activate_program().unwrap();
}

#[test]
fn failed_rebuild_keeps_previous_program() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());

    let good = builder.build_program(CLIENT).unwrap();
    assert!(builder.build_program("void main() { = ; }").is_err());
    assert_eq!(builder.handle(), Some(good));
    assert_eq!(builder.uniforms().len(), 2);

    builder.activate_program().unwrap();
    builder.refresh_all_uniforms().unwrap();
    assert_eq!(ctx.backend().current_program(), Some(good));
}

#[test]
fn optimized_out_uniform_is_skipped() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let unused = DynamicProperty::new(UniformValue::Float(3.0));
    let desc = GpuShaderDesc::builder()
        .shader_text("uniform float unused_gain;\nvec4 ocio(vec4 c) { return c; }")
        .uniform("unused_gain", UniformType::Float, unused)
        .build();
    let mut builder = OpenGlBuilder::new(&ctx, Rc::new(desc));
    let program = builder.build_program(CLIENT).unwrap();

    assert_eq!(builder.uniforms().len(), 1);
    assert_eq!(builder.uniforms().active_count(), 0);
    builder.refresh_all_uniforms().unwrap();
    assert_eq!(ctx.backend().uniform_value(program, "unused_gain"), None);
}

#[test]
fn uniform_type_mismatch_fails_build() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let desc = GpuShaderDesc::builder()
        .shader_text("uniform vec3 gain;\nvec4 ocio(vec4 c) { return vec4(c.rgb * gain, c.a); }")
        .uniform("gain", UniformType::Float, DynamicProperty::new(UniformValue::Float(1.0)))
        .build();
    let mut builder = OpenGlBuilder::new(&ctx, Rc::new(desc));

    let err = builder.build_program(CLIENT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShaderCompile);
    assert_eq!(builder.handle(), None);
    assert_eq!(ctx.backend().live_programs(), 0);
}

#[test]
fn activate_textures_requires_program() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let mut builder = OpenGlBuilder::new(&ctx, lut_desc(1));
    builder.allocate_all_textures(0).unwrap();
    let err = builder.activate_all_textures().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[test]
fn teardown_releases_everything() {
    let ctx = GlContext::new(HeadlessBackend::new());
    let fx = fixture();
    {
        let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());
        builder.allocate_all_textures(0).unwrap();
        builder.build_program(CLIENT).unwrap();
        assert_eq!(ctx.backend().live_textures(), 2);
    }
    let gl = ctx.backend();
    assert_eq!(gl.live_textures(), 0);
    assert_eq!(gl.live_programs(), 0);
    assert_eq!(gl.live_shaders(), 0);
    assert_eq!(gl.used_bytes(), 0);
}

#[test]
fn packed_lut_fits_driver_width() {
    let ctx = GlContext::new(HeadlessBackend::new().with_max_texture_size(1024));
    let width = ctx.max_texture_width();
    let lut = GpuTexture::lut1d_packed("lut1d_0", vec![0.25; 4096 * 3], width, GpuInterpolation::Linear);
    assert_eq!((lut.width, lut.height), (1024, 4));

    let desc = GpuShaderDesc::builder().texture(lut).build();
    let mut builder = OpenGlBuilder::new(&ctx, Rc::new(desc));
    builder.allocate_all_textures(0).unwrap();

    let unpacked = GpuTexture::lut1d("lut1d_0", vec![0.25; 4096 * 3], GpuInterpolation::Linear);
    builder.set_shader_desc(Rc::new(GpuShaderDesc::builder().texture(unpacked).build()));
    assert!(builder.allocate_all_textures(0).is_err());
}

/// Host windowing layer that records which context is current.
struct HostContexts {
    current: RefCell<Vec<&'static str>>,
    refuse: bool,
}

impl ContextSwitch for HostContexts {
    type Saved = &'static str;

    fn make_current(&self) -> GlResult<&'static str> {
        if self.refuse {
            return Err(GlError::UnsupportedContext("plugin context lost".into()));
        }
        let mut stack = self.current.borrow_mut();
        let prev = stack.last().copied().unwrap_or("none");
        stack.push("plugin");
        Ok(prev)
    }

    fn restore(&self, saved: &'static str) {
        let mut stack = self.current.borrow_mut();
        stack.pop();
        assert_eq!(stack.last().copied(), Some(saved));
    }
}

#[test]
fn frame_runs_inside_plugin_context() {
    let ctx = GlContext::acquire(HeadlessBackend::new()).unwrap();
    let fx = fixture();
    let mut builder = OpenGlBuilder::new(&ctx, fx.desc.clone());
    builder.allocate_all_textures(1).unwrap();
    builder.build_program(CLIENT).unwrap();

    let host = HostContexts {
        current: RefCell::new(vec!["host"]),
        refuse: false,
    };
    let inside = ctx
        .scoped(&host, |_| {
            builder.activate_all_textures()?;
            builder.refresh_all_uniforms()?;
            builder.activate_program()?;
            Ok::<_, GlError>(host.current.borrow().last().copied())
        })
        .unwrap()
        .unwrap();
    assert_eq!(inside, Some("plugin"));
    assert_eq!(*host.current.borrow(), vec!["host"]);

    let lost = HostContexts {
        current: RefCell::new(vec!["host"]),
        refuse: true,
    };
    let err = ctx.scoped(&lost, |_| ()).unwrap_err();
    assert!(matches!(err, GlError::UnsupportedContext(_)));
}

proptest! {
    #[test]
    fn units_are_contiguous(start in 0u32..8, count in 0usize..8) {
        let ctx = GlContext::new(HeadlessBackend::new());
        let mut builder = OpenGlBuilder::new(&ctx, lut_desc(count));
        builder.allocate_all_textures(start).unwrap();

        let units: Vec<u32> = builder.textures().assignments().into_iter().map(|(_, u)| u).collect();
        let expected: Vec<u32> = (start..start + count as u32).collect();
        prop_assert_eq!(units, expected);
    }
}
