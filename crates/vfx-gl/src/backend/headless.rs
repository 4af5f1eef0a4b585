//! Headless backend emulating GL object management in memory.
//!
//! Tracks textures, shaders and programs the way a driver would, validates
//! shader source lexically (bracket balance, `main` presence) and reflects
//! uniform declarations, treating a uniform that is declared but never
//! referenced as optimized out. Used for tests and for hosts that run the
//! builder without a live context.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::GlBackend;
use crate::context::GlCapabilities;
use crate::desc::{GpuInterpolation, GpuTexture, GpuTextureType, UniformType, UniformValue};

/// Uniform location within a headless program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessUniform {
    program: u32,
    index: usize,
}

#[derive(Debug)]
struct TextureObject {
    texture_type: GpuTextureType,
    dims: [u32; 3],
    interpolation: GpuInterpolation,
    bytes: u64,
}

#[derive(Debug)]
struct ActiveUniform {
    name: String,
    glsl_type: String,
}

#[derive(Debug, Default)]
struct ProgramObject {
    uniforms: Vec<ActiveUniform>,
    values: HashMap<usize, UniformValue>,
    samplers: HashMap<usize, u32>,
}

#[derive(Debug, Default)]
struct State {
    next_name: u32,
    textures: HashMap<u32, TextureObject>,
    shaders: HashMap<u32, String>,
    programs: HashMap<u32, ProgramObject>,
    units: BTreeMap<u32, u32>,
    current_program: Option<u32>,
    used_bytes: u64,
    failing_textures: HashSet<String>,
    compiles: usize,
    links: usize,
}

impl State {
    fn gen_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }
}

/// In-memory GL emulation.
#[derive(Debug)]
pub struct HeadlessBackend {
    version: (u32, u32),
    max_texture_size: u32,
    max_3d_texture_size: u32,
    max_texture_units: u32,
    memory_budget: u64,
    state: RefCell<State>,
    capability_queries: Cell<usize>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// Creates a backend reporting a GL 4.1 context with typical limits.
    pub fn new() -> Self {
        Self {
            version: (4, 1),
            max_texture_size: 16384,
            max_3d_texture_size: 2048,
            max_texture_units: 16,
            memory_budget: 2 * 1024 * 1024 * 1024,
            state: RefCell::new(State::default()),
            capability_queries: Cell::new(0),
        }
    }

    /// Overrides the reported GL version.
    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = (major, minor);
        self
    }

    /// Overrides the 1D/2D texture size limit.
    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    /// Overrides the number of texture units.
    pub fn with_max_texture_units(mut self, units: u32) -> Self {
        self.max_texture_units = units;
        self
    }

    /// Overrides the device memory available for textures.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Makes every upload of the named texture fail.
    pub fn fail_texture(&self, name: &str) {
        self.state.borrow_mut().failing_textures.insert(name.to_string());
    }

    /// Clears injected texture failures.
    pub fn clear_failures(&self) {
        self.state.borrow_mut().failing_textures.clear();
    }

    /// Number of fragment shader compilations attempted.
    pub fn compile_count(&self) -> usize {
        self.state.borrow().compiles
    }

    /// Number of program links attempted.
    pub fn link_count(&self) -> usize {
        self.state.borrow().links
    }

    /// Number of capability queries served.
    pub fn capability_queries(&self) -> usize {
        self.capability_queries.get()
    }

    /// Live texture objects.
    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    /// Live shader objects.
    pub fn live_shaders(&self) -> usize {
        self.state.borrow().shaders.len()
    }

    /// Live program objects.
    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    /// Device memory held by live textures.
    pub fn used_bytes(&self) -> u64 {
        self.state.borrow().used_bytes
    }

    /// Texture bound to a unit, if it is still alive.
    pub fn bound_texture(&self, unit: u32) -> Option<u32> {
        let state = self.state.borrow();
        state
            .units
            .get(&unit)
            .copied()
            .filter(|t| state.textures.contains_key(t))
    }

    /// Kind and dimensions of a live texture.
    pub fn texture_info(&self, texture: u32) -> Option<(GpuTextureType, [u32; 3])> {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .map(|t| (t.texture_type, t.dims))
    }

    /// Interpolation a live texture was uploaded with.
    pub fn texture_interpolation(&self, texture: u32) -> Option<GpuInterpolation> {
        self.state.borrow().textures.get(&texture).map(|t| t.interpolation)
    }

    /// Currently bound program.
    pub fn current_program(&self) -> Option<u32> {
        self.state.borrow().current_program
    }

    /// Last value pushed to a uniform.
    pub fn uniform_value(&self, program: u32, name: &str) -> Option<UniformValue> {
        let state = self.state.borrow();
        let prog = state.programs.get(&program)?;
        let index = prog.uniforms.iter().position(|u| u.name == name)?;
        prog.values.get(&index).copied()
    }

    /// Unit a sampler uniform points at.
    pub fn sampler_unit(&self, program: u32, name: &str) -> Option<u32> {
        let state = self.state.borrow();
        let prog = state.programs.get(&program)?;
        let index = prog.uniforms.iter().position(|u| u.name == name)?;
        prog.samplers.get(&index).copied()
    }

    fn check_texture(&self, texture: &GpuTexture, used: u64) -> Result<(), String> {
        if !matches!(texture.channels, 1 | 3 | 4) {
            return Err(format!(
                "GL_INVALID_ENUM: unsupported texture format with {} channels",
                texture.channels
            ));
        }
        let limit = match texture.texture_type {
            GpuTextureType::Texture3D => self.max_3d_texture_size,
            _ => self.max_texture_size,
        };
        let largest = texture.width.max(texture.height).max(texture.depth);
        if largest > limit {
            return Err(format!("GL_INVALID_VALUE: dimension {largest} exceeds {limit}"));
        }
        if used + texture.size_bytes() > self.memory_budget {
            return Err("GL_OUT_OF_MEMORY".to_string());
        }
        Ok(())
    }
}

impl GlBackend for HeadlessBackend {
    type Texture = u32;
    type Shader = u32;
    type Program = u32;
    type UniformLocation = HeadlessUniform;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn query_capabilities(&self) -> GlCapabilities {
        self.capability_queries.set(self.capability_queries.get() + 1);
        GlCapabilities {
            version: self.version,
            renderer: "vfx-gl headless".to_string(),
            max_texture_size: self.max_texture_size,
            max_3d_texture_size: self.max_3d_texture_size,
            max_texture_units: self.max_texture_units,
            extensions: BTreeSet::new(),
        }
    }

    fn create_texture(&self, texture: &GpuTexture) -> Result<u32, String> {
        let mut state = self.state.borrow_mut();
        if state.failing_textures.contains(&texture.name) {
            return Err("GL_INVALID_OPERATION: upload rejected by driver".to_string());
        }
        self.check_texture(texture, state.used_bytes)?;

        let name = state.gen_name();
        let bytes = texture.size_bytes();
        state.used_bytes += bytes;
        state.textures.insert(
            name,
            TextureObject {
                texture_type: texture.texture_type,
                dims: [texture.width, texture.height, texture.depth],
                interpolation: texture.interpolation,
                bytes,
            },
        );
        Ok(name)
    }

    fn delete_texture(&self, texture: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(obj) = state.textures.remove(&texture) {
            state.used_bytes -= obj.bytes;
        }
    }

    fn bind_texture(&self, unit: u32, _texture_type: GpuTextureType, texture: u32) {
        self.state.borrow_mut().units.insert(unit, texture);
    }

    fn compile_fragment_shader(&self, source: &str) -> Result<u32, String> {
        let mut state = self.state.borrow_mut();
        state.compiles += 1;
        check_syntax(source)?;
        let name = state.gen_name();
        state.shaders.insert(name, source.to_string());
        Ok(name)
    }

    fn delete_shader(&self, shader: u32) {
        self.state.borrow_mut().shaders.remove(&shader);
    }

    fn link_program(&self, fragment: u32) -> Result<u32, String> {
        let mut state = self.state.borrow_mut();
        state.links += 1;
        let source = state
            .shaders
            .get(&fragment)
            .ok_or_else(|| "error: attached shader is not a compiled shader object".to_string())?;

        if count_identifier(source, "main") == 0 {
            return Err("error: missing main function in fragment shader".to_string());
        }

        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        for decl in declared_uniforms(source) {
            if let Some(prev) = uniforms.iter().find(|u| u.name == decl.name) {
                if prev.glsl_type != decl.glsl_type {
                    return Err(format!(
                        "error: uniform '{}' redeclared as {} (was {})",
                        decl.name, decl.glsl_type, prev.glsl_type
                    ));
                }
                continue;
            }
            // Declared-but-unreferenced uniforms are dropped by the optimizer.
            if count_identifier(source, &decl.name) > 1 {
                uniforms.push(decl);
            }
        }

        let name = state.gen_name();
        state.programs.insert(
            name,
            ProgramObject {
                uniforms,
                ..Default::default()
            },
        );
        Ok(name)
    }

    fn delete_program(&self, program: u32) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program);
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn use_program(&self, program: u32) {
        self.state.borrow_mut().current_program = Some(program);
    }

    fn uniform_location(&self, program: u32, name: &str) -> Option<HeadlessUniform> {
        let state = self.state.borrow();
        let index = state
            .programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|u| u.name == name)?;
        Some(HeadlessUniform { program, index })
    }

    fn active_uniform_type(&self, program: u32, name: &str) -> Option<UniformType> {
        let state = self.state.borrow();
        let uniform = state
            .programs
            .get(&program)?
            .uniforms
            .iter()
            .find(|u| u.name == name)?;
        UniformType::from_glsl(&uniform.glsl_type)
    }

    fn set_uniform(&self, location: &HeadlessUniform, value: &UniformValue) {
        if let Some(prog) = self.state.borrow_mut().programs.get_mut(&location.program) {
            prog.values.insert(location.index, *value);
        }
    }

    fn set_sampler(&self, location: &HeadlessUniform, unit: u32) {
        if let Some(prog) = self.state.borrow_mut().programs.get_mut(&location.program) {
            prog.samplers.insert(location.index, unit);
        }
    }
}

/// Strips `//` comments from a line.
fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or("")
}

/// Lexical check of bracket balance and empty assignments.
fn check_syntax(source: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (i, line) in source.lines().enumerate() {
        let line_no = i + 1;
        let code = code_part(line);

        let compact: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.contains("=;") && !compact.contains("==;") {
            return Err(format!("0:{line_no}: error: syntax error, unexpected ';'"));
        }

        for c in code.chars() {
            match c {
                '(' | '{' | '[' => stack.push((c, line_no)),
                ')' | '}' | ']' => {
                    let open = match c {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };
                    match stack.pop() {
                        Some((o, _)) if o == open => {}
                        _ => return Err(format!("0:{line_no}: error: syntax error, unexpected '{c}'")),
                    }
                }
                _ => {}
            }
        }
    }

    match stack.pop() {
        Some((c, line_no)) => Err(format!("0:{line_no}: error: unclosed '{c}' at end of input")),
        None => Ok(()),
    }
}

/// Parses `uniform [precision] type name[...];` declarations.
fn declared_uniforms(source: &str) -> Vec<ActiveUniform> {
    let mut out = Vec::new();
    for line in source.lines() {
        let code = code_part(line).trim();
        let Some(rest) = code.strip_prefix("uniform ") else {
            continue;
        };
        let mut tokens = rest
            .split_whitespace()
            .filter(|t| !matches!(*t, "highp" | "mediump" | "lowp"));
        let (Some(glsl_type), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let name: String = name
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            out.push(ActiveUniform {
                name,
                glsl_type: glsl_type.to_string(),
            });
        }
    }
    out
}

/// Counts whole-identifier occurrences of `ident` outside comments.
fn count_identifier(source: &str, ident: &str) -> usize {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut count = 0;
    for line in source.lines() {
        let code = code_part(line);
        for (pos, _) in code.match_indices(ident) {
            let before = code[..pos].chars().next_back();
            let after = code[pos + ident.len()..].chars().next();
            if !before.is_some_and(is_ident) && !after.is_some_and(is_ident) {
                count += 1;
            }
        }
    }
    count
}
