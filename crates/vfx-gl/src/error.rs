//! Error types for texture upload, shader compilation and program use.
//!
//! Every failure is reported synchronously to the caller of the failing
//! operation; nothing is retried internally.

use thiserror::Error;

use crate::desc::UniformType;

/// Result type for GL builder operations.
pub type GlResult<T> = Result<T, GlError>;

/// Shader pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Fragment shader compilation.
    Fragment,
    /// Program linking.
    Link,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fragment => f.write_str("fragment"),
            Self::Link => f.write_str("link"),
        }
    }
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Texture creation or upload failed.
    Resource,
    /// Shader compile, link or uniform validation failed.
    ShaderCompile,
    /// Operation called in the wrong state.
    IllegalState,
}

/// Errors that can occur while building or using a GL program.
#[derive(Debug, Clone, Error)]
pub enum GlError {
    /// Texture creation or upload failed (unsupported format, out of memory).
    #[error("texture '{name}': {reason}")]
    Resource {
        /// Name of the texture that failed.
        name: String,
        /// Driver or validation message.
        reason: String,
    },

    /// Shader compilation or program linking failed.
    #[error("shader {stage} error:\n{log}")]
    ShaderCompile {
        /// Stage that failed.
        stage: ShaderStage,
        /// Line-numbered source followed by the driver info log.
        log: String,
    },

    /// A dynamic parameter does not match the uniform declared in the program.
    #[error("uniform '{name}': expected {expected}, found {found}")]
    UniformTypeMismatch {
        /// Uniform name.
        name: String,
        /// Type declared by the shader description.
        expected: UniformType,
        /// Type reported by the program or carried by the value.
        found: UniformType,
    },

    /// Operation attempted in an invalid state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The current context lacks required capabilities.
    #[error("unsupported GL context: {0}")]
    UnsupportedContext(String),
}

impl GlError {
    /// Creates a resource error for the named texture.
    pub fn resource(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resource { .. } | Self::UnsupportedContext(_) => ErrorKind::Resource,
            Self::ShaderCompile { .. } | Self::UniformTypeMismatch { .. } => {
                ErrorKind::ShaderCompile
            }
            Self::IllegalState(_) => ErrorKind::IllegalState,
        }
    }
}

/// Prefixes every source line with its 1-based number and appends the log.
///
/// Driver logs refer to line numbers, so the numbered source lets the caller
/// find the offending line in the combined shader.
pub fn format_shader_log(source: &str, log: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let width = lines.len().max(1).to_string().len();

    let numbered = lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>width$}: {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    match (numbered.is_empty(), log.is_empty()) {
        (true, _) => log.to_string(),
        (false, true) => numbered,
        (false, false) => format!("{numbered}\n\n{log}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(GlError::resource("lut", "oom").kind(), ErrorKind::Resource);
        assert_eq!(
            GlError::IllegalState("no program".into()).kind(),
            ErrorKind::IllegalState
        );
        let mismatch = GlError::UniformTypeMismatch {
            name: "exposure".into(),
            expected: UniformType::Float,
            found: UniformType::Vec3,
        };
        assert_eq!(mismatch.kind(), ErrorKind::ShaderCompile);
    }

    #[test]
    fn numbered_log_keeps_driver_text() {
        let log = format_shader_log("void main() {\n  x = ;\n}", "0:2: syntax error");
        assert!(log.starts_with("1: void main() {"));
        assert!(log.contains("2:   x = ;"));
        assert!(log.ends_with("0:2: syntax error"));
    }

    #[test]
    fn numbered_log_pads_width() {
        let src = (0..12).map(|_| "x").collect::<Vec<_>>().join("\n");
        let log = format_shader_log(&src, "");
        assert!(log.starts_with(" 1: x"));
        assert!(log.ends_with("12: x"));
    }

    #[test]
    fn empty_source_is_log_only() {
        assert_eq!(format_shader_log("", "bad"), "bad");
    }
}
