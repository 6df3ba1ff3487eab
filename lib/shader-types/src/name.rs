use thiserror::Error;

/// Shader names are bounded and may not start
/// with `.` nor end with `.` or a
/// space.
pub const MAX_SHADER_NAME_LEN: usize = 40;
pub const RESERVED_NAME_PREFIX: char = '.';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaderNameError {
    #[error("shader name is empty")]
    Empty,
    #[error("shader name '{0}' is longer than the {MAX_SHADER_NAME_LEN} character limit")]
    TooLong(String),
    #[error("shader name '{0}' starts with the reserved prefix '{RESERVED_NAME_PREFIX}'")]
    ReservedPrefix(String),
    #[error("shader name '{0}' ends with '.' or a space")]
    TrailingDotOrSpace(String),
    #[error("shader name '{0}' contains a character outside [A-Za-z0-9_-]")]
    InvalidCharacter(String),
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validates a shader's unique name.
pub fn validate_shader_name(name: &str) -> Result<(), ShaderNameError> {
    if name.is_empty() {
        return Err(ShaderNameError::Empty);
    }
    if name.chars().count() > MAX_SHADER_NAME_LEN {
        return Err(ShaderNameError::TooLong(name.to_string()));
    }
    if name.starts_with(RESERVED_NAME_PREFIX) {
        return Err(ShaderNameError::ReservedPrefix(name.to_string()));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(ShaderNameError::TrailingDotOrSpace(name.to_string()));
    }
    if !name.chars().all(is_allowed_char) {
        return Err(ShaderNameError::InvalidCharacter(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_name() {
        assert!(validate_shader_name("mesh_vs").is_ok());
    }

    #[test]
    fn rejects_dot_prefix() {
        assert_eq!(
            validate_shader_name(".shader_cache"),
            Err(ShaderNameError::ReservedPrefix(".shader_cache".to_string()))
        );
    }

    #[test]
    fn rejects_trailing_space() {
        assert!(matches!(
            validate_shader_name("mesh "),
            Err(ShaderNameError::TrailingDotOrSpace(_))
        ));
    }

    #[test]
    fn rejects_trailing_dot() {
        assert!(matches!(
            validate_shader_name("mesh."),
            Err(ShaderNameError::TrailingDotOrSpace(_))
        ));
    }

    #[test]
    fn rejects_too_long() {
        let long_name = "a".repeat(MAX_SHADER_NAME_LEN + 1);
        assert!(matches!(
            validate_shader_name(&long_name),
            Err(ShaderNameError::TooLong(_))
        ));
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(matches!(
            validate_shader_name("mesh/vs"),
            Err(ShaderNameError::InvalidCharacter(_))
        ));
    }
}
