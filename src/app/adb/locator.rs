use std::path::Path;

use crate::app::error::AppError;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Configured tool path, or the bare tool name resolved through `PATH`.
pub fn resolve_program(config_command_path: &str, default_name: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        default_name.to_string()
    } else {
        normalized
    }
}

/// Bare names are left to `PATH` lookup; explicit paths must be an existing file.
pub fn validate_program(program: &str, tool: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::validation(format!("{tool} command is empty"), trace_id));
    }
    let path = Path::new(program);
    if path.components().count() == 1 {
        return Ok(());
    }
    if path.is_dir() {
        return Err(AppError::validation(
            format!("{tool} path must point to an executable file"),
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::validation(
            format!("{tool} executable not found at {program}"),
            trace_id,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/build-tools/aapt'  "),
            "/opt/android/build-tools/aapt"
        );
    }

    #[test]
    fn resolves_empty_to_default_name() {
        assert_eq!(resolve_program("", "adb"), "adb");
        assert_eq!(resolve_program("   ", "aapt"), "aapt");
    }

    #[test]
    fn bare_names_are_accepted() {
        assert!(validate_program("adb", "adb", "t").is_ok());
        assert!(validate_program("aapt2", "aapt", "t").is_ok());
    }

    #[test]
    fn rejects_missing_or_directory_paths() {
        let err = validate_program("/this/path/should/not/exist/adb", "adb", "t").unwrap_err();
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(err.error.contains("not found"));

        let dir = tempfile::tempdir().expect("tmp");
        let err = validate_program(&dir.path().to_string_lossy(), "adb", "t").unwrap_err();
        assert!(err.error.contains("executable file"));
    }
}
