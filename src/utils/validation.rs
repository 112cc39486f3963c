/// Longest accepted filename in bytes
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Checks that a client supplied filename names a single entry directly
/// inside the upload directory. Names are never rewritten, only accepted or
/// rejected.
pub fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    if filename == "." || filename == ".." {
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: format!("'{}' is not a file name", filename),
        });
    }

    if filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: "Filename must not contain path separators".to_string(),
        });
    }

    if filename.chars().any(char::is_control) {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename must not contain control characters".to_string(),
        });
    }

    if filename.len() > MAX_FILENAME_LEN {
        return Err(ValidationError {
            code: "FILENAME_TOO_LONG",
            message: format!(
                "Filename is {} bytes, at most {} are allowed",
                filename.len(),
                MAX_FILENAME_LEN
            ),
        });
    }

    #[cfg(windows)]
    if filename.contains(':') {
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: "Filename must not contain a drive or stream separator".to_string(),
        });
    }

    Ok(())
}
