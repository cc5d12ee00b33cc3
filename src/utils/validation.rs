use std::path::Path;

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

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Returns the extension of the final path component including the leading dot,
/// or an empty string when there is none.
pub fn file_extension(filename: &str) -> &str {
    let base = filename
        .rsplit(is_separator)
        .next()
        .unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) => &base[idx..],
        None => "",
    }
}

/// Checks the declared extension against the allow-list (case-sensitive)
pub fn validate_extension(filename: &str, allowed: &[String]) -> Result<(), ValidationError> {
    let ext = file_extension(filename);
    if !ext.is_empty() && allowed.iter().any(|a| a == ext) {
        return Ok(());
    }

    Err(ValidationError {
        code: "INVALID_EXTENSION",
        message: format!("File extension '{}' is not allowed", ext),
    })
}

/// Sanitizes an uploaded filename to prevent path traversal and injection attacks.
/// Only the final path component is kept.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let name = filename.rsplit(is_separator).next().unwrap_or("");
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Leave room for the timestamp prefix within a 255 byte file name
    let sanitized = if sanitized.len() > 200 {
        let mut start = sanitized.len() - 200;
        while !sanitized.is_char_boundary(start) {
            start += 1;
        }
        sanitized[start..].to_string()
    } else {
        sanitized
    };

    if sanitized.starts_with('.') {
        return Err(ValidationError {
            code: "HIDDEN_FILE",
            message: "Hidden files (starting with '.') are not allowed".to_string(),
        });
    }

    Ok(sanitized)
}

/// Validates a caller-supplied storage key before it is joined onto a directory.
pub fn validate_storage_key(key: &str) -> Result<(), ValidationError> {
    let invalid = |message: &str| ValidationError {
        code: "INVALID_KEY",
        message: format!("{}: '{}'", message, key),
    };

    if key.is_empty() {
        return Err(invalid("File name cannot be empty"));
    }
    if key == "." || key == ".." {
        return Err(invalid("Parent directory references are not allowed"));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(invalid("Path separators are not allowed"));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(invalid("Control characters are not allowed"));
    }
    if key.len() > 255 {
        return Err(invalid("File name is too long"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec![".xlsx".to_string(), ".xls".to_string(), ".csv".to_string()]
    }

    #[test]
    fn test_extension_allow_list() {
        assert!(validate_extension("trades.xlsx", &allowed()).is_ok());
        assert!(validate_extension("jisdor.xls", &allowed()).is_ok());
        assert!(validate_extension("export.2024.csv", &allowed()).is_ok());

        assert!(validate_extension("notes.txt", &allowed()).is_err());
        assert!(validate_extension("report.pdf", &allowed()).is_err());
        assert!(validate_extension("README", &allowed()).is_err());
        assert!(validate_extension("TRADES.XLSX", &allowed()).is_err());
        assert!(validate_extension("dir.xlsx/file", &allowed()).is_err());
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.b.csv"), ".csv");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension("some.dir/noext"), "");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/trades.xlsx").unwrap(), "trades.xlsx");
        assert_eq!(sanitize_filename("C:\\Users\\me\\jisdor.xls").unwrap(), "jisdor.xls");
        assert_eq!(sanitize_filename("a|b?.csv").unwrap(), "a_b_.csv");
    }

    #[test]
    fn test_sanitize_rejects_empty_and_hidden() {
        assert_eq!(sanitize_filename("").unwrap_err().code, "INVALID_FILENAME");
        assert_eq!(sanitize_filename("uploads/").unwrap_err().code, "INVALID_FILENAME");
        assert_eq!(sanitize_filename(".hidden.csv").unwrap_err().code, "HIDDEN_FILE");
    }

    #[test]
    fn test_storage_key() {
        assert!(validate_storage_key("1700000000_trades.xlsx").is_ok());
        assert!(validate_storage_key("").is_err());
        assert!(validate_storage_key("..").is_err());
        assert!(validate_storage_key("../secret").is_err());
        assert!(validate_storage_key("a/b.xlsx").is_err());
        assert!(validate_storage_key("a\\b.xlsx").is_err());
        assert!(validate_storage_key("a\0b").is_err());
        assert!(validate_storage_key("1700000000_q1..q2.csv").is_ok());
    }
}
