use crate::TransferError;

/// Validates a bare file name for the remote drive.
///
/// Rejects:
/// - Empty names and `.` / `..`
/// - Names containing a path separator (`/` or `\`)
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if name == "." || name == ".." {
        return Err(TransferError::InvalidPath(format!(
            "reserved file name: {name}"
        )));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidPath(format!(
            "file name contains a path separator: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidPath(format!(
            "file name contains control characters: {name:?}"
        )));
    }
    Ok(())
}

/// Joins a destination folder and a file name into a drive-relative path.
///
/// Empty and `.` segments collapse, so `"/"`, `""` and `"//"` all resolve
/// to the bare file name and no double slashes survive. Parent directory
/// segments (`..`) are rejected.
pub fn normalize_full_path(destination: &str, file_name: &str) -> Result<String, TransferError> {
    validate_file_name(file_name)?;

    let mut segments = Vec::new();
    for segment in destination.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {destination}"
                )));
            }
            s => segments.push(s),
        }
    }
    segments.push(file_name);
    Ok(segments.join("/"))
}
