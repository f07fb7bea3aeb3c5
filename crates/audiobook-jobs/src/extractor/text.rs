use std::path::Path;

use crate::engine::Chapter;
use crate::error::BoxError;

/// Plain text input is narrated as a single chapter.
pub fn extract_text(path: &Path) -> Result<Vec<Chapter>, BoxError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Chapter::new("Chapter 1", content, 1)])
}
