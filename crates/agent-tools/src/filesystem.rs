//! Filesystem tools for the orchestration core's workspace.
//!
//! Read, write, list, and search files. All three exposed operations are
//! plain async helpers over `tokio::fs`; `agent-core` wraps them as
//! registry `Tool`s and decides read-only classification.

use crate::ToolResult;
use regex::Regex;
use std::path::Path;

/// Read the contents of a file
pub async fn read_file(path: &Path) -> ToolResult {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => ToolResult::success(contents),
        Err(e) => ToolResult::error(format!("Failed to read file: {}", e)),
    }
}

/// Write contents to a file
pub async fn write_file(path: &Path, contents: &str) -> ToolResult {
    match tokio::fs::write(path, contents).await {
        Ok(()) => ToolResult::success(format!("Wrote {} bytes to {}", contents.len(), path.display())),
        Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
    }
}

/// List contents of a directory
pub async fn list_directory(path: &Path) -> ToolResult {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => {
            let mut items = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = entry.file_type().await.ok();
                let type_str = match file_type {
                    Some(ft) if ft.is_dir() => "dir",
                    Some(ft) if ft.is_file() => "file",
                    Some(ft) if ft.is_symlink() => "link",
                    _ => "unknown",
                };
                items.push(format!("{} ({})", name, type_str));
            }
            ToolResult::success(items.join("\n"))
        }
        Err(e) => ToolResult::error(format!("Failed to list directory: {}", e)),
    }
}

/// Search files under `root`, recursively, for lines matching `pattern`.
/// Results are capped at `max_results` lines; a cap means the search
/// stopped early, not that no further matches exist.
pub async fn grep_directory(root: &Path, pattern: &str, max_results: usize) -> ToolResult {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
    };

    let mut matches = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("Failed to read directory: {}", e)),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                dirs.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Ok(contents) = tokio::fs::read_to_string(&path).await else {
                continue;
            };

            for (line_no, line) in contents.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}: {}", path.display(), line_no + 1, line.trim()));
                    if matches.len() >= max_results {
                        return ToolResult::success(matches.join("\n"));
                    }
                }
            }
        }
    }

    if matches.is_empty() {
        ToolResult::success("No matches found.")
    } else {
        ToolResult::success(matches.join("\n"))
    }
}
