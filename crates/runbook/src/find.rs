// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline-definition file discovery: recursively scans a directory for
//! `.hcl`/`.toml`/`.json` files and loads every pipeline they define.

use crate::parser::{parse_pipelines_with_format, Format};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use sw_core::Pipeline;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FindError {
    #[error("pipeline '{name}' defined in both {} and {}", file_a.display(), file_b.display())]
    DuplicateAcrossFiles {
        name: String,
        file_a: PathBuf,
        file_b: PathBuf,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Recursively collects every pipeline defined under `dir`, across any mix
/// of `.hcl`/`.toml`/`.json` files. Files that fail to parse are skipped
/// with a warning rather than aborting the whole scan — a single malformed
/// file should not block every other pipeline from loading.
pub fn collect_all_pipelines(dir: &Path) -> Result<IndexMap<String, Pipeline>, FindError> {
    if !dir.exists() {
        return Ok(IndexMap::new());
    }
    let files = collect_pipeline_files(dir)?;
    let mut pipelines = IndexMap::new();
    let mut origin: HashMap<String, PathBuf> = HashMap::new();

    for (path, format) in files {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pipeline file");
                continue;
            }
        };
        let parsed = match parse_pipelines_with_format(&content, format) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid pipeline file");
                continue;
            }
        };
        for (_, pipeline) in parsed {
            if let Some(prev_path) = origin.get(&pipeline.id) {
                return Err(FindError::DuplicateAcrossFiles {
                    name: pipeline.id,
                    file_a: prev_path.clone(),
                    file_b: path,
                });
            }
            origin.insert(pipeline.id.clone(), path.clone());
            pipelines.insert(pipeline.id.clone(), pipeline);
        }
    }

    Ok(pipelines)
}

/// Finds a single pipeline by id, scanning `dir` until it is found.
pub fn find_pipeline(dir: &Path, pipeline_id: &str) -> Result<Option<Pipeline>, FindError> {
    Ok(collect_all_pipelines(dir)?.shift_remove(pipeline_id))
}

/// Recursively collect all pipeline definition files (`.hcl`, `.toml`, `.json`) under `dir`.
fn collect_pipeline_files(dir: &Path) -> Result<Vec<(PathBuf, Format)>, std::io::Error> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(format) = format_for_path(&path) {
                files.push((path, format));
            }
        }
    }
    Ok(files)
}

fn format_for_path(path: &Path) -> Option<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Some(Format::Toml),
        Some("hcl") => Some(Format::Hcl),
        Some("json") => Some(Format::Json),
        _ => None,
    }
}

#[cfg(test)]
#[path = "find_tests.rs"]
mod tests;
