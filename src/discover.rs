//! README discovery and folder inspection.
//!
//! Walks the source tree with `walkdir`, pruning well-known vendor and
//! tooling directories, and applies user exclude globs via `globset`.
//! Every `README.md` below the root (but not the root README itself) marks
//! one example project.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".github",
    "docs",
    ".venv",
    "venv",
];

const README_NAME: &str = "README.md";

/// One project folder found under the source root.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadmeCandidate {
    pub readme_path: PathBuf,
    pub folder: PathBuf,
    /// Folder relative to the root, `/`-separated.
    pub folder_path: String,
    /// README relative to the root, `/`-separated.
    pub readme_relpath: String,
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| EXCLUDED_DIRS.contains(&n))
            .unwrap_or(false)
}

fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Finds project READMEs sorted by relative path, keeping at most `limit`.
pub fn discover_readmes(
    root: &Path,
    exclude_globs: &[String],
    limit: Option<usize>,
) -> Result<Vec<ReadmeCandidate>> {
    if !root.is_dir() {
        bail!("Source repository does not exist: {}", root.display());
    }
    let exclude_set = build_globset(exclude_globs)?;

    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != README_NAME {
            continue;
        }
        let readme_path = entry.path().to_path_buf();
        let Some(folder) = readme_path.parent().map(Path::to_path_buf) else {
            continue;
        };
        if folder == root {
            continue;
        }

        let readme_relpath = relative_slash_path(&readme_path, root);
        if exclude_set.is_match(&readme_relpath) {
            continue;
        }
        found.push(ReadmeCandidate {
            folder_path: relative_slash_path(&folder, root),
            readme_relpath,
            readme_path,
            folder,
        });
    }

    found.sort_by(|a, b| a.readme_relpath.cmp(&b.readme_relpath));
    if let Some(n) = limit.filter(|n| *n > 0) {
        found.truncate(n);
    }
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Facts about a project folder gathered in one walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderFacts {
    /// Regular files anywhere below the folder.
    pub file_count: usize,
    /// Up to three languages, most files first.
    pub languages: Vec<String>,
    /// First notebook directly inside the folder, by name.
    pub notebook: Option<String>,
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "py" | "ipynb" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "kt" => "kotlin",
        "swift" => "swift",
        "cpp" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "r" => "r",
        "m" => "objective-c",
        _ => return None,
    };
    Some(lang)
}

pub fn inspect_folder(folder: &Path) -> FolderFacts {
    let mut facts = FolderFacts::default();
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut notebooks: Vec<String> = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        facts.file_count += 1;

        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_lowercase();
        if ext == "ipynb" && entry.depth() == 1 {
            notebooks.push(name.to_string());
        }
        if let Some(lang) = language_for_extension(&ext) {
            *counts.entry(lang).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&'static str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    facts.languages = ranked
        .into_iter()
        .take(3)
        .map(|(lang, _)| lang.to_string())
        .collect();

    notebooks.sort();
    facts.notebook = notebooks.into_iter().next();
    facts
}
