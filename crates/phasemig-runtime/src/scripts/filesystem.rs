use std::path::{Path, PathBuf};

use phasemig_core::{sort_by_name, MigrateError, Result, Script};
use tracing::debug;
use walkdir::WalkDir;

use super::ScriptSource;

/// Loads scripts from a directory tree.
///
/// Scripts are named by their path relative to `root` with `/` separators,
/// e.g. `2024/0001_create_users.sql`, and executed in ascending name order.
/// If `root` is a file, that file is the only script.
#[derive(Debug, Clone)]
pub struct FileSystemScriptSource {
    root: PathBuf,
    recursive: bool,
    extension: String,
}

impl FileSystemScriptSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            extension: "sql".to_string(),
        }
    }

    /// Whether to descend into subdirectories (default: true).
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Extension of script files, without the dot (default: `sql`).
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    fn load_dir(&self) -> Result<Vec<Script>> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut scripts = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
        {
            let entry = entry.map_err(|e| {
                MigrateError::Discovery(format!("Failed to scan {}: {}", self.root.display(), e))
            })?;

            if !entry.file_type().is_file() || !self.matches_extension(entry.path()) {
                continue;
            }

            let name = relative_name(&self.root, entry.path())?;
            let contents = read_script(entry.path())?;
            scripts.push(Script::new(name, contents));
        }

        sort_by_name(&mut scripts);
        Ok(scripts)
    }
}

impl ScriptSource for FileSystemScriptSource {
    fn scripts(&self) -> Result<Vec<Script>> {
        if !self.root.exists() {
            debug!("Script path does not exist: {}", self.root.display());
            return Ok(Vec::new());
        }

        let scripts = if self.root.is_file() {
            let name = self
                .root
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    MigrateError::Discovery(format!("Invalid script path: {}", self.root.display()))
                })?
                .to_string();
            vec![Script::new(name, read_script(&self.root)?)]
        } else {
            self.load_dir()?
        };

        debug!("Loaded {} scripts from {}", scripts.len(), self.root.display());
        Ok(scripts)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn exists(&self) -> bool {
        self.root.exists()
    }
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        MigrateError::Discovery(format!("{} is outside {}", path.display(), root.display()))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            MigrateError::Discovery(format!("Script path is not valid UTF-8: {}", path.display()))
        })?;
        parts.push(part);
    }

    Ok(parts.join("/"))
}

fn read_script(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        MigrateError::Discovery(format!("Failed to read script {}: {}", path.display(), e))
    })?;

    let text = String::from_utf8(bytes).map_err(|_| {
        MigrateError::Discovery(format!("Script is not valid UTF-8: {}", path.display()))
    })?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
