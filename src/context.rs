//! Resolution of file references relative to a project file.

use std::path::{Component, Path, PathBuf};

/// Separator of the alternatives in a stored file list.
pub const FILE_LIST_SEPARATOR: &str = ";";

/// Location of the current project. Relative file references are resolved
/// against its directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    pub project_file: Option<PathBuf>,
}

impl ProjectContext {
    pub fn new<P: Into<PathBuf>>(project_file: P) -> Self {
        Self {
            project_file: Some(project_file.into()),
        }
    }

    /// Directory of the project file, or the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.project_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default()
    }

    /// First entry of a `;` separated list that exists, tried as given,
    /// trimmed and relative to the project directory.
    pub fn existing_file(&self, list: &str) -> Option<PathBuf> {
        let base = self.base_dir();

        list.split(FILE_LIST_SEPARATOR)
            .filter(|s| !s.is_empty())
            .find_map(|entry| {
                let trimmed = entry.trim();
                [
                    PathBuf::from(entry),
                    PathBuf::from(trimmed),
                    base.join(trimmed),
                ]
                .into_iter()
                .find(|p| p.exists())
            })
    }

    /// List of alternatives to store for `file`: the name as given, its
    /// absolute path and its path relative to the project directory.
    pub fn file_list<P: AsRef<Path>>(&self, file: P) -> String {
        let file = file.as_ref();
        let base = absolute(&self.base_dir());
        let abs = absolute(file);
        let rel = relative_to(&abs, &base);

        let mut entries = vec![file.to_path_buf()];
        if file.is_relative() {
            entries.push(abs);
            if rel.as_path() != file {
                entries.push(rel);
            }
        } else {
            entries.push(rel);
        }

        entries
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(FILE_LIST_SEPARATOR)
    }
}

fn absolute(p: &Path) -> PathBuf {
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(p)
    };

    let mut out = PathBuf::new();
    for c in joined.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }

    out
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let a: Vec<_> = path.components().collect();
    let b: Vec<_> = base.components().collect();
    let common = a.iter().zip(&b).take_while(|(x, y)| x == y).count();

    let mut out = PathBuf::new();
    for _ in common..b.len() {
        out.push("..");
    }
    for c in &a[common..] {
        out.push(c);
    }

    out
}
