//! Read-only file sources for migration scripts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use txscope_common::Result;

/// A read-only hierarchical file source.
///
/// Paths are `/`-separated and relative to the source root.
pub trait MigrationSource {
    /// Names of the files directly inside `dir` (not their full paths).
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Contents of the file at `path`.
    fn read(&self, path: &str) -> Result<String>;
}

/// Join a directory and a file name the way sources expect.
pub(crate) fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// File name of `path` if it sits directly inside `dir`.
fn child_of<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let dir = dir.trim_matches('/');
    let rest = if dir.is_empty() || dir == "." {
        path
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

fn not_found(path: &str) -> txscope_common::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("migration file not found: {path}"),
    )
    .into()
}

/// Files on disk under a root directory.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MigrationSource for DirSource {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.root.join(dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.root.join(path))?)
    }
}

/// Files held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a file.
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl MigrationSource for MemorySource {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter_map(|path| child_of(path, dir))
            .map(str::to_string)
            .collect())
    }

    fn read(&self, path: &str) -> Result<String> {
        self.files.get(path).cloned().ok_or_else(|| not_found(path))
    }
}

/// Files compiled into the binary, typically with `include_str!`.
///
/// ```
/// use txscope_db::migrations::{EmbeddedSource, MigrationSource};
///
/// static FILES: &[(&str, &str)] = &[
///     ("migration/00001_init.sql", "-- +goose Up\nCREATE TABLE t (id INTEGER);\n"),
/// ];
///
/// let source = EmbeddedSource::new(FILES);
/// assert_eq!(source.list("migration").unwrap(), vec!["00001_init.sql"]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    files: &'static [(&'static str, &'static str)],
}

impl EmbeddedSource {
    pub const fn new(files: &'static [(&'static str, &'static str)]) -> Self {
        Self { files }
    }
}

impl MigrationSource for EmbeddedSource {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter_map(|(path, _)| child_of(path, dir))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &str) -> Result<String> {
        self.files
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, contents)| contents.to_string())
            .ok_or_else(|| not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_of() {
        assert_eq!(child_of("migration/001_a.sql", "migration"), Some("001_a.sql"));
        assert_eq!(child_of("migration/001_a.sql", "migration/"), Some("001_a.sql"));
        assert_eq!(child_of("migration/nested/001_a.sql", "migration"), None);
        assert_eq!(child_of("migrations/001_a.sql", "migration"), None);
        assert_eq!(child_of("001_a.sql", ""), Some("001_a.sql"));
        assert_eq!(child_of("001_a.sql", "."), Some("001_a.sql"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("migration", "001_a.sql"), "migration/001_a.sql");
        assert_eq!(join("migration/", "001_a.sql"), "migration/001_a.sql");
        assert_eq!(join("", "001_a.sql"), "001_a.sql");
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new()
            .with_file("migration/00002_b.sql", "b")
            .with_file("migration/00001_a.sql", "a")
            .with_file("other/00001_x.sql", "x");

        assert_eq!(
            source.list("migration").unwrap(),
            vec!["00001_a.sql", "00002_b.sql"]
        );
        assert_eq!(source.read("migration/00002_b.sql").unwrap(), "b");
        assert!(source.read("migration/missing.sql").is_err());
    }

    #[test]
    fn test_dir_source() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migration");
        std::fs::create_dir(&migrations).unwrap();
        std::fs::write(migrations.join("00001_a.sql"), "a").unwrap();
        std::fs::create_dir(migrations.join("nested")).unwrap();

        let source = DirSource::new(dir.path());
        assert_eq!(source.list("migration").unwrap(), vec!["00001_a.sql"]);
        assert_eq!(source.read("migration/00001_a.sql").unwrap(), "a");
        assert!(source.list("missing").is_err());
    }
}
