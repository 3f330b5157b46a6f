use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Serialize, Serializer};

use crate::{Error, Result, VaultConfig};

/// A note path relative to the vault root, free of `.`/`..` and absolute parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultPath(PathBuf);

impl VaultPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Forward-slash form, independent of the host separator.
    pub fn as_str_lossy(&self) -> String {
        let parts: Vec<_> = self
            .0
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        parts.join("/")
    }

    pub fn file_name(&self) -> &str {
        self.0.file_name().and_then(|s| s.to_str()).unwrap_or("")
    }

    pub fn file_stem(&self) -> &str {
        self.0.file_stem().and_then(|s| s.to_str()).unwrap_or("")
    }

    /// Number of path components, the file name included.
    pub fn depth(&self) -> usize {
        self.0.components().count()
    }

    pub fn parent_dir(&self) -> Option<&Path> {
        self.0.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

impl Serialize for VaultPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str_lossy())
    }
}

impl TryFrom<&Path> for VaultPath {
    type Error = Error;

    fn try_from(value: &Path) -> Result<Self> {
        if value.as_os_str().is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }
        if value.is_absolute() {
            return Err(Error::InvalidPath("absolute paths are not allowed".into()));
        }

        let mut cleaned = PathBuf::new();
        for c in value.components() {
            match c {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::InvalidPath("absolute paths are not allowed".into()));
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::InvalidPath("path traversal is not allowed".into()));
                }
                Component::Normal(part) => cleaned.push(part),
            }
        }

        if cleaned.as_os_str().is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }

        Ok(Self(cleaned))
    }
}

/// Canonical note path for `raw`, without touching the filesystem.
///
/// Backslashes count as separators, `.` segments are dropped and `..` is
/// resolved lexically. Directory segments are lowercased when `lowercase_dirs`
/// is set; the file name keeps its case and gains `.md` unless it already
/// ends with it. Applying this to its own output is a no-op.
pub fn normalize_path(raw: &str, lowercase_dirs: bool) -> Result<VaultPath> {
    let unified = raw.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err(Error::InvalidPath("empty path".into()));
    }
    if unified.starts_with('/') {
        return Err(Error::InvalidPath(format!("absolute paths are not allowed: {raw}")));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::InvalidPath(format!("path escapes the vault: {raw}")));
                }
            }
            s => segments.push(s),
        }
    }

    if segments.first().is_some_and(|s| s.ends_with(':')) {
        return Err(Error::InvalidPath(format!("absolute paths are not allowed: {raw}")));
    }
    let Some((file, dirs)) = segments.split_last() else {
        return Err(Error::InvalidPath(format!("empty path: {raw:?}")));
    };

    let mut out = PathBuf::new();
    for dir in dirs {
        if lowercase_dirs {
            out.push(dir.to_lowercase());
        } else {
            out.push(dir);
        }
    }
    if file.to_lowercase().ends_with(".md") {
        out.push(file);
    } else {
        out.push(format!("{file}.md"));
    }

    Ok(VaultPath(out))
}

#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    cfg: VaultConfig,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root, VaultConfig::default())
    }

    /// Opens a vault, refusing roots that are missing or hold no notes.
    pub fn with_config(root: impl Into<PathBuf>, cfg: VaultConfig) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::VaultNotFound(root));
        }
        let root = std::fs::canonicalize(&root).map_err(|e| Error::io(&root, e))?;
        let vault = Self { root, cfg };
        if vault.note_paths()?.is_empty() {
            return Err(Error::EmptyVault(vault.root));
        }
        Ok(vault)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.cfg
    }

    pub fn to_abs(&self, rel: &VaultPath) -> PathBuf {
        self.root.join(rel.as_path())
    }

    /// Replaces an existing note through a hidden sibling temp file, so a
    /// failed write leaves the old contents in place.
    pub fn write_atomic(&self, rel: &VaultPath, contents: &[u8]) -> Result<()> {
        use std::io::Write;

        let path = self.to_abs(rel);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

        let written = std::fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        });
        if let Err(err) = written {
            let _ = std::fs::remove_file(&temp_path);
            tracing::warn!(path = %temp_path.display(), error = %err, "temp write failed");
            return Err(Error::io(&temp_path, err));
        }

        std::fs::rename(&temp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            tracing::warn!(from = %temp_path.display(), to = %path.display(), error = %e, "rename failed");
            Error::io(&path, e)
        })
    }

    pub fn to_rel(&self, abs: &Path) -> Result<VaultPath> {
        let abs = if abs.is_absolute() {
            abs.to_path_buf()
        } else {
            self.root.join(abs)
        };

        let abs = std::fs::canonicalize(&abs).unwrap_or(abs);
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| Error::InvalidPath(format!("outside vault: {}", abs.display())))?;
        VaultPath::try_from(rel)
    }

    /// Normalizes `raw` and rejects paths that traverse a symlink inside the vault.
    pub fn normalize(&self, raw: &str) -> Result<VaultPath> {
        let rel = normalize_path(raw, self.cfg.lowercase_directories)?;
        self.ensure_no_symlinks(&rel)?;
        Ok(rel)
    }

    pub(crate) fn ensure_no_symlinks(&self, rel: &VaultPath) -> Result<()> {
        let mut cur = self.root.clone();
        for comp in rel.as_path().components() {
            cur.push(comp);
            match std::fs::symlink_metadata(&cur) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(Error::InvalidPath(format!(
                        "symlink component in path: {rel}"
                    )));
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
                Err(err) => return Err(Error::io(&cur, err)),
            }
        }
        Ok(())
    }

    pub fn is_ignored_rel(&self, rel: &Path) -> bool {
        if rel.starts_with(&self.cfg.templates_dir) {
            return true;
        }
        rel.components().any(|c| {
            let Component::Normal(part) = c else {
                return false;
            };
            let s = part.to_string_lossy();
            self.cfg.ignore_dirs.iter().any(|d| d == &s)
        })
    }

    pub fn is_note_rel(&self, rel: &Path) -> bool {
        if rel.as_os_str().is_empty() || self.is_ignored_rel(rel) {
            return false;
        }
        let file_name = rel.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if file_name.starts_with('.') {
            return false;
        }
        rel.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
    }

    /// Every note in the vault, sorted by path.
    pub fn note_paths(&self) -> Result<Vec<VaultPath>> {
        let mut out = Vec::new();
        let walker = walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let Ok(rel) = e.path().strip_prefix(&self.root) else {
                    return false;
                };
                rel.as_os_str().is_empty() || !self.is_ignored_rel(rel)
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                Error::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !self.is_note_rel(rel) {
                continue;
            }
            out.push(VaultPath::try_from(rel)?);
        }

        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize_path(raw, true).unwrap().as_str_lossy()
    }

    #[test]
    fn directories_are_lowercased_and_filename_kept() {
        assert_eq!(norm("Archive/2025/Final"), "archive/2025/Final.md");
        assert_eq!(norm("Projects/Q1 Plan.md"), "projects/Q1 Plan.md");
        assert_eq!(norm("Welcome"), "Welcome.md");
        assert_eq!(norm("Notes\\Sub\\Idea.MD"), "notes/sub/Idea.MD");
    }

    #[test]
    fn dot_segments_resolve_lexically() {
        assert_eq!(norm("./a/./b/../Note"), "a/Note.md");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "Welcome",
            "Archive/2025/Final.md",
            "a/B/c/Déjà Vu",
            "x/../Y/Z",
            "Meeting 2025.01.03",
        ] {
            let once = normalize_path(raw, true).unwrap();
            let twice = normalize_path(&once.as_str_lossy(), true).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }

    #[test]
    fn escapes_and_empty_inputs_are_rejected() {
        for raw in ["", "   ", "../secret", "a/../../b", "/etc/passwd", "C:/x", "./"] {
            let err = normalize_path(raw, true).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{raw}");
        }
    }

    #[test]
    fn vault_refuses_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = Vault::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::EmptyVault(_)));

        let missing = dir.path().join("nope");
        assert!(matches!(
            Vault::open(&missing).unwrap_err(),
            Error::VaultNotFound(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vault");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(root.join("Home.md"), "hi").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let vault = Vault::open(&root).unwrap();
        let err = vault.normalize("link/Escape").unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(vault.normalize("plain/Fine").is_ok());
    }

    #[test]
    fn atomic_write_replaces_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Home.md"), "old").unwrap();
        std::fs::create_dir_all(dir.path().join("Folder.md")).unwrap();
        let vault = Vault::open(dir.path()).unwrap();

        let home = normalize_path("Home", true).unwrap();
        vault.write_atomic(&home, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(vault.to_abs(&home)).unwrap(), "new");

        let folder = normalize_path("Folder.md", true).unwrap();
        assert!(vault.write_atomic(&folder, b"x").is_err());
        assert!(vault.to_abs(&folder).is_dir());

        let leftovers: Vec<_> = std::fs::read_dir(vault.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn note_paths_skip_ignored_and_templates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".obsidian")).unwrap();
        std::fs::create_dir_all(root.join(".templates")).unwrap();
        std::fs::create_dir_all(root.join("notes")).unwrap();
        std::fs::write(root.join("notes/A.md"), "a").unwrap();
        std::fs::write(root.join("notes/pic.png"), "x").unwrap();
        std::fs::write(root.join(".obsidian/x.md"), "x").unwrap();
        std::fs::write(root.join(".templates/daily.md"), "x").unwrap();

        let vault = Vault::open(root).unwrap();
        let paths: Vec<_> = vault
            .note_paths()
            .unwrap()
            .iter()
            .map(VaultPath::as_str_lossy)
            .collect();
        assert_eq!(paths, vec!["notes/A.md"]);
    }
}
