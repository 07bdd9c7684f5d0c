//! Physical layout of a managed repository directory.
//!
//! ```text
//! <root>/
//!   emulsion.toml
//!   .system/
//!     staging/incoming/
//!     staging/failed/
//!     assets/thumbnails/{small,medium,large}/
//!     assets/videos/web/
//!     trash/
//!   inbox/
//! ```
//!
//! User-owned directories live alongside `inbox/` and `.system/` and are the
//! sole subject of the watcher and reconciliation scanner; both subtrees
//! this module owns must never be scanned.

use std::path::{Path, PathBuf};

use emulsion_model::ThumbnailSize;

#[derive(Clone, Debug)]
pub struct RepositoryLayout {
    root: PathBuf,
}

impl RepositoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn system_root(&self) -> PathBuf {
        self.root.join(".system")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.system_root().join("staging")
    }

    pub fn staging_incoming(&self) -> PathBuf {
        self.staging_root().join("incoming")
    }

    pub fn staging_failed(&self) -> PathBuf {
        self.staging_root().join("failed")
    }

    pub fn assets_root(&self) -> PathBuf {
        self.system_root().join("assets")
    }

    pub fn thumbnails_root(&self) -> PathBuf {
        self.assets_root().join("thumbnails")
    }

    pub fn thumbnails_dir(&self, size: ThumbnailSize) -> PathBuf {
        self.thumbnails_root().join(size.as_str())
    }

    pub fn videos_web_dir(&self) -> PathBuf {
        self.assets_root().join("videos").join("web")
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.system_root().join("trash")
    }

    pub fn inbox_root(&self) -> PathBuf {
        self.root.join("inbox")
    }

    /// Ensures every system subtree this layout owns exists.
    pub fn ensure_system_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.staging_incoming())?;
        std::fs::create_dir_all(self.staging_failed())?;
        for size in ThumbnailSize::ALL {
            std::fs::create_dir_all(self.thumbnails_dir(size))?;
        }
        std::fs::create_dir_all(self.videos_web_dir())?;
        std::fs::create_dir_all(self.trash_dir())?;
        std::fs::create_dir_all(self.inbox_root())?;
        Ok(())
    }

    /// True if `path` (absolute, or relative to the repository root) falls
    /// under `.system/` or `inbox/` — the two subtrees the watcher and
    /// reconciliation scanner must never observe. Shared by both so the
    /// "never scan our own subtrees" rule has exactly one implementation.
    pub fn is_protected(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut components = relative.components();
        match components.next() {
            Some(std::path::Component::Normal(first)) => first == ".system" || first == "inbox",
            _ => false,
        }
    }

    /// Relative path of `absolute` with respect to the repository root, for
    /// storing in file records / asset storage paths.
    pub fn relativize<'a>(&self, absolute: &'a Path) -> Option<&'a Path> {
        absolute.strip_prefix(&self.root).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protects_system_and_inbox_subtrees() {
        let layout = RepositoryLayout::new("/repo");
        assert!(layout.is_protected(Path::new("/repo/.system/staging/incoming/x.jpg")));
        assert!(layout.is_protected(Path::new("/repo/inbox/2024/07/x.jpg")));
        assert!(!layout.is_protected(Path::new("/repo/Vacation/img.jpg")));
    }

    #[test]
    fn thumbnail_dirs_are_size_scoped() {
        let layout = RepositoryLayout::new("/repo");
        assert_eq!(
            layout.thumbnails_dir(ThumbnailSize::Small),
            PathBuf::from("/repo/.system/assets/thumbnails/small")
        );
    }
}
