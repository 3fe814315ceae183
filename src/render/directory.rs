//! Templates loaded from a directory on disk.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{RenderError, ViewRenderer};

/// Serves `<root>/<template_id>` verbatim.
///
/// Template ids must be relative paths without `..`; anything that could
/// escape `root` is rejected.
#[derive(Debug, Clone)]
pub struct DirectoryViews {
    root: PathBuf,
}

impl DirectoryViews {
    /// Serve templates from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Template directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, template_id: &str) -> Result<PathBuf, RenderError> {
        let relative = Path::new(template_id);
        let is_plain = !template_id.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(RenderError::InvalidTemplateId(template_id.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}

impl ViewRenderer for DirectoryViews {
    fn render(&self, template_id: &str) -> Result<String, RenderError> {
        let path = self.resolve(template_id)?;
        std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => RenderError::TemplateNotFound(template_id.to_owned()),
            _ => RenderError::Io { path, source },
        })
    }
}
