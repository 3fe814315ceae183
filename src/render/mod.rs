//! Error page rendering.
//!
//! [`ResponseRenderer`] maps a status code to a view template through a
//! [`ViewMapping`] and renders it with a [`ViewRenderer`]. Rendering is a
//! two-branch result: [`ResponseRenderer::try_render`] reports failures,
//! [`ResponseRenderer::render`] turns any failure into [`fallback_response`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod builtin;
pub mod directory;

pub use builtin::BuiltinViews;
pub use directory::DirectoryViews;

/// Body of the response returned when the error page itself fails.
pub const FALLBACK_BODY: &str = "Internal error while handling your request";

/// Status of the response returned when the error page itself fails.
pub const FALLBACK_STATUS: u16 = 500;

/// Mapping key used when a status has no dedicated view.
pub const GENERIC_VIEW: &str = "generic";

/// An HTTP response produced for a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl Response {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The fixed response used when rendering fails.
pub fn fallback_response() -> Response {
    Response::new(FALLBACK_STATUS, FALLBACK_BODY)
}

/// Errors produced while rendering an error page.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Neither the status nor `generic` has a view.
    #[error("no view mapped for status {0} and no generic view configured")]
    NoView(u16),

    /// The view renderer has no such template.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template id is not acceptable to the renderer.
    #[error("invalid template id: {0}")]
    InvalidTemplateId(String),

    /// Reading a template failed.
    #[error("failed to read template {path}: {source}")]
    Io {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Any other renderer failure.
    #[error("template rendering failed: {0}")]
    Engine(String),
}

/// View rendering collaborator.
pub trait ViewRenderer: Send + Sync {
    /// Render the template identified by `template_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or cannot be rendered.
    fn render(&self, template_id: &str) -> Result<String, RenderError>;
}

/// Status code (as a string) or `generic` → template id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewMapping {
    views: BTreeMap<String, String>,
}

impl ViewMapping {
    /// An empty mapping.
    pub fn empty() -> Self {
        Self {
            views: BTreeMap::new(),
        }
    }

    /// Map `key` (a status code or `generic`) to `template_id`.
    pub fn insert(&mut self, key: impl Into<String>, template_id: impl Into<String>) {
        self.views.insert(key.into(), template_id.into());
    }

    /// Builder form of [`ViewMapping::insert`].
    pub fn with(mut self, key: impl Into<String>, template_id: impl Into<String>) -> Self {
        self.insert(key, template_id);
        self
    }

    /// Template for `status`, falling back to the generic view.
    pub fn template_for(&self, status: u16) -> Option<&str> {
        self.views
            .get(&status.to_string())
            .or_else(|| self.views.get(GENERIC_VIEW))
            .map(String::as_str)
    }

    /// Whether a generic fallback view is mapped.
    pub fn has_generic(&self) -> bool {
        self.views.contains_key(GENERIC_VIEW)
    }

    /// Iterate over `(key, template_id)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.views.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for ViewMapping {
    /// Views for 401, 404, 405 and a generic page.
    fn default() -> Self {
        Self::empty()
            .with("401", "401.html")
            .with("404", "404.html")
            .with("405", "405.html")
            .with(GENERIC_VIEW, "generic.html")
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ViewMapping {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, template_id) in iter {
            self.insert(key, template_id);
        }
    }
}

/// Produces error pages for status codes.
pub struct ResponseRenderer {
    views: ViewMapping,
    renderer: Box<dyn ViewRenderer>,
}

impl ResponseRenderer {
    /// Create a renderer over `views`, rendering with `renderer`.
    pub fn new(views: ViewMapping, renderer: Box<dyn ViewRenderer>) -> Self {
        Self { views, renderer }
    }

    /// The view mapping in use.
    pub fn views(&self) -> &ViewMapping {
        &self.views
    }

    /// Render the page for `status`, reporting failures.
    ///
    /// # Errors
    ///
    /// Returns an error if no view is mapped or the view fails to render.
    pub fn try_render(&self, status: u16) -> Result<Response, RenderError> {
        let template_id = self
            .views
            .template_for(status)
            .ok_or(RenderError::NoView(status))?;
        let body = self.renderer.render(template_id)?;
        Ok(Response::new(status, body))
    }

    /// Render the page for `status`, or the fixed fallback on any failure.
    pub fn render(&self, status: u16) -> Response {
        self.try_render(status).unwrap_or_else(|e| {
            warn!(status, error = %e, "error page rendering failed, using fallback");
            fallback_response()
        })
    }
}
