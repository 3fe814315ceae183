//! Built-in error pages.
//!
//! A small set of static pages wrapped in a shared layout. Used when no
//! template directory is configured.

use super::{RenderError, ViewRenderer};

const LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{ title }} - {{ project_name }}</title>
</head>
<body>
<h1>{{ title }}</h1>
{{ content }}
</body>
</html>
"#;

/// Template id of the shared layout. Not renderable on its own.
pub const LAYOUT_ID: &str = "layout.html";

/// Renders the embedded pages.
#[derive(Debug, Clone)]
pub struct BuiltinViews {
    project_name: String,
}

impl BuiltinViews {
    /// Built-in pages showing `project_name` in the title.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
        }
    }

    /// Template ids this renderer knows.
    pub fn template_ids() -> &'static [&'static str] {
        &["401.html", "404.html", "405.html", "generic.html"]
    }
}

fn page(template_id: &str) -> Option<(&'static str, &'static str)> {
    let page = match template_id {
        "401.html" => (
            "Unauthorized",
            "<p>You need to sign in to access this page.</p>",
        ),
        "404.html" => (
            "Page not found",
            "<p>The page you requested does not exist.</p>",
        ),
        "405.html" => (
            "Method not allowed",
            "<p>This page cannot be accessed this way.</p>",
        ),
        "generic.html" => (
            "Something went wrong",
            "<p>An error occurred while handling your request. We have been notified.</p>",
        ),
        _ => return None,
    };
    Some(page)
}

impl ViewRenderer for BuiltinViews {
    fn render(&self, template_id: &str) -> Result<String, RenderError> {
        let (title, content) =
            page(template_id).ok_or_else(|| RenderError::TemplateNotFound(template_id.to_owned()))?;

        Ok(LAYOUT
            .replace("{{ title }}", title)
            .replace("{{ content }}", content)
            .replace("{{ project_name }}", &html_escape(&self.project_name)))
    }
}

/// Escape HTML special characters.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
