//! Page renderer
//!
//! Server-rendered HTML for the auth flows and the chat shell, using Tera.
//! Templates are embedded in the binary from `templates/`.

use rust_embed::RustEmbed;
use serde::Serialize;
use std::error::Error as StdError;
use tera::{Context as TeraContext, Tera};

use crate::models::User;
use crate::services::auth_forms::{FormOutcome, Notification};

mod error;

pub use error::PageError;

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct PageTemplates;

/// Variables every page gets
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageVars {
    /// Current request path
    pub request_path: String,
    /// Signed-in user, if known
    pub current_user: Option<PageUser>,
    /// Notification to show once
    pub notification: Option<Notification>,
    /// Inline form error
    pub error: Option<String>,
}

impl PageVars {
    pub fn new(request_path: impl Into<String>) -> Self {
        Self {
            request_path: request_path.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: Option<&User>) -> Self {
        self.current_user = user.map(PageUser::from);
        self
    }

    /// Carry a form outcome's error and notification
    pub fn with_outcome(mut self, outcome: &FormOutcome) -> Self {
        self.error = outcome.error.clone();
        self.notification = outcome.notification.clone();
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }
}

/// User fields templates may show
#[derive(Debug, Clone, Serialize)]
pub struct PageUser {
    pub id: String,
    pub display_name: String,
}

impl From<&User> for PageUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name().to_string(),
        }
    }
}

/// Page renderer over the embedded templates
pub struct PageRenderer {
    tera: Tera,
}

impl PageRenderer {
    /// Load every embedded template
    pub fn new() -> Result<Self, PageError> {
        let mut templates: Vec<(String, String)> = Vec::new();
        for name in PageTemplates::iter() {
            let file = PageTemplates::get(&name)
                .ok_or_else(|| PageError::NotFound(name.to_string()))?;
            let content = String::from_utf8_lossy(&file.data).into_owned();
            templates.push((name.to_string(), content));
        }
        Self::from_templates(templates)
    }

    /// Build from raw `(name, source)` pairs
    pub fn from_templates(mut templates: Vec<(String, String)>) -> Result<Self, PageError> {
        // Layout first so children can extend it
        templates.sort_by(|a, b| {
            let a_is_layout = a.0 == "layout.html";
            let b_is_layout = b.0 == "layout.html";
            b_is_layout.cmp(&a_is_layout)
        });

        let mut tera = Tera::default();
        for (name, content) in templates {
            tera.add_raw_template(&name, &content)
                .map_err(|e| PageError::TemplateError(format!("Failed to add template {}: {}", name, e)))?;
        }
        tera.build_inheritance_chains()
            .map_err(|e| PageError::TemplateError(format!("Failed to build template inheritance: {}", e)))?;

        tracing::debug!("Loaded {} page templates", tera.get_template_names().count());
        Ok(Self { tera })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// Render a template with its page variables
    pub fn render(&self, template: &str, vars: &PageVars, extra: &TeraContext) -> Result<String, PageError> {
        if !self.has_template(template) {
            return Err(PageError::NotFound(template.to_string()));
        }
        let mut context = TeraContext::from_serialize(vars)
            .map_err(|e| PageError::TemplateError(e.to_string()))?;
        context.extend(extra.clone());

        self.tera.render(template, &context).map_err(|e| {
            let mut error_msg = format!("Failed to render '{}': {}", template, e);
            let mut source = e.source();
            while let Some(s) = source {
                error_msg.push_str(&format!("\n  Caused by: {}", s));
                source = s.source();
            }
            PageError::TemplateError(error_msg)
        })
    }

    /// Render, falling back to the error template and then to plain HTML
    pub fn render_with_fallback(&self, template: &str, vars: &PageVars, extra: &TeraContext) -> String {
        match self.render(template, vars, extra) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to render page '{}': {}, trying error template", template, e);

                let mut error_context = TeraContext::new();
                error_context.insert("message", "Something went wrong");
                match self.render("error.html", vars, &error_context) {
                    Ok(html) => html,
                    Err(error_template_err) => {
                        tracing::error!("Failed to render error template: {}", error_template_err);
                        simple_error_page("Something went wrong")
                    }
                }
            }
        }
    }
}

/// Last-resort error page
fn simple_error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Error</title></head>
<body><h1>Error</h1><p>{}</p><p><a href="/">Return home</a></p></body>
</html>"#,
        tera::escape_html(message)
    )
}
