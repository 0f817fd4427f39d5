//! Mail body rendering.
//!
//! Two templates are rendered per mail, `notification-mail.txt` and
//! `notification-mail.html`, with the variables `studyName` and
//! `screeningListUrl`. Built-in templates are compiled into the binary and
//! can be replaced by files of the same name in a template directory.

use std::path::Path;

use minijinja::{Environment, UndefinedBehavior, context};

use crate::mail::{MailError, NotifyInfo};

pub const TEXT_TEMPLATE: &str = "notification-mail.txt";
pub const HTML_TEMPLATE: &str = "notification-mail.html";

const BUILTIN_TEXT: &str = include_str!("../templates/notification-mail.txt");
const BUILTIN_HTML: &str = include_str!("../templates/notification-mail.html");

/// Rendered plain-text and HTML bodies of one mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    text: String,
    html: String,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self {
            text: BUILTIN_TEXT.to_string(),
            html: BUILTIN_HTML.to_string(),
        }
    }
}

impl TemplateRenderer {
    pub fn new(text: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: html.into(),
        }
    }

    /// Load templates from `dir`, falling back to the built-in ones for
    /// files that do not exist.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, MailError> {
        let dir = dir.as_ref();
        let builtin = Self::default();

        let load = |name: &str, fallback: String| -> Result<String, MailError> {
            let path = dir.join(name);
            if !path.exists() {
                tracing::info!(template = name, "Using built-in mail template");
                return Ok(fallback);
            }
            std::fs::read_to_string(&path).map_err(|e| {
                MailError::RenderFailed(format!("cannot read {}: {}", path.display(), e))
            })
        };

        let renderer = Self {
            text: load(TEXT_TEMPLATE, builtin.text)?,
            html: load(HTML_TEMPLATE, builtin.html)?,
        };
        renderer.check()?;
        Ok(renderer)
    }

    /// Render both templates once with sample values to surface syntax errors early.
    pub fn check(&self) -> Result<(), MailError> {
        self.render(&NotifyInfo {
            study_acronym: "CHECK".to_string(),
            screening_list_link: "http://localhost/".to_string(),
        })
        .map(|_| ())
    }

    pub fn render(&self, info: &NotifyInfo) -> Result<RenderedMail, MailError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let ctx = context! {
            studyName => info.study_acronym.as_str(),
            screeningListUrl => info.screening_list_link.as_str(),
        };

        let text = env
            .template_from_named_str(TEXT_TEMPLATE, &self.text)
            .and_then(|t| t.render(&ctx))
            .map_err(render_error)?;
        // The `.html` name enables auto-escaping.
        let html = env
            .template_from_named_str(HTML_TEMPLATE, &self.html)
            .and_then(|t| t.render(&ctx))
            .map_err(render_error)?;

        Ok(RenderedMail { text, html })
    }
}

fn render_error(err: minijinja::Error) -> MailError {
    MailError::RenderFailed(err.to_string())
}
