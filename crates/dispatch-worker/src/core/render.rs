//! Email body rendering with a total fallback chain.
//!
//! For a template id the renderer tries, in order, the compiled-in template
//! pair, the same pair in the configured template directory, the built-in
//! `default` pair (only for ids that are not built in), and finally a
//! synthesized greeting. Each step only fills the parts still missing, so the
//! result always carries a non-empty text and html body.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TEMPLATE_ID: &str = "default";

const BUILTIN_IDS: [&str; 2] = ["welcome", DEFAULT_TEMPLATE_ID];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Error)]
enum RenderError {
    #[error("template not found")]
    NotFound,
    #[error("template rendered empty")]
    Blank,
    #[error("template read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("template render failed: {0}")]
    Engine(#[from] minijinja::Error),
}

#[derive(Debug, Clone, Copy)]
enum Part {
    Text,
    Html,
}

impl Part {
    fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Html => "html",
        }
    }
}

#[derive(Default)]
struct Parts {
    text: Option<String>,
    html: Option<String>,
}

impl Parts {
    fn is_complete(&self) -> bool {
        self.text.is_some() && self.html.is_some()
    }

    fn fill(&mut self, part: Part, mut render: impl FnMut(Part) -> Option<String>) {
        let slot = match part {
            Part::Text => &mut self.text,
            Part::Html => &mut self.html,
        };
        if slot.is_none() {
            *slot = render(part);
        }
    }
}

pub struct TemplateRenderer {
    env: Environment<'static>,
    template_dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env, template_dir }
    }

    /// Never fails: a missing id resolves as `default`, and anything the
    /// template chain cannot produce is synthesized.
    pub fn render(
        &self,
        template_id: Option<&str>,
        variables: &Map<String, Value>,
    ) -> RenderedMessage {
        let template_id = template_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_TEMPLATE_ID);

        // A null variable counts as absent, in templates and synthetic bodies.
        let variables: Map<String, Value> = variables
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let parts = self.resolve(template_id, &variables);
        RenderedMessage {
            text: parts.text.unwrap_or_else(|| synthesize_text(&variables)),
            html: parts.html.unwrap_or_else(|| synthesize_html(&variables)),
        }
    }

    fn resolve(&self, template_id: &str, variables: &Map<String, Value>) -> Parts {
        let mut parts = Parts::default();

        for part in [Part::Text, Part::Html] {
            parts.fill(part, |part| {
                self.attempt(template_id, part, "builtin", || {
                    self.render_builtin(template_id, part, variables)
                })
            });
        }
        if parts.is_complete() {
            return parts;
        }

        if let Some(dir) = &self.template_dir {
            for part in [Part::Text, Part::Html] {
                parts.fill(part, |part| {
                    self.attempt(template_id, part, "filesystem", || {
                        self.render_file(dir, template_id, part, variables)
                    })
                });
            }
            if parts.is_complete() {
                return parts;
            }
        }

        if !BUILTIN_IDS.contains(&template_id) {
            debug!("template falling back to default: template_id={template_id}");
            let fallback = self.resolve(DEFAULT_TEMPLATE_ID, variables);
            if parts.text.is_none() {
                parts.text = fallback.text;
            }
            if parts.html.is_none() {
                parts.html = fallback.html;
            }
        }

        parts
    }

    fn attempt(
        &self,
        template_id: &str,
        part: Part,
        source: &str,
        render: impl FnOnce() -> Result<String, RenderError>,
    ) -> Option<String> {
        match render() {
            Ok(body) => Some(body),
            Err(RenderError::NotFound) => None,
            Err(err) => {
                warn!(
                    "template attempt failed: template_id={}, part={}, source={}, error={}",
                    template_id,
                    part.extension(),
                    source,
                    err
                );
                None
            }
        }
    }

    fn render_builtin(
        &self,
        template_id: &str,
        part: Part,
        variables: &Map<String, Value>,
    ) -> Result<String, RenderError> {
        let name = format!("{template_id}.{}", part.extension());
        let source = builtin_source(&name).ok_or(RenderError::NotFound)?;
        self.render_source(&name, source, variables)
    }

    fn render_file(
        &self,
        dir: &Path,
        template_id: &str,
        part: Part,
        variables: &Map<String, Value>,
    ) -> Result<String, RenderError> {
        if !is_safe_template_id(template_id) {
            return Err(RenderError::NotFound);
        }

        let name = format!("{template_id}.{}", part.extension());
        let path = dir.join(&name);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        self.render_source(&name, &source, variables)
    }

    // The `.html` suffix on `name` turns on html auto-escaping.
    fn render_source(
        &self,
        name: &str,
        source: &str,
        variables: &Map<String, Value>,
    ) -> Result<String, RenderError> {
        let rendered = self.env.render_named_str(name, source, variables)?;
        if rendered.trim().is_empty() {
            return Err(RenderError::Blank);
        }
        Ok(rendered)
    }
}

fn builtin_source(name: &str) -> Option<&'static str> {
    match name {
        "welcome.txt" => Some(include_str!("../../templates/welcome.txt")),
        "welcome.html" => Some(include_str!("../../templates/welcome.html")),
        "default.txt" => Some(include_str!("../../templates/default.txt")),
        "default.html" => Some(include_str!("../../templates/default.html")),
        _ => None,
    }
}

/// Ids that could escape the template directory are never read from disk.
fn is_safe_template_id(template_id: &str) -> bool {
    !template_id.starts_with('.')
        && !template_id.contains("..")
        && !template_id.contains(['/', '\\'])
}

fn display_variable(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn greeting_name(variables: &Map<String, Value>) -> String {
    variables
        .get("name")
        .filter(|value| !value.is_null())
        .map(display_variable)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "User".to_string())
}

fn verification_code(variables: &Map<String, Value>) -> Option<String> {
    variables
        .get("verification_code")
        .filter(|value| !value.is_null())
        .map(display_variable)
}

fn synthesize_text(variables: &Map<String, Value>) -> String {
    let mut body = format!(
        "Hello {},\n\nThank you for using our notification service.\n",
        greeting_name(variables)
    );
    if let Some(code) = verification_code(variables) {
        body.push_str(&format!("\nYour verification code: {code}\n"));
    }
    body
}

fn synthesize_html(variables: &Map<String, Value>) -> String {
    let mut body = format!(
        "<html>\n<body>\n<h2>Hello {},</h2>\n<p>Thank you for using our notification service.</p>\n",
        escape_html(&greeting_name(variables))
    );
    if let Some(code) = verification_code(variables) {
        body.push_str(&format!(
            "<p><strong>Your verification code: {}</strong></p>\n",
            escape_html(&code)
        ));
    }
    body.push_str("</body>\n</html>\n");
    body
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
