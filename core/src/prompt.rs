//! Prompt templates and tolerant JSON extraction.
//!
//! Templates are plain files with `{{KEY}}` placeholders; no other syntax
//! is interpreted. Values that originate from user-influenced text (issue
//! bodies, agent responses) pass through [`sanitize`] first: control
//! characters are stripped and fence markers are escaped so a hostile issue
//! body cannot break out of a prompt section.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("missing prompt template: {0}")]
    MissingTemplate(PathBuf),

    #[error("I/O error reading template: {0}")]
    Io(#[from] std::io::Error),
}

/// Why no JSON could be extracted from a response.
#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("no JSON object found in text")]
    NotFound,

    #[error("candidate JSON failed to parse: {0}")]
    Invalid(String),
}

/// Loads role templates from a prompts directory.
#[derive(Clone, Debug)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load `<dir>/<name>.md` and substitute the given variables.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let path = self.dir.join(format!("{name}.md"));
        if !path.exists() {
            return Err(PromptError::MissingTemplate(path));
        }
        let template = std::fs::read_to_string(&path)?;
        Ok(substitute(&template, vars))
    }
}

/// Replace every `{{KEY}}` with its value. Unknown keys are left alone.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Strip control characters (newlines and tabs survive) and escape
/// triple-backtick fences in user-influenced values.
pub fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    cleaned.replace("```", "`\u{200b}``")
}

/// Pull a JSON object out of free text.
///
/// Prefers a fenced ```json block; otherwise scans for the largest balanced
/// `{…}` that parses. Callers handle the error with an unstructured
/// fallback.
pub fn extract_json(text: &str) -> Result<serde_json::Value, JsonExtractError> {
    if let Some(candidate) = fenced_json_block(text)
        && let Ok(value) = serde_json::from_str(candidate)
    {
        return Ok(value);
    }

    let mut candidates = balanced_objects(text);
    if candidates.is_empty() {
        return Err(JsonExtractError::NotFound);
    }
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    let mut last_error = String::new();
    for candidate in candidates {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(JsonExtractError::Invalid(last_error))
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// All top-level balanced `{…}` spans, string-literal aware.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}
