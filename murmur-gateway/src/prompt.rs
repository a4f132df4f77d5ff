//! Prompt template loading and system-prompt composition.
//!
//! Prompt files are YAML documents with a `template` string and an
//! optional `input_variables` list. Chat templates embed the question
//! after a `#Question:` marker; only the portion before the marker is
//! used as the system instruction.

use murmur_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Marker separating the system instruction from the question section in
/// chat templates.
pub const QUESTION_MARKER: &str = "#Question:";

/// A parsed prompt template file.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub template: String,
    #[serde(default)]
    pub input_variables: Vec<String>,
}

/// Load a prompt template from a YAML file.
pub fn load_prompt(path: &Path) -> Result<PromptTemplate> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let template: PromptTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

/// Extract the base system instruction from a chat template.
///
/// Everything before the `#Question:` marker is the instruction. Templates
/// without the marker use the whole text with the `{question}` placeholder
/// removed.
pub fn base_system_prompt(template: &str) -> String {
    match template.split_once(QUESTION_MARKER) {
        Some((before, _)) => before.trim().to_string(),
        None => template.replace("{question}", "").trim().to_string(),
    }
}

/// Compose the final system prompt from the base instruction and an
/// optional role hint.
///
/// A non-blank hint appends a fixed role block; the composition is part of
/// the gateway's contract and must not be reformatted.
pub fn compose_system_prompt(base: &str, role_hint: &str) -> String {
    let hint = role_hint.trim();
    if hint.is_empty() {
        return base.to_string();
    }

    format!(
        "{}\n\nsystem role: {}\n위 역할에 맞게 전문적으로 대답해주세요.",
        base, hint
    )
}

/// Render a RAG prompt with retrieved context and the user question.
///
/// The template must declare both `context` and `question` input variables.
pub fn render_rag_prompt(prompt: &PromptTemplate, context: &str, question: &str) -> Result<String> {
    for required in ["context", "question"] {
        if !prompt.input_variables.iter().any(|v| v == required) {
            return Err(Error::validation(format!(
                "RAG prompt is missing the '{}' input variable",
                required
            )));
        }
    }

    Ok(prompt
        .template
        .replace("{context}", context)
        .replace("{question}", question))
}

/// List prompt files (`*.yaml`) under a directory, sorted.
///
/// Returns bare file names relative to the directory, so a listed value
/// can be passed back as a request's `prompt_file`. A missing directory
/// yields an empty list, matching an empty glob.
pub fn list_prompts(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut prompts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                prompts.push(name.to_string());
            }
        }
    }

    prompts.sort();
    Ok(prompts)
}
