// EN: src/core/conversation.rs

//! Reads LM Studio conversation files and turns them into producer tuples:
//! a stable message id, the message text and the conversation's sandbox directory.

use crate::constants::EXECUTABLE_ROLES;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

lazy_static! {
    static ref THINK_REGEX: Regex =
        Regex::new(r"(?is)<think>.*?</think>").expect("Invalid regex for think blocks");
    /// LM Studio names a conversation `<epoch millis>.conversation` until it gets a title.
    static ref TEMP_NAME_REGEX: Regex =
        Regex::new(r"^\d{10,}\.conversation$").expect("Invalid regex for temporary names");
}

/// Errors from reading LM Studio conversation files.
#[derive(Error, Debug)]
pub enum ConversationError {
    /// The file could not be read.
    #[error("Could not read conversation '{path}': {source}")]
    Read {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON.
    #[error("Conversation '{path}' is not valid JSON: {source}")]
    Json {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The JSON has no `messages` array.
    #[error("Conversation '{path}' has no 'messages' list.")]
    NoMessages {
        /// Path the error is about.
        path: String,
    },
    /// The sandbox directory could not be created or renamed.
    #[error("Could not prepare workspace directory '{path}': {source}")]
    Workspace {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// One message as it appears in the conversation file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    /// Position in the `messages` list.
    pub index: usize,
    /// Lower-cased role (`assistant`, `user`, ...).
    pub role: String,
    /// Visible text, with thinking removed.
    pub text: String,
}

impl ConversationMessage {
    /// Whether commands in this message may be executed.
    pub fn is_executable(&self) -> bool {
        EXECUTABLE_ROLES.contains(&self.role.as_str())
    }
}

/// A parsed conversation file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// `name`, else `title`, else the file stem.
    pub name: String,
    /// Messages in file order.
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    /// Reads and parses a conversation file.
    pub fn load(path: &Path) -> Result<Self, ConversationError> {
        let text = fs::read_to_string(path).map_err(|e| ConversationError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&text, path)
    }

    /// Parses conversation JSON. `path` supplies the fallback name and error context.
    pub fn parse(json: &str, path: &Path) -> Result<Self, ConversationError> {
        let data: Value = serde_json::from_str(json).map_err(|e| ConversationError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        let messages = data
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| ConversationError::NoMessages {
                path: path.display().to_string(),
            })?;

        let stem = file_stem(path);
        let name = ["name", "title"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(stem.as_str())
            .to_string();

        let messages = messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let (role, text) = extract_message(message);
                ConversationMessage { index, role, text }
            })
            .collect();
        Ok(Self { name, messages })
    }
}

/// `<file stem>#<index>`: stable across edits of the same message.
pub fn message_id(path: &Path, index: usize) -> String {
    format!("{}#{}", file_stem(path), index)
}

/// Whether `name` is LM Studio's placeholder for an untitled conversation.
pub fn is_temp_name(name: &str) -> bool {
    TEMP_NAME_REGEX.is_match(name.trim())
}

/// Removes `<think>...</think>` spans (any case, across lines).
pub fn strip_think(text: &str) -> String {
    THINK_REGEX.replace_all(text, "").into_owned()
}

/// Picks (and creates) `<workspace>/<conversation name>`.
///
/// While the conversation only has a temporary name, its files live under the file
/// stem. When a real name appears, that stem directory is renamed to the final name
/// once, so a conversation never ends up split across two directories.
pub fn conversation_dir(
    workspace: &Path,
    conversation_path: &Path,
    name: &str,
) -> Result<PathBuf, ConversationError> {
    let temp_dir = workspace.join(sanitize_dir_name(&file_stem(conversation_path)));
    let final_dir = workspace.join(sanitize_dir_name(name));
    let workspace_err = |path: &Path| {
        let path = path.display().to_string();
        move |source: std::io::Error| ConversationError::Workspace { path, source }
    };

    if final_dir.is_dir() {
        return Ok(final_dir);
    }
    if is_temp_name(name) {
        fs::create_dir_all(&temp_dir).map_err(workspace_err(&temp_dir))?;
        return Ok(temp_dir);
    }
    if temp_dir.is_dir() {
        match fs::rename(&temp_dir, &final_dir) {
            Ok(()) => {
                log::info!(
                    "Conversation renamed: {} -> {}",
                    temp_dir.display(),
                    final_dir.display()
                );
                return Ok(final_dir);
            }
            Err(e) => {
                log::warn!("Could not rename '{}': {}", temp_dir.display(), e);
                return Ok(temp_dir);
            }
        }
    }
    fs::create_dir_all(&final_dir).map_err(workspace_err(&final_dir))?;
    Ok(final_dir)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conversation".to_string())
}

/// Makes a conversation title usable as a single directory name.
fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "conversation".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Role and visible text of one entry of `messages`.
fn extract_message(message: &Value) -> (String, String) {
    let versions = message
        .get("versions")
        .and_then(Value::as_array)
        .filter(|v| !v.is_empty());

    let Some(versions) = versions else {
        let role = ["role", "author"]
            .iter()
            .find_map(|k| message.get(*k).and_then(Value::as_str))
            .unwrap_or_default();
        let content = message.get("content").or_else(|| message.get("text"));
        let text = content.map(content_text).unwrap_or_default();
        return (role.to_lowercase(), strip_think(&text).trim().to_string());
    };

    let selected = message
        .get("currentlySelected")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| versions.get(i))
        .or_else(|| versions.last());
    match selected {
        Some(version) => {
            let role = version
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            (role, version_text(version))
        }
        None => (String::new(), String::new()),
    }
}

/// Text of a message version: its non-thinking steps, else `content`, else `text`.
fn version_text(version: &Value) -> String {
    let steps: Vec<String> = version
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter(|step| {
                    !step
                        .pointer("/style/type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.eq_ignore_ascii_case("thinking"))
                })
                .filter_map(|step| step.get("content").map(content_text))
                .map(|text| strip_think(&text).trim().to_string())
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if !steps.is_empty() {
        return steps.join("\n\n");
    }

    let text = version
        .get("content")
        .map(content_text)
        .filter(|t| !t.is_empty())
        .or_else(|| version.get("text").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    strip_think(&text).trim().to_string()
}

/// Flattens a `content` value: a string, a `{text}` object, or a list of either.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => ["text", "content"]
                    .iter()
                    .find_map(|k| other.get(*k).and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => content
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}
