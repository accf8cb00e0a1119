use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Leading front-matter block: `---`, a YAML body, `---`, anchored at the
/// start of the document.
static FRONT_MATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A---\r?\n(.*?)\r?\n---(?:\r?\n|\z)").expect("valid front matter regex")
});

const ILLEGAL_FILE_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMarkdown {
    pub is_valid: bool,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub content: String,
}

impl ParsedMarkdown {
    fn invalid(content: &str) -> Self {
        Self {
            is_valid: false,
            title: None,
            tags: None,
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrontMatter<'a> {
    title: &'a str,
    tags: &'a [String],
    exported_at: DateTime<Utc>,
}

/// Renders a note's editable fields as a markdown document with a YAML
/// front-matter header. `exportedAt` is informational and ignored on import.
pub fn note_to_markdown(title: &str, tags: &[String], content: &str) -> AppResult<String> {
    let front_matter = FrontMatter {
        title,
        tags,
        exported_at: Utc::now(),
    };
    let yaml = serde_yaml::to_string(&front_matter)?;
    Ok(format!("---\n{}---\n{}", yaml, content))
}

/// Extracts note fields from a markdown document.
///
/// Invalid outcomes are data, not errors: a document without front matter
/// (or with unparseable YAML) comes back with the whole input as content; a
/// parsed block without a usable title comes back with the body after the
/// closing delimiter. Deriving a fallback title is the caller's concern.
pub fn parse_front_matter(raw: &str) -> ParsedMarkdown {
    let Some(captures) = FRONT_MATTER_RE.captures(raw) else {
        return ParsedMarkdown::invalid(raw);
    };

    let yaml_body = captures.get(1).expect("front matter body group").as_str();
    let body_start = captures.get(0).expect("front matter match").end();
    let content = &raw[body_start..];

    let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(yaml_body) else {
        return ParsedMarkdown::invalid(raw);
    };
    let Some(mapping) = value.as_mapping() else {
        return ParsedMarkdown::invalid(content);
    };

    let title = mapping
        .get("title")
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|title| !title.is_empty());
    let Some(title) = title else {
        return ParsedMarkdown::invalid(content);
    };

    let tags = match mapping.get("tags") {
        // Sequence of strings; non-string entries are dropped.
        Some(serde_yaml::Value::Sequence(entries)) => entries
            .iter()
            .filter_map(|entry| entry.as_str())
            .map(|tag| tag.to_string())
            .collect(),
        // Single comma-separated string.
        Some(serde_yaml::Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| tag.to_string())
            .collect(),
        _ => Vec::new(),
    };

    ParsedMarkdown {
        is_valid: true,
        title: Some(title.to_string()),
        tags: Some(tags),
        content: content.to_string(),
    }
}

/// File name for an exported note: filesystem-illegal characters replaced
/// with `_`, `.md` appended when missing.
pub fn export_file_name(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|ch| {
            if ILLEGAL_FILE_NAME_CHARS.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect();

    if sanitized.to_lowercase().ends_with(".md") {
        sanitized
    } else {
        format!("{}.md", sanitized)
    }
}

pub fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            ext == "md" || ext == "markdown"
        })
        .unwrap_or(false)
}

pub fn read_markdown_file(path: &Path) -> AppResult<String> {
    fs::read_to_string(path).map_err(|err| AppError::Io(err.to_string()))
}

pub fn write_export_file(dir: &Path, title: &str, markdown: &str) -> AppResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|err| AppError::Io(err.to_string()))?;
    let path = dir.join(export_file_name(title));
    fs::write(&path, markdown).map_err(|err| AppError::Io(err.to_string()))?;
    Ok(path)
}
