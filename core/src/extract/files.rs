use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Created,
    Modified,
    Deleted,
}

/// A file-change record recovered heuristically from free-form output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    pub filename: String,
    pub language: String,
    pub content: String,
    pub operation: FileOperation,
}

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"^```([^`]*)$").unwrap();
    static ref FILENAME_SHAPE: Regex = Regex::new(r"^[\w./\\-]+\.\w{1,8}$").unwrap();
    static ref FILENAME_ANNOTATION: Regex =
        Regex::new(r"(?:filename=|file:)\s*([\w./\\-]+\.\w{1,8})").unwrap();
}

const LABEL_PREFIXES: &[&str] = &[
    "file:", "filename:", "path:", "created:", "modified:", "updated:", "deleted:", "new file:",
];

const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("sh", "bash"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("md", "markdown"),
    ("txt", "text"),
];

/// Recover file entries from output. A filename line immediately preceding
/// a fenced code block is the primary signal; fences whose info string is
/// itself a filename (or carries a `filename=`/`file:` annotation) are the
/// fallback, used only when the primary pass found nothing.
pub fn extract_code_files(output: &str) -> Vec<CodeFile> {
    let lines: Vec<&str> = output.lines().collect();
    let mut files = named_line_pass(&lines, output);
    if files.is_empty() {
        files = info_string_pass(&lines, output);
    }
    files
}

fn named_line_pass(lines: &[&str], output: &str) -> Vec<CodeFile> {
    let mut files = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if let Some(filename) = candidate_filename(lines[i]) {
            if i + 1 < lines.len() && FENCE_OPEN.is_match(lines[i + 1].trim_end()) {
                if let Some((content, next)) = fenced_content(lines, i + 1) {
                    let language = language_for(&filename);
                    files.push(CodeFile {
                        operation: classify_operation(&filename, output),
                        filename,
                        language,
                        content,
                    });
                    i = next;
                    continue;
                }
            }
        }
        i += 1;
    }
    files
}

fn info_string_pass(lines: &[&str], output: &str) -> Vec<CodeFile> {
    let mut files = Vec::new();
    let mut synthesized = 0usize;
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_end();
        if let Some(caps) = FENCE_OPEN.captures(trimmed) {
            let info = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let first_token = info.split_whitespace().next().unwrap_or("");
            let annotated = FILENAME_ANNOTATION
                .captures(trimmed)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            let named = annotated.or_else(|| {
                if FILENAME_SHAPE.is_match(first_token) && info == first_token {
                    Some(first_token.to_string())
                } else {
                    None
                }
            });
            if let Some((content, next)) = fenced_content(lines, i) {
                let (filename, language) = match named {
                    Some(name) => {
                        let name = normalize_filename(&name);
                        let language = language_for(&name);
                        (name, language)
                    }
                    None if !first_token.is_empty() => {
                        synthesized += 1;
                        let ext = extension_for_language(first_token);
                        (
                            format!("generated_{synthesized}.{ext}"),
                            first_token.to_string(),
                        )
                    }
                    None => {
                        i = next;
                        continue;
                    }
                };
                files.push(CodeFile {
                    operation: classify_operation(&filename, output),
                    filename,
                    language,
                    content,
                });
                i = next;
                continue;
            }
        }
        i += 1;
    }
    files
}

/// Returns the block content and the index just past the closing fence.
fn fenced_content(lines: &[&str], fence_idx: usize) -> Option<(String, usize)> {
    let mut content = Vec::new();
    for (offset, line) in lines.iter().enumerate().skip(fence_idx + 1) {
        if line.trim_end() == "```" {
            return Some((content.join("\n"), offset + 1));
        }
        content.push(*line);
    }
    None
}

fn candidate_filename(line: &str) -> Option<String> {
    let normalized = normalize_filename(line);
    if normalized.is_empty() || normalized.contains(' ') {
        return None;
    }
    if FILENAME_SHAPE.is_match(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

/// Clean a candidate name: label prefixes, quote marks, leading `./`,
/// markdown emphasis.
fn normalize_filename(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    let lower = s.to_lowercase();
    for prefix in LABEL_PREFIXES {
        if lower.starts_with(prefix) {
            s = s[prefix.len()..].trim().to_string();
            break;
        }
    }
    s = s
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*' | '#'))
        .trim()
        .to_string();
    if let Some(stripped) = s.strip_prefix("./") {
        s = stripped.to_string();
    }
    s
}

fn language_for(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    for (known, language) in EXTENSION_LANGUAGES {
        if *known == ext {
            return (*language).to_string();
        }
    }
    if ext.is_empty() {
        "text".to_string()
    } else {
        ext
    }
}

fn extension_for_language(language: &str) -> String {
    let lower = language.to_lowercase();
    for (ext, known) in EXTENSION_LANGUAGES {
        if *known == lower {
            return (*ext).to_string();
        }
    }
    "txt".to_string()
}

/// Classify by proximity keyword search for the filename elsewhere in the
/// output; defaults to Created.
fn classify_operation(filename: &str, output: &str) -> FileOperation {
    let lower = output.to_lowercase();
    let name = filename.to_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&name) {
        let idx = search_from + rel;
        let window_start = idx.saturating_sub(64);
        let window = &lower[window_start..idx];
        if window.contains("delet") || window.contains("remov") {
            return FileOperation::Deleted;
        }
        if window.contains("modif") || window.contains("updat") || window.contains("edit")
            || window.contains("chang")
        {
            return FileOperation::Modified;
        }
        search_from = idx + name.len();
    }
    FileOperation::Created
}
