use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Prose(String),
    Code { language: String, code: String },
}

/// Splits message text on fenced code blocks; prose between blocks is kept
/// verbatim minus surrounding blank lines.
pub fn segment(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;
    let mut current: Option<(String, String)> = None;

    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                if range.start > cursor {
                    push_prose(&mut segments, &text[cursor..range.start]);
                }
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                current = Some((language, String::new()));
            }
            Event::Text(chunk) => {
                if let Some((_, code)) = current.as_mut() {
                    code.push_str(&chunk);
                }
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some((language, code)) = current.take() {
                    segments.push(Segment::Code { language, code });
                }
                cursor = range.end;
            }
            _ => {}
        }
    }

    if cursor < text.len() {
        push_prose(&mut segments, &text[cursor..]);
    }
    segments
}

fn push_prose(segments: &mut Vec<Segment>, slice: &str) {
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::Prose(trimmed.to_string()));
    }
}

static EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("python", "py"),
        ("javascript", "js"),
        ("js", "js"),
        ("typescript", "ts"),
        ("rust", "rs"),
        ("java", "java"),
        ("c", "c"),
        ("cpp", "cpp"),
        ("c++", "cpp"),
        ("csharp", "cs"),
        ("go", "go"),
        ("ruby", "rb"),
        ("php", "php"),
        ("swift", "swift"),
        ("kotlin", "kt"),
        ("html", "html"),
        ("css", "css"),
        ("json", "json"),
        ("xml", "xml"),
        ("yaml", "yml"),
        ("yml", "yml"),
        ("toml", "toml"),
        ("sql", "sql"),
        ("bash", "sh"),
        ("sh", "sh"),
        ("shell", "sh"),
        ("markdown", "md"),
    ])
});

/// Download extension for a fence language, `txt` when unrecognized.
pub fn extension_for(language: &str) -> &'static str {
    EXTENSIONS
        .get(language.to_lowercase().as_str())
        .copied()
        .unwrap_or("txt")
}
