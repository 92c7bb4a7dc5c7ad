use chrono::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Gemini,
}

impl Sender {
    pub fn tag(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub sender: Sender,
    pub text: String,
    pub image: Option<GeneratedImage>,
    pub sources: Vec<SourceLink>,
    pub files: Vec<String>,
}

impl Turn {
    pub fn user(text: String, files: Vec<String>) -> Self {
        Turn {
            sender: Sender::User,
            text,
            image: None,
            sources: Vec::new(),
            files,
        }
    }

    pub fn gemini(text: String) -> Self {
        Turn {
            sender: Sender::Gemini,
            text,
            image: None,
            sources: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceLink>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_image(mut self, image: GeneratedImage) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Pending,
    Finalized(Turn),
}

/// At most one `Pending` entry exists, always at the tail.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn push(&mut self, turn: Turn) {
        debug_assert!(!self.has_pending());
        self.entries.push(Entry::Finalized(turn));
    }

    pub fn begin_pending(&mut self) {
        if !self.has_pending() {
            self.entries.push(Entry::Pending);
        }
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.entries.last(), Some(Entry::Pending))
    }

    /// Replaces the trailing placeholder (if any) with a finalized turn.
    pub fn resolve(&mut self, turn: Turn) {
        if self.has_pending() {
            self.entries.pop();
        }
        self.entries.push(Entry::Finalized(turn));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One block per finalized entry, blocks separated by a blank line.
    pub fn export_text(&self) -> String {
        let blocks: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Finalized(turn) => {
                    let mut block = format!("[{}]", turn.sender.tag());
                    if !turn.files.is_empty() {
                        block.push_str(&format!("\nFiles: {}", turn.files.join(", ")));
                    }
                    block.push('\n');
                    block.push_str(&turn.text);
                    Some(block)
                }
                Entry::Pending => None,
            })
            .collect();
        blocks.join("\n\n")
    }
}

pub fn export_file_name() -> String {
    format!(
        "gembar-chat-{}.txt",
        Local::now().format("%Y-%m-%dT%H-%M-%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_replaces_placeholder() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user("hi".to_string(), vec![]));
        transcript.begin_pending();
        assert!(transcript.has_pending());

        transcript.resolve(Turn::gemini("hello".to_string()));
        assert!(!transcript.has_pending());
        assert_eq!(transcript.entries().len(), 2);
        assert!(matches!(
            transcript.entries().last(),
            Some(Entry::Finalized(turn)) if turn.text == "hello"
        ));
    }

    #[test]
    fn at_most_one_placeholder() {
        let mut transcript = Transcript::default();
        transcript.begin_pending();
        transcript.begin_pending();
        assert_eq!(transcript.entries().len(), 1);
    }

    #[test]
    fn export_two_entries() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user("hi".to_string(), vec![]));
        transcript.push(Turn::gemini("hello".to_string()));

        assert_eq!(transcript.export_text(), "[user]\nhi\n\n[gemini]\nhello");
    }

    #[test]
    fn export_includes_file_names() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user(
            "see attached".to_string(),
            vec!["notes.txt".to_string(), "photo.png".to_string()],
        ));

        assert_eq!(
            transcript.export_text(),
            "[user]\nFiles: notes.txt, photo.png\nsee attached"
        );
    }

    #[test]
    fn export_skips_placeholder() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user("hi".to_string(), vec![]));
        transcript.begin_pending();

        assert_eq!(transcript.export_text(), "[user]\nhi");
    }

    #[test]
    fn clear_empties_everything() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user("hi".to_string(), vec![]));
        transcript.begin_pending();
        transcript.clear();
        assert!(transcript.is_empty());
    }
}
