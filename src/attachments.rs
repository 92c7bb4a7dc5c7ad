use anyhow::{Context, Result};
use base64::Engine;
use image::GenericImageView;
use std::fmt;
use std::path::Path;

// Accepted image types; anything else that is not text/* is rejected.
pub const IMAGE_MIME_TYPES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

// Oversized attachments are downscaled before encoding.
const MAX_WIDTH: u32 = 1568;
const MAX_HEIGHT: u32 = 1568;

// The bytes live only until the send; the transcript keeps the name alone.
#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl AttachedFile {
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(AttachedFile {
            mime: mime_for_path(path),
            name,
            bytes,
        })
    }
}

// Extension-based; unknown extensions map to octet-stream and get rejected
// at send time.
pub fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "xml" => "text/xml",
        "rs" | "py" | "js" | "ts" | "c" | "h" | "cpp" | "java" | "go" | "rb" | "sh" | "sql"
        | "json" | "toml" | "yaml" | "yml" => "text/plain",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

// Aborts the send before any network call.
#[derive(Debug)]
pub struct UnsupportedFile(pub String);

impl fmt::Display for UnsupportedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported file type: {}", self.0)
    }
}

impl std::error::Error for UnsupportedFile {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: String,
    pub data_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub images: Vec<InlineImage>,
}

pub fn build_outgoing(text: &str, files: &[AttachedFile]) -> Result<OutgoingMessage> {
    let mut file_blocks = String::new();
    let mut images = Vec::new();

    for file in files {
        if IMAGE_MIME_TYPES.contains(&file.mime.as_str()) {
            images.push(encode_inline_image(file)?);
        } else if file.mime.starts_with("text/") {
            file_blocks.push_str(&format!(
                "--- START OF FILE: {} ---\n{}\n--- END OF FILE ---\n\n",
                file.name,
                String::from_utf8_lossy(&file.bytes)
            ));
        } else {
            return Err(UnsupportedFile(file.name.clone()).into());
        }
    }

    Ok(OutgoingMessage {
        text: format!("{}{}", file_blocks, text),
        images,
    })
}

// HEIC/HEIF cannot be decoded locally and pass through untouched.
fn encode_inline_image(file: &AttachedFile) -> Result<InlineImage> {
    let engine = &base64::engine::general_purpose::STANDARD;

    let Ok(img) = image::load_from_memory(&file.bytes) else {
        return Ok(InlineImage {
            mime: file.mime.clone(),
            data_b64: engine.encode(&file.bytes),
        });
    };

    let (width, height) = img.dimensions();
    if width <= MAX_WIDTH && height <= MAX_HEIGHT {
        return Ok(InlineImage {
            mime: file.mime.clone(),
            data_b64: engine.encode(&file.bytes),
        });
    }

    let scale = (MAX_WIDTH as f32 / width as f32).min(MAX_HEIGHT as f32 / height as f32);
    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;
    let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

    let mut buffer = Vec::new();
    resized
        .write_to(
            &mut std::io::Cursor::new(&mut buffer),
            image::ImageFormat::Png,
        )
        .context("Failed to re-encode resized image")?;

    Ok(InlineImage {
        mime: "image/png".to_string(),
        data_b64: engine.encode(&buffer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str, mime: &str, bytes: &[u8]) -> AttachedFile {
        AttachedFile {
            name: name.to_string(),
            mime: mime.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn text_file_is_prepended_with_delimiters() {
        let out = build_outgoing(
            "summarize this",
            &[file("notes.txt", "text/plain", b"line one")],
        )
        .unwrap();

        assert_eq!(
            out.text,
            "--- START OF FILE: notes.txt ---\nline one\n--- END OF FILE ---\n\nsummarize this"
        );
        assert!(out.images.is_empty());
    }

    #[test]
    fn image_file_becomes_inline_part() {
        let out = build_outgoing("what is this", &[file("pic.heic", "image/heic", b"raw")]).unwrap();

        assert_eq!(out.text, "what is this");
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].mime, "image/heic");
        assert_eq!(
            out.images[0].data_b64,
            base64::engine::general_purpose::STANDARD.encode(b"raw")
        );
    }

    #[test]
    fn unsupported_file_aborts_with_name() {
        let err = build_outgoing("hi", &[file("doc.pdf", "application/pdf", b"%PDF")]).unwrap_err();
        let unsupported = err.downcast_ref::<UnsupportedFile>().unwrap();
        assert_eq!(unsupported.0, "doc.pdf");
    }

    #[test]
    fn mixed_text_and_image() {
        let out = build_outgoing(
            "both",
            &[
                file("a.txt", "text/plain", b"A"),
                file("b.png", "image/png", b"not-a-real-png"),
            ],
        )
        .unwrap();

        assert!(out.text.starts_with("--- START OF FILE: a.txt ---"));
        assert!(out.text.ends_with("both"));
        assert_eq!(out.images.len(), 1);
    }

    #[test]
    fn any_text_subtype_is_accepted() {
        let out = build_outgoing("go", &[file("page.html", "text/html", b"<p>hi</p>")]).unwrap();
        assert!(out.text.contains("<p>hi</p>"));
    }

    #[test]
    fn mime_inference_from_extension() {
        assert_eq!(mime_for_path(&PathBuf::from("a.PNG")), "image/png");
        assert_eq!(mime_for_path(&PathBuf::from("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(&PathBuf::from("a.md")), "text/markdown");
        assert_eq!(mime_for_path(&PathBuf::from("a.rs")), "text/plain");
        assert_eq!(
            mime_for_path(&PathBuf::from("a.bin")),
            "application/octet-stream"
        );
    }
}
