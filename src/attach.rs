//! Attachment preprocessing for contestant prompts.
//!
//! Turns file paths + the raw prompt into the final user message: text
//! attachments are concatenated into the prompt body, images become base64
//! data-URL parts, and image parts are only emitted when the effective model
//! is vision-capable. Consumed by the coordinator at fan-out time; nothing
//! here touches the network.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::gateway::{ContentPart, ImageUrl, Message};

/// Image extensions the service accepts as data URLs.
const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
];

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unnamed>")
        .to_string()
}

fn image_mime(ext: &str) -> Option<&'static str> {
    IMAGE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Whether the effective model id matches any vision-capable id.
/// Substring match: "Qwen/Qwen3-VL-32B-Thinking" matches "Qwen3-VL".
pub fn is_vision_capable(effective_model: &str, vision_models: &[String]) -> bool {
    vision_models.iter().any(|v| effective_model.contains(v))
}

/// Assemble the final user message for one contestant.
///
/// With no attachments this is just the prompt. Otherwise text attachments
/// are appended to the prompt and, if the model is vision-capable and image
/// attachments exist, the message becomes multipart text + image parts. A
/// non-vision model with image attachments gets a visible note that the
/// images were ignored.
pub fn build_user_message(
    prompt: &str,
    attachments: &[PathBuf],
    effective_model: &str,
    vision_models: &[String],
) -> Message {
    if attachments.is_empty() {
        return Message::user(prompt);
    }

    let mut text_sections: Vec<String> = Vec::new();
    let mut image_parts: Vec<ContentPart> = Vec::new();

    for path in attachments {
        if !path.exists() {
            continue;
        }

        let ext = extension_of(path);
        let fname = file_name_of(path);

        if let Some(mime) = image_mime(&ext) {
            match std::fs::read(path) {
                Ok(bytes) => {
                    let b64 = BASE64.encode(bytes);
                    image_parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{mime};base64,{b64}"),
                        },
                    });
                }
                Err(e) => {
                    tracing::warn!(file = %fname, error = %e, "failed to read image attachment");
                    text_sections
                        .push(format!("\n\n[attachment {fname} could not be read: {e}]"));
                }
            }
        } else if ext == "docx" {
            // Word parsing is not supported; fall through with a visible marker
            // rather than silently dropping the file.
            text_sections.push(format!(
                "\n\n[attachment {fname} skipped: unsupported format .docx]"
            ));
        } else {
            // Everything else is treated as text (code, markdown, logs...).
            // Non-UTF-8 bytes are replaced rather than failing the attachment.
            match std::fs::read(path) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    text_sections.push(format!("\n\n[attached file: {fname}]:\n{text}"));
                }
                Err(e) => {
                    tracing::warn!(file = %fname, error = %e, "failed to read attachment");
                    text_sections
                        .push(format!("\n\n[attachment {fname} could not be read: {e}]"));
                }
            }
        }
    }

    let mut full_text = format!("{prompt}{}", text_sections.concat());

    let vision = is_vision_capable(effective_model, vision_models);

    if vision && !image_parts.is_empty() {
        let mut parts = vec![ContentPart::Text { text: full_text }];
        parts.extend(image_parts);
        Message::user_parts(parts)
    } else {
        if !image_parts.is_empty() {
            full_text.push_str(
                "\n\n[note: image attachments detected, but this model does not \
                 support vision input; the images were ignored]",
            );
        }
        Message::user(full_text)
    }
}
