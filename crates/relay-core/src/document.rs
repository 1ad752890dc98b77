// Document preprocessing
//
// Filepath document sources are local-only: before a spec reaches any
// provider, the coordinator resolves them to base64, sniffing the mime type
// from the extension and deriving a filename from the path when absent.

use base64::Engine;
use std::path::Path;

use crate::error::{GatewayError, Result};
use crate::message::{ContentPart, DocumentSource, Message};

const FALLBACK_MIME: &str = "application/octet-stream";

/// Resolve every filepath document source in `messages` to base64.
pub async fn resolve_document_sources(messages: &mut [Message]) -> Result<()> {
    for message in messages.iter_mut() {
        for part in message.content.iter_mut() {
            let ContentPart::Document {
                source,
                mime_type,
                filename,
                ..
            } = part
            else {
                continue;
            };
            let DocumentSource::Filepath { path } = source else {
                continue;
            };

            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                GatewayError::validation(format!("Failed to read document {path}: {e}"))
            })?;

            if mime_type.is_none() {
                *mime_type = Some(sniff_mime(path));
            }
            if filename.is_none() {
                *filename = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string());
            }

            *source = DocumentSource::Base64 {
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            };
        }
    }
    Ok(())
}

/// Mime type from the file extension, falling back to octet-stream
fn sniff_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}
