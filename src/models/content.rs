//! Prompt content blocks.

use serde::{Deserialize, Serialize};

/// One block of prompt content, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64-encoded image.
    Image {
        /// Image format (for example `png`).
        format: String,
        /// Base64 payload.
        data: String,
    },
    /// Base64-encoded audio.
    Audio {
        /// Audio format (for example `wav`).
        format: String,
        /// Base64 payload.
        data: String,
    },
    /// Embedded resource with inline content.
    Resource {
        /// Resource URI.
        uri: String,
        /// MIME type, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Inline content.
        content: String,
    },
    /// Reference to a resource by URI only.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// MIME type, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentBlock {
    /// Text block shorthand.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text of the block, if it is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Concatenate the text blocks of a prompt, separated by newlines.
#[must_use]
pub fn joined_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}
