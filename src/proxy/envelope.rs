//! Protocol-envelope views the middleware rewrites.
//!
//! The middleware never touches rmcp types directly; the server glue maps
//! tool results and tool listings into these tagged shapes and back, so
//! envelope rewrites stay local when new content kinds appear.

use serde_json::Value;

/// One content item of a tool result. Only text items are condensing
/// candidates; everything else passes through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text { text: String },
    Other(Value),
}

/// A tool-call result envelope: ordered content items plus the optional
/// structured echo of the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultEnvelope {
    pub content: Vec<ContentItem>,
    /// Structured duplicate of the payload; cleared when any text item is
    /// rewritten so consumers never see a stale original.
    pub structured: Option<Value>,
}

impl ResultEnvelope {
    pub fn from_texts(texts: impl IntoIterator<Item = String>) -> Self {
        Self {
            content: texts
                .into_iter()
                .map(|text| ContentItem::Text { text })
                .collect(),
            structured: None,
        }
    }

    /// Mutable view of every text payload, in order.
    pub fn texts_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.content.iter_mut().filter_map(|item| match item {
            ContentItem::Text { text } => Some(text),
            ContentItem::Other(_) => None,
        })
    }

    /// Text payloads, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::Text { text } => Some(text.as_str()),
            ContentItem::Other(_) => None,
        })
    }
}

/// A tool-listing entry; the middleware strips `output_schema` from tools
/// whose results it will rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEntry {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}
