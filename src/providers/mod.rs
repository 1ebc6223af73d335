pub mod anthropic;
pub(crate) mod anthropic_translate;
pub(crate) mod client;
pub mod openai;
pub(crate) mod openai_translate;
pub(crate) mod translator_contract;

use crate::core::types::ContextDocument;

const DOCUMENT_CONTEXT_HEADER: &str = "The user has provided the following documents for context:";

/// Renders context documents as one labeled text block, or `None` when
/// there are no documents.
pub fn render_context_documents(documents: &[ContextDocument]) -> Option<String> {
    if documents.is_empty() {
        return None;
    }

    let mut block = String::from(DOCUMENT_CONTEXT_HEADER);
    for document in documents {
        block.push_str(&format!(
            "\n\n--- Document: {} ({}) ---\n{}\n--- End of {} ---",
            document.name, document.doc_type, document.content, document.name
        ));
    }
    Some(block)
}

/// Trims a configured base URL, falling back to `default` when blank.
pub(crate) fn normalize_base_url(base_url: Option<&str>, default: &str) -> String {
    let trimmed = base_url.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return default.to_string();
    }

    trimmed.trim_end_matches('/').to_string()
}

pub(crate) fn sanitize_api_key(api_key: Option<&str>) -> Option<String> {
    api_key.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
