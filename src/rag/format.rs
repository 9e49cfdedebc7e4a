use super::retrieve::RetrievedChunk;

const PREVIEW_CHARS: usize = 300;

/// Context string handed to generation: chunk texts separated by a blank line.
pub fn join_context(hits: &[RetrievedChunk]) -> String {
    hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join("\n\n")
}

/// Human-readable listing of retrieved chunks with their source collection and score.
/// Long chunks are cut to a preview.
pub fn format_hits_with_citations(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return "No relevant context found in the selected collections.".to_string();
    }

    let mut output = String::new();
    for hit in hits {
        output.push_str("---\n");
        output.push_str(&format!("[From: {}, relevance: {:.3}]\n", hit.collection, hit.score));
        output.push_str(&preview(&hit.text));
        output.push('\n');
    }
    output
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
