use super::ChatMessage;
use crate::rag::RetrievedChunk;

pub const GROUNDING_INSTRUCTION: &str = "You are a helpful assistant. Use the provided context to answer the user's question accurately. If the answer is not in the context, say you don't know.";

/// `Context:` bullet list of chunk texts followed by the question.
pub fn user_prompt(question: &str, hits: &[RetrievedChunk]) -> String {
    let context = hits
        .iter()
        .map(|h| format!("- {}", h.text.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Context:\n{context}\n\nQuestion: {}", question.trim())
}

/// Grounding instruction, the last `history_window` prior messages, then the grounded question.
pub fn build_messages(
    question: &str,
    hits: &[RetrievedChunk],
    history: &[ChatMessage],
    history_window: usize,
) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(history_window)..];
    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(GROUNDING_INSTRUCTION));
    messages.extend(recent.iter().cloned());
    messages.push(ChatMessage::user(user_prompt(question, hits)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn hit(text: &str) -> RetrievedChunk {
        RetrievedChunk { collection: "notes".into(), text: text.into(), score: 0.8 }
    }

    #[test]
    fn test_user_prompt_layout() {
        let prompt = user_prompt("What is a lifetime? ", &[hit(" Lifetimes name scopes. "), hit("Borrows end.")]);
        assert_eq!(
            prompt,
            "Context:\n- Lifetimes name scopes.\n- Borrows end.\n\nQuestion: What is a lifetime?"
        );
    }

    #[test]
    fn test_history_is_windowed() {
        let history: Vec<ChatMessage> = (0..6)
            .map(|i| if i % 2 == 0 { ChatMessage::user(format!("q{i}")) } else { ChatMessage::assistant(format!("a{i}")) })
            .collect();
        let messages = build_messages("next", &[hit("ctx")], &history, 4);

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "q2");
        assert_eq!(messages[4].content, "a5");
        assert_eq!(messages[5].role, Role::User);
        assert!(messages[5].content.ends_with("Question: next"));
    }

    #[test]
    fn test_short_history_and_zero_window() {
        let history = vec![ChatMessage::user("only")];
        assert_eq!(build_messages("q", &[], &history, 4).len(), 3);
        assert_eq!(build_messages("q", &[], &history, 0).len(), 2);
    }
}
