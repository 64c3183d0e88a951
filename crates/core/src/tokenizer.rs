//! Tokenizer: the chat session asks a `Tokenizer` to estimate message-log
//! size so it can decide when history needs truncation ahead of an LLM
//! call. Degrades to a whitespace estimate when no provider-specific
//! tokenizer is registered.

use crate::message::Message;

/// Estimates token counts for a message log. Implementations may wrap a
/// provider-specific tokenizer (e.g. tiktoken) or fall back to a rough
/// heuristic; the Chat Session only needs a monotonic, self-consistent
/// estimate, not an exact count.
pub trait Tokenizer: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    fn count_message(&self, message: &Message) -> usize {
        self.count_text(&message.content.as_text())
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Whitespace/4-chars-per-token heuristic, used when no provider-specific
/// tokenizer is configured. Approximate counting is accepted pending a
/// provider-native tokenizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() / 4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_as_zero_tokens() {
        assert_eq!(ApproxTokenizer.count_text(""), 0);
    }

    #[test]
    fn nonempty_text_counts_at_least_one_token() {
        assert_eq!(ApproxTokenizer.count_text("hi"), 1);
    }

    #[test]
    fn message_log_sums_across_messages() {
        let messages = vec![Message::user("a".repeat(8)), Message::assistant("b".repeat(12))];
        let total: usize = messages.iter().map(|m| ApproxTokenizer.count_message(m)).sum();
        assert_eq!(ApproxTokenizer.count_messages(&messages), total);
    }
}
