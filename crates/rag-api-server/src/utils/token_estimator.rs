/// Word-based token estimate, cheaper than a real tokenizer and close
/// enough for budgeting context windows. Rule of thumb: ~1.3 tokens
/// per whitespace-delimited word across mixed-language content.
use crate::domain::Chunk;

pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();
    ((words as f64 * 1.3) + 5.0).ceil() as usize
}

/// Estimate tokens across multiple chunks
pub fn estimate_chunks_tokens(chunks: &[Chunk]) -> usize {
    chunks.iter()
        .map(|chunk| estimate_tokens(&chunk.content))
        .sum()
}

/// Would adding `new_text` push the running total past `max_tokens`?
pub fn would_exceed_limit(
    current_tokens: usize,
    new_text: &str,
    max_tokens: usize,
) -> bool {
    let new_tokens = estimate_tokens(new_text);
    current_tokens + new_tokens > max_tokens
}

/// Estimate tokens for a system prompt plus its context block
pub fn estimate_system_tokens(system_prompt: &str, context: &str) -> usize {
    estimate_tokens(system_prompt) + estimate_tokens(context) + 10 // overhead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_drives_the_estimate() {
        // "A short test document about nothing" = 7 words
        let text = "A short test document about nothing in particular";
        let tokens = estimate_tokens(text);
        // 8 * 1.3 + 5 = 15.4 -> 16
        assert!(tokens >= 13 && tokens <= 17);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn would_exceed_limit_compares_against_the_running_total() {
        let current = 1000;
        let text = "word ".repeat(500);
        assert!(would_exceed_limit(current, &text, 1500));
        assert!(!would_exceed_limit(current, &text, 2000));
    }
}