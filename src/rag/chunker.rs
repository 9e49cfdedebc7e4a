use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Fixed windows of `size` words advancing by `size - overlap`.
    #[default]
    Words,
    /// Whole lines grouped up to `size` words, carrying trailing lines as overlap.
    Paragraph,
}

impl ChunkStrategy {
    pub fn from_str(s: &str) -> Self {
        match s {
            "paragraph" => Self::Paragraph,
            _ => Self::Words,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Words => "words",
            Self::Paragraph => "paragraph",
        }
    }
}

/// Split text into chunks using the specified strategy.
pub fn chunk_text(
    text: &str,
    strategy: ChunkStrategy,
    size: usize,
    overlap: usize,
) -> RagResult<Vec<String>> {
    match strategy {
        ChunkStrategy::Words => chunk_words(text, size, overlap),
        ChunkStrategy::Paragraph => chunk_paragraphs(text, size, overlap),
    }
}

/// Returns the window step, rejecting configurations that would never advance.
fn window_step(size: usize, overlap: usize) -> RagResult<usize> {
    if size == 0 {
        return Err(RagError::InvalidConfig("chunk size must be at least 1 word".into()));
    }
    if overlap >= size {
        return Err(RagError::InvalidConfig(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
        )));
    }
    Ok(size - overlap)
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Collapse whitespace runs to single spaces and emit overlapping word windows.
///
/// Every window holds at most `size` words; consecutive windows share exactly
/// `overlap` words. The last window may be shorter and ends the sequence.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> RagResult<Vec<String>> {
    let step = window_step(size, overlap)?;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::with_capacity(words.len() / step + 1);
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if start + size >= words.len() {
            break;
        }
        start += step;
    }
    Ok(chunks)
}

/// Group non-empty lines into chunks of up to `size` words.
///
/// When the next line would overflow the running chunk it is flushed, and with
/// `overlap > 0` its last one or two lines seed the next chunk. A single line
/// longer than `size` is cut with [`chunk_words`] after flushing what came before it.
pub fn chunk_paragraphs(text: &str, size: usize, overlap: usize) -> RagResult<Vec<String>> {
    window_step(size, overlap)?;

    let paragraphs: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect();

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for para in paragraphs {
        let para_len = word_count(&para);

        if para_len > size {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
                current_len = 0;
            }
            chunks.extend(chunk_words(&para, size, overlap)?);
            continue;
        }

        if current_len + para_len > size && !current.is_empty() {
            chunks.push(current.join("\n"));

            if overlap > 0 {
                let keep = current.len().min(2);
                current = current.split_off(current.len() - keep);
                current_len = current.iter().map(|p| word_count(p)).sum();
                // The carried lines must leave room for the incoming one.
                while !current.is_empty() && current_len + para_len > size {
                    let dropped = current.remove(0);
                    current_len -= word_count(&dropped);
                }
            } else {
                current.clear();
                current_len = 0;
            }
        }

        current.push(para);
        current_len += para_len;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn words_of(chunk: &str) -> Vec<&str> {
        chunk.split_whitespace().collect()
    }

    #[test]
    fn test_empty_content() {
        assert!(chunk_words("", 10, 2).unwrap().is_empty());
        assert!(chunk_words("  \n\t ", 10, 2).unwrap().is_empty());
        assert!(chunk_paragraphs("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_whitespace_collapsed() {
        let chunks = chunk_words("alpha \n\n beta\t\tgamma", 10, 0).unwrap();
        assert_eq!(chunks, vec!["alpha beta gamma"]);
    }

    #[test]
    fn test_window_overlap_exact() {
        let text = numbered_words(10);
        let chunks = chunk_words(&text, 4, 1).unwrap();
        assert_eq!(chunks, vec!["w0 w1 w2 w3", "w3 w4 w5 w6", "w6 w7 w8 w9"]);
    }

    #[test]
    fn test_short_final_window() {
        let text = numbered_words(7);
        let chunks = chunk_words(&text, 4, 1).unwrap();
        assert_eq!(chunks, vec!["w0 w1 w2 w3", "w3 w4 w5 w6"]);

        let chunks = chunk_words(&numbered_words(8), 4, 1).unwrap();
        assert_eq!(chunks.last().unwrap(), "w6 w7");
    }

    #[test]
    fn test_window_properties_hold_across_sizes() {
        for n in 1..40 {
            let text = numbered_words(n);
            for size in 1..8 {
                for overlap in 0..size {
                    let chunks = chunk_words(&text, size, overlap).unwrap();
                    assert!(!chunks.is_empty());

                    for chunk in &chunks {
                        assert!(words_of(chunk).len() <= size);
                    }
                    for pair in chunks.windows(2) {
                        let prev = words_of(&pair[0]);
                        let next = words_of(&pair[1]);
                        assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
                    }

                    let covered: std::collections::HashSet<&str> =
                        chunks.iter().flat_map(|c| c.split_whitespace()).collect();
                    assert_eq!(covered.len(), n, "n={n} size={size} overlap={overlap}");
                }
            }
        }
    }

    #[test]
    fn test_invalid_step_rejected() {
        assert!(matches!(chunk_words("a b c", 5, 5), Err(RagError::InvalidConfig(_))));
        assert!(matches!(chunk_words("a b c", 5, 9), Err(RagError::InvalidConfig(_))));
        assert!(matches!(chunk_words("a b c", 0, 0), Err(RagError::InvalidConfig(_))));
        assert!(matches!(chunk_paragraphs("a b c", 3, 3), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_paragraphs_grouped_until_full() {
        let text = "one two three\nfour five\n\nsix seven eight\nnine";
        let chunks = chunk_paragraphs(text, 5, 0).unwrap();
        assert_eq!(chunks, vec!["one two three\nfour five", "six seven eight\nnine"]);
    }

    #[test]
    fn test_paragraph_overlap_carries_tail() {
        let text = "a b\nc d\ne f\ng h";
        let chunks = chunk_paragraphs(text, 6, 2).unwrap();
        assert_eq!(chunks, vec!["a b\nc d\ne f", "c d\ne f\ng h"]);
    }

    #[test]
    fn test_long_paragraph_split_in_order() {
        let long = numbered_words(12);
        let text = format!("intro line\n{long}\noutro");
        let chunks = chunk_paragraphs(&text, 5, 1).unwrap();
        assert_eq!(chunks.first().unwrap(), "intro line");
        assert_eq!(chunks.last().unwrap(), "outro");
        for chunk in &chunks {
            assert!(words_of(chunk).len() <= 5);
        }
    }

    #[test]
    fn test_paragraphs_cover_every_word() {
        let text = "The quick brown fox\njumps over\nthe lazy dog\n\nand keeps running far away from here";
        for (size, overlap) in [(3, 0), (4, 1), (6, 2), (20, 5)] {
            let chunks = chunk_paragraphs(text, size, overlap).unwrap();
            assert!(!chunks.is_empty());
            let joined = chunks.join(" ");
            for word in text.split_whitespace() {
                assert!(joined.split_whitespace().any(|w| w == word), "missing {word}");
            }
        }
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(ChunkStrategy::from_str("words"), ChunkStrategy::Words);
        assert_eq!(ChunkStrategy::from_str("paragraph"), ChunkStrategy::Paragraph);
        assert_eq!(ChunkStrategy::from_str("unknown"), ChunkStrategy::Words);
        assert_eq!(ChunkStrategy::Paragraph.as_str(), "paragraph");
    }

    #[test]
    fn test_chunk_text_dispatch() {
        let text = "line one\nline two";
        assert_eq!(chunk_text(text, ChunkStrategy::Words, 10, 0).unwrap(), vec!["line one line two"]);
        assert_eq!(chunk_text(text, ChunkStrategy::Paragraph, 10, 0).unwrap(), vec!["line one\nline two"]);
    }
}
