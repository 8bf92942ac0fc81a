//! Incremental sentence detection over streamed text.
//!
//! Mid-stream, a sentence only counts as complete once its terminator run
//! (`.`, `?`, `!`) is followed by whitespace; a terminator sitting at the
//! end of the buffer may still grow (e.g. `"Ça va?"` continuing as
//! `"Ça va?!"`), so it is only released by [`SentenceSplitter::flush`].

/// Accumulates streamed fragments and emits complete sentences.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence it completes, in order.
    /// Each emitted sentence keeps its terminators plus the single
    /// whitespace character that sealed it.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        while let Some((start, end)) = complete_sentence(&self.buffer) {
            sentences.push(self.buffer[start..end].to_string());
            self.buffer.drain(..end);
        }
        sentences
    }

    /// Release whatever remains once the stream has ended, unless it is
    /// blank.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Split a complete text into sentences, terminator-at-end included.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut splitter = SentenceSplitter::new();
    let mut sentences = splitter.push(text);
    sentences.extend(splitter.flush());
    sentences
}

/// Find the first whitespace-sealed sentence: body, terminator run, then
/// one whitespace character. Returns the byte range of the match.
fn complete_sentence(text: &str) -> Option<(usize, usize)> {
    let mut body_start = None;
    let mut in_terminators = false;
    for (i, c) in text.char_indices() {
        match c {
            '.' | '?' | '!' => {
                if body_start.is_some() {
                    in_terminators = true;
                }
            }
            _ if in_terminators && c.is_whitespace() => {
                return Some((body_start?, i + c.len_utf8()));
            }
            _ => {
                body_start.get_or_insert(i);
                in_terminators = false;
            }
        }
    }
    None
}
