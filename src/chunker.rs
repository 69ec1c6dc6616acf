//! Sliding-window text chunker.
//!
//! Splits sanitized file content into overlapping fragments bounded in size.
//! Budgets are expressed in characters via the documented 4-chars/token
//! heuristic; fragments record UTF-8 byte offsets and 1-based line ranges so
//! results can be cited without re-reading the file.
//!
//! The window prefers to break at a newline once it is at least 200
//! characters in, which keeps fragment boundaries near line boundaries for
//! typical source files. Output is deterministic for a fixed input and
//! `(chunk_size, overlap)` pair.

/// Chars-per-token ratio used for all budget math.
const CHARS_PER_TOKEN: usize = 4;

/// Minimum window size in characters, regardless of `chunk_size_tokens`.
const MIN_WINDOW_CHARS: usize = 256;

/// Newline-seek only considers breaks at least this many chars into a window.
const NEWLINE_SEEK_FLOOR: usize = 200;

/// One overlapping fragment of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: usize,
    /// Trimmed window text; equals `text[byte_start..byte_end]` exactly.
    pub content: String,
    /// UTF-8 byte offset of the first content byte.
    pub byte_start: usize,
    /// UTF-8 byte offset one past the last content byte.
    pub byte_end: usize,
    /// 1-based first line of the fragment.
    pub line_start: usize,
    /// 1-based last line of the fragment, inclusive.
    pub line_end: usize,
}

/// Split `text` into overlapping fragments.
///
/// Empty or whitespace-only input yields no fragments. Non-empty input that
/// would otherwise produce nothing yields exactly one fragment covering the
/// whole trimmed content.
pub fn chunk_text(text: &str, chunk_size_tokens: usize, overlap_tokens: usize) -> Vec<Fragment> {
    let max_chars = (chunk_size_tokens * CHARS_PER_TOKEN).max(MIN_WINDOW_CHARS);
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    // Byte offset of the trimmed region within the original text.
    let trim_offset = trimmed.as_ptr() as usize - text.as_ptr() as usize;

    // (byte offset into `text`, char) for every char of the trimmed region.
    let chars: Vec<(usize, char)> = trimmed
        .char_indices()
        .map(|(off, ch)| (off + trim_offset, ch))
        .collect();
    let n = chars.len();
    let byte_end_of = |char_idx: usize| -> usize {
        let (off, ch) = chars[char_idx];
        off + ch.len_utf8()
    };

    let mut fragments = Vec::new();
    let mut start = 0usize;

    while start < n {
        let mut end = (start + max_chars).min(n);

        if end < n && start + NEWLINE_SEEK_FLOOR < end {
            let window = &chars[start + NEWLINE_SEEK_FLOOR..end];
            if let Some(rel) = window.iter().rposition(|(_, ch)| *ch == '\n') {
                end = start + NEWLINE_SEEK_FLOOR + rel + 1;
            }
        }

        let window_start_byte = chars[start].0;
        let window_end_byte = byte_end_of(end - 1);
        let window = &text[window_start_byte..window_end_byte];
        let content = window.trim();

        if !content.is_empty() {
            let inset = content.as_ptr() as usize - window.as_ptr() as usize;
            let byte_start = window_start_byte + inset;
            let byte_end = byte_start + content.len();
            fragments.push(make_fragment(text, fragments.len(), content, byte_start, byte_end));
        }

        let next = end.saturating_sub(overlap_chars).max(start + 1);
        if end >= n {
            break;
        }
        start = next;
    }

    if fragments.is_empty() {
        let byte_start = trim_offset;
        let byte_end = trim_offset + trimmed.len();
        fragments.push(make_fragment(text, 0, trimmed, byte_start, byte_end));
    }

    fragments
}

fn make_fragment(
    text: &str,
    index: usize,
    content: &str,
    byte_start: usize,
    byte_end: usize,
) -> Fragment {
    let line_start = 1 + text[..byte_start].matches('\n').count();
    let line_end = 1 + text[..byte_end].matches('\n').count();
    Fragment {
        index,
        content: content.to_string(),
        byte_start,
        byte_end,
        line_start,
        line_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk_text("", 256, 32).is_empty());
        assert!(chunk_text("   \n\t  ", 256, 32).is_empty());
    }

    #[test]
    fn short_input_yields_one_fragment() {
        let fragments = chunk_text("hello world\n", 256, 32);
        assert_eq!(fragments.len(), 1);
        let f = &fragments[0];
        assert_eq!(f.content, "hello world");
        assert_eq!(f.index, 0);
        assert_eq!((f.line_start, f.line_end), (1, 1));
    }

    #[test]
    fn content_equals_byte_slice() {
        let text: String = (0..200)
            .map(|i| format!("line number {i} with some padding text\n"))
            .collect();
        let fragments = chunk_text(&text, 64, 8);
        assert!(fragments.len() > 1);
        for f in &fragments {
            assert_eq!(f.content, &text[f.byte_start..f.byte_end]);
            assert!(f.byte_start <= f.byte_end);
            assert!(f.byte_end <= text.len());
            assert!(f.line_start <= f.line_end);
        }
    }

    #[test]
    fn windows_overlap() {
        let text: String = (0..400).map(|i| format!("row {i}\n")).collect();
        let fragments = chunk_text(&text, 64, 16);
        assert!(fragments.len() > 1);
        for pair in fragments.windows(2) {
            // The next fragment starts before the previous one ends.
            assert!(pair[1].byte_start < pair[0].byte_end);
        }
    }

    #[test]
    fn windows_break_at_newlines() {
        let text: String = (0..100)
            .map(|i| format!("a reasonably sized line of text number {i}\n"))
            .collect();
        let fragments = chunk_text(&text, 128, 0);
        for f in &fragments[..fragments.len() - 1] {
            // Trimmed content never ends mid-line when a newline was in reach.
            assert!(!f.content.contains('\r'));
            assert_eq!(text.as_bytes()[f.byte_end], b'\n');
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let text: String = (0..300).map(|i| format!("alpha beta gamma {i}\n")).collect();
        let a = chunk_text(&text, 64, 8);
        let b = chunk_text(&text, 64, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn multibyte_content_keeps_valid_offsets() {
        let text = "héllo wörld — ünïcode ✓\n".repeat(120);
        let fragments = chunk_text(&text, 64, 8);
        assert!(!fragments.is_empty());
        for f in &fragments {
            // Offsets must land on char boundaries for slicing to succeed.
            assert_eq!(f.content, &text[f.byte_start..f.byte_end]);
        }
    }

    #[test]
    fn line_numbers_are_one_based_inclusive() {
        let text = "first\nsecond\nthird\n";
        let fragments = chunk_text(text, 256, 32);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].line_start, 1);
        assert_eq!(fragments[0].line_end, 3);
    }
}
