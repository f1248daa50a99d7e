//! Transcription cleanup before classification.
//!
//! Streamed speech arrives with disfluencies and recognizer-mangled
//! technical terms. The preprocessor strips filler words, collapses
//! stuttered repetition, and applies a term-correction map. The whole
//! transformation is idempotent: `preprocess(preprocess(t)) == preprocess(t)`.

/// Filler tokens dropped wherever they appear.
const FILLER_WORDS: &[&str] = &["um", "uh", "er", "hmm"];

/// Longest run of one word kept after collapsing.
const MAX_WORD_RUN: usize = 2;

/// Recognizer-mangled technical terms and their corrections.
/// Matched case-insensitively on word boundaries.
const TERM_CORRECTIONS: &[(&str, &str)] = &[
    ("spanty", "Span<T>"),
    ("span t", "Span<T>"),
    ("sea sharp", "C#"),
    ("see sharp", "C#"),
    ("configure await", "ConfigureAwait"),
    ("i a sync enumerable", "IAsyncEnumerable"),
    ("get hub", "GitHub"),
];

/// Clean one utterance text. Returns a whitespace-normalized string.
pub fn preprocess(text: &str) -> String {
    let without_fillers = strip_fillers(text);
    let collapsed = collapse_repeats(&without_fillers);
    apply_term_corrections(&collapsed)
}

fn strip_fillers(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| {
            let bare: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            !FILLER_WORDS.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_repeats(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut run = 0usize;
    let mut prev_norm = String::new();

    for token in text.split_whitespace() {
        let norm = token.to_lowercase();
        if norm == prev_norm {
            run += 1;
        } else {
            run = 1;
            prev_norm = norm;
        }
        if run <= MAX_WORD_RUN {
            out.push(token);
        }
    }
    out.join(" ")
}

fn apply_term_corrections(text: &str) -> String {
    let mut result = text.to_string();
    for (from, to) in TERM_CORRECTIONS {
        result = replace_phrase_ci(&result, from, to);
    }
    result
}

/// Case-insensitive whole-phrase replacement on word boundaries.
fn replace_phrase_ci(text: &str, from: &str, to: &str) -> String {
    let lower = text.to_lowercase();
    // Lowercasing that changes byte length would misalign the indices below;
    // such text cannot contain the ASCII correction phrases anyway.
    if lower.len() != text.len() {
        return text.to_string();
    }
    let from_lower = from.to_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut search_from = 0usize;

    while let Some(found) = lower[search_from..].find(&from_lower) {
        let start = search_from + found;
        let end = start + from_lower.len();

        let boundary_before = start == 0
            || !lower[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let boundary_after = end == lower.len()
            || !lower[end..].chars().next().is_some_and(|c| c.is_alphanumeric());

        if boundary_before && boundary_after {
            result.push_str(&text[search_from..start]);
            result.push_str(to);
            search_from = end;
        } else {
            result.push_str(&text[search_from..end]);
            search_from = end;
        }
    }
    result.push_str(&text[search_from..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_fillers() {
        assert_eq!(preprocess("um what uh is a hmm mutex"), "what is a mutex");
        assert_eq!(preprocess("Um, so yeah"), "so yeah");
    }

    #[test]
    fn test_filler_inside_word_is_kept() {
        assert_eq!(preprocess("summer is here"), "summer is here");
        assert_eq!(preprocess("the error persists"), "the error persists");
    }

    #[test]
    fn test_collapses_long_repeats() {
        assert_eq!(preprocess("the the the the point is"), "the the point is");
        // Doubling is kept, it can be deliberate emphasis.
        assert_eq!(preprocess("very very slow"), "very very slow");
    }

    #[test]
    fn test_term_corrections() {
        assert_eq!(preprocess("what is spanty"), "what is Span<T>");
        assert_eq!(preprocess("I like sea sharp a lot"), "I like C# a lot");
        assert_eq!(
            preprocess("you forgot configure await false"),
            "you forgot ConfigureAwait false"
        );
    }

    #[test]
    fn test_term_correction_respects_word_boundaries() {
        // "spanty" embedded in a longer word is untouched.
        assert_eq!(preprocess("spantyhose"), "spantyhose");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "um what uh is spanty",
            "the the the thing about sea sharp",
            "configure await configure await",
            "plain text with no noise",
            "",
        ];
        for input in inputs {
            let once = preprocess(input);
            assert_eq!(preprocess(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_whitespace_normalized() {
        assert_eq!(preprocess("  spaced   out  "), "spaced out");
    }
}
