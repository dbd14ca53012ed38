use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\s+").expect("sentence pattern is valid"));

/// Lowercase and collapse runs of whitespace into single spaces.
pub fn normalize(text: &str) -> String {
    WHITESPACE
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Whitespace-separated words of the normalised text.
pub fn split_words(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sentences split on ". ", each as a list of words. A trailing period on the
/// last sentence is dropped; empty sentences are skipped.
pub fn split_sentences(text: &str) -> Vec<Vec<String>> {
    let text = normalize(text);
    let text = text.strip_suffix('.').unwrap_or(&text);
    SENTENCE_END
        .split(text)
        .map(split_words)
        .filter(|words| !words.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  The  Cat\n\tSat "), "the cat sat");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Mary went home. John took the milk.  Then he left.");
        assert_eq!(
            sentences,
            vec![
                vec!["mary", "went", "home"],
                vec!["john", "took", "the", "milk"],
                vec!["then", "he", "left"],
            ]
        );
    }

    #[test]
    fn test_split_sentences_skips_empty() {
        assert!(split_sentences("   ").is_empty());
        assert_eq!(split_sentences(". A b."), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_split_words() {
        assert_eq!(split_words("Where is  the Milk?"), vec!["where", "is", "the", "milk?"]);
    }
}
