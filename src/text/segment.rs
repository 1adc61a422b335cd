use lazy_static::lazy_static;
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

lazy_static! {
    // Lower-cased, without the trailing period.
    static ref ABBREVIATIONS: HashSet<&'static str> = [
        "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "vs", "etc", "inc", "ltd",
        "co", "corp", "dept", "fig", "no", "vol", "approx", "e.g", "i.e", "u.s", "u.k", "jan",
        "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec",
    ]
    .into_iter()
    .collect();
}

fn ends_with_abbreviation(segment: &str) -> bool {
    let trimmed = segment.trim_end();
    let Some(without_period) = trimmed.strip_suffix('.') else {
        return false;
    };
    let last_word = without_period
        .rsplit(|c: char| c.is_whitespace() || c == '(' || c == '"')
        .next()
        .unwrap_or("");
    if last_word.is_empty() {
        return false;
    }
    // Single initials such as "J." in "J. R. R. Tolkien".
    if last_word.chars().count() == 1 && last_word.chars().all(|c| c.is_uppercase()) {
        return true;
    }
    ABBREVIATIONS.contains(last_word.to_lowercase().as_str())
}

/// Splits text into trimmed, non-empty sentences in document order.
///
/// Uses Unicode sentence boundaries, then re-joins fragments that were cut
/// after a known abbreviation or an initial.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut pending = String::new();

    for segment in text.unicode_sentences() {
        pending.push_str(segment);
        if ends_with_abbreviation(segment) && !segment.contains('\n') {
            continue;
        }
        let sentence = pending.trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        pending.clear();
    }

    let rest = pending.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_simple_sentences() {
        let sentences = split_sentences("The cat sat. The dog ran! Did the bird fly?");
        assert_eq!(sentences, vec!["The cat sat.", "The dog ran!", "Did the bird fly?"]);
    }

    #[test]
    fn test_keeps_abbreviations_together() {
        let sentences =
            split_sentences("Dr. Smith met Mr. Jones in St. Louis. They discussed the plan.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("Dr. Smith"));
        assert!(sentences[0].ends_with("St. Louis."));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n\t ").is_empty());
    }

    #[test]
    fn test_unterminated_final_sentence() {
        let sentences = split_sentences("First one. And a trailing fragment");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1], "And a trailing fragment");
    }
}
