use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

use super::tokenize::is_stop_word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Acronym,
    Unknown,
}

/// A capitalized span that probably names something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub entity_type: EntityType,
    pub sentence_index: usize,
    /// Byte range inside the sentence.
    pub span: (usize, usize),
    pub confidence: f64,
}

lazy_static! {
    static ref PERSON_TITLES: HashSet<&'static str> =
        ["mr", "mrs", "ms", "dr", "prof", "sir", "president", "senator", "judge"]
            .into_iter()
            .collect();
    static ref ORG_SUFFIXES: HashSet<&'static str> = [
        "inc", "corp", "corporation", "ltd", "llc", "company", "university", "institute",
        "agency", "bank", "group", "association", "foundation", "ministry", "council",
    ]
    .into_iter()
    .collect();
    static ref LOCATION_PREPOSITIONS: HashSet<&'static str> =
        ["in", "at", "from", "near", "to"].into_iter().collect();
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_acronym(word: &str) -> bool {
    word.chars().count() >= 2 && word.chars().all(|c| c.is_uppercase() || c.is_ascii_digit())
}

struct Run {
    words: Vec<String>,
    start: usize,
    end: usize,
    first_word_index: usize,
}

fn classify(run: &Run, previous_word: Option<&str>, after_title: bool) -> (EntityType, f64) {
    let last = run
        .words
        .last()
        .map(|w| w.to_lowercase())
        .unwrap_or_default();
    if ORG_SUFFIXES.contains(last.as_str()) {
        (EntityType::Organization, 0.8)
    } else if after_title {
        (EntityType::Person, 0.8)
    } else if run.words.len() == 1 && is_acronym(&run.words[0]) {
        (EntityType::Acronym, 0.6)
    } else if previous_word.is_some_and(|w| LOCATION_PREPOSITIONS.contains(w)) {
        (EntityType::Location, 0.6)
    } else if run.words.len() >= 2 {
        (EntityType::Person, 0.5)
    } else {
        (EntityType::Unknown, 0.4)
    }
}

/// Finds runs of capitalized words in each sentence.
///
/// A single capitalized word at the start of a sentence is ignored unless it
/// is an acronym, since sentence case makes it ambiguous. Honorifics such as
/// "Dr" are not part of the entity but mark the following run as a person.
pub fn extract_entities(sentences: &[String]) -> Vec<Entity> {
    let mut entities = Vec::new();

    for (sentence_index, sentence) in sentences.iter().enumerate() {
        let mut runs: Vec<Run> = Vec::new();
        let mut current: Option<Run> = None;
        let mut word_index = 0usize;
        let mut words_seen: Vec<String> = Vec::new();

        for (offset, token) in sentence.split_word_bound_indices() {
            let is_word = token.chars().any(|c| c.is_alphanumeric());
            if is_word {
                if is_capitalized(token) {
                    let run = current.get_or_insert_with(|| Run {
                        words: Vec::new(),
                        start: offset,
                        end: offset,
                        first_word_index: word_index,
                    });
                    run.words.push(token.to_string());
                    run.end = offset + token.len();
                } else if let Some(run) = current.take() {
                    runs.push(run);
                }
                words_seen.push(token.to_lowercase());
                word_index += 1;
            } else if token != " " {
                if let Some(run) = current.take() {
                    runs.push(run);
                }
            }
        }
        if let Some(run) = current.take() {
            runs.push(run);
        }

        let mut after_title = false;
        for mut run in runs {
            let first_lower = run.words[0].to_lowercase();
            if run.words.len() == 1 && PERSON_TITLES.contains(first_lower.as_str()) {
                after_title = true;
                continue;
            }
            // Drop a leading stop word picked up by sentence case ("The Senate").
            if run.first_word_index == 0 && is_stop_word(&first_lower) {
                if run.words.len() == 1 {
                    after_title = false;
                    continue;
                }
                let dropped = run.words.remove(0);
                run.start += dropped.len() + 1;
                run.first_word_index += 1;
            }
            if run.first_word_index == 0 && run.words.len() == 1 && !is_acronym(&run.words[0]) {
                after_title = false;
                continue;
            }

            let previous_word = run
                .first_word_index
                .checked_sub(1)
                .and_then(|i| words_seen.get(i))
                .map(String::as_str);
            let (entity_type, confidence) = classify(&run, previous_word, after_title);
            after_title = false;

            entities.push(Entity {
                text: run.words.join(" "),
                entity_type,
                sentence_index,
                span: (run.start, run.end),
                confidence,
            });
        }
    }

    entities
}
