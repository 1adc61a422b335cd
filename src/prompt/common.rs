use crate::config::{LengthPreset, OutputFormat, SummarizationConfig, Tone};

// Shared instruction blocks for every generative prompt.
pub const DONT_TELL_ME: &str = r#"
Important instructions for your responses:

1. Do not narrate or describe your actions.
2. Do not summarize or restate the instructions I've given you.
3. Do not preface your responses with phrases like "Here's a summary..." or "I will now..."
4. Do not acknowledge or confirm that you understand these instructions.
5. Simply produce the requested text, without any meta-commentary.
6. Avoid phrases like "As an AI language model..." or similar self-referential statements.
"#;

pub const STAY_FAITHFUL: &str = r#"
Accuracy rules:
- Use ONLY facts stated in the text. Do not add outside knowledge, opinions or speculation.
- Keep names, numbers, dates and quotations exactly as they appear.
- If the text is ambiguous, stay ambiguous rather than guessing.
"#;

pub fn tone_instructions(tone: Tone) -> &'static str {
    match tone {
        Tone::Neutral => "Write in a neutral, objective voice.",
        Tone::Formal => "Write in a formal, professional register. Avoid contractions and colloquialisms.",
        Tone::Casual => "Write in a relaxed, conversational voice, as if explaining to a colleague.",
        Tone::Academic => "Write in a precise academic register. Prefer exact terminology and hedged claims.",
        Tone::Simple => "Use plain, everyday words and short sentences that a general reader can follow.",
    }
}

/// Target length phrased for the model, from the preset or `max_length`.
pub fn length_instructions(config: &SummarizationConfig, source_words: usize) -> String {
    let target = match (config.length, config.max_length) {
        (LengthPreset::Custom, Some(max)) => max,
        (preset, max) => {
            let percent = preset.sentence_percent().unwrap_or(30);
            let by_share = (source_words * percent / 100).max(15);
            max.map_or(by_share, |max| by_share.min(max))
        }
    };
    match config.min_length {
        Some(min) if min < target => format!(
            "The summary must be between {} and {} words long.",
            min, target
        ),
        _ => format!("The summary must be at most {} words long.", target),
    }
}

pub fn focus_instructions(keywords: &[String]) -> String {
    if keywords.is_empty() {
        return String::new();
    }
    format!(
        "Give priority to content about: {}. Still cover the main point of the text even if it does not mention them.",
        keywords.join(", ")
    )
}

pub fn format_instructions(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Paragraphs => "Write flowing prose in complete sentences. Do not use bullet points or headings.",
        OutputFormat::Bullets => "Write one complete sentence per line. Do not add headings.",
    }
}
