use crate::config::SummarizationConfig;
use crate::prompt::common::{
    focus_instructions, format_instructions, length_instructions, tone_instructions,
    DONT_TELL_ME, STAY_FAITHFUL,
};
use crate::text::word_count;

/// Prompt for a single-call abstractive summary.
pub fn summary_prompt(text: &str, config: &SummarizationConfig) -> String {
    format!(
        r#"TEXT (TO BE SUMMARIZED):
-----------------------------
{text}
-----------------------------

First, carefully read and thoroughly understand the entire text.
Then write a summary that captures its central point and the most important supporting details.

Requirements:
- {length}
- {tone}
- {format}
- {focus}
{faithful}
{dont_tell_me}"#,
        text = text,
        length = length_instructions(config, word_count(text)),
        tone = tone_instructions(config.tone),
        format = format_instructions(config.output_format),
        focus = focus_or_default(&config.focus_keywords),
        faithful = STAY_FAITHFUL,
        dont_tell_me = DONT_TELL_ME,
    )
}

/// Map step of hybrid summarization: one section of a longer document.
pub fn chunk_summary_prompt(
    chunk: &str,
    index: usize,
    total: usize,
    config: &SummarizationConfig,
) -> String {
    format!(
        r#"Below is section {index} of {total} of a longer document, between ~~~ markers:
~~~
{chunk}
~~~

Summarize this section in 2-4 sentences of plain prose.
- Keep every name, number and date that matters to the section's main point.
- Do not refer to "this section" or "the document"; state the content directly.
- {focus}
{faithful}
{dont_tell_me}"#,
        index = index + 1,
        total = total,
        chunk = chunk,
        focus = focus_or_default(&config.focus_keywords),
        faithful = STAY_FAITHFUL,
        dont_tell_me = DONT_TELL_ME,
    )
}

/// Reduce step of hybrid summarization. `partials` are either section
/// summaries or the extractive digest of a short document.
pub fn combine_summaries_prompt(
    partials: &str,
    source_words: usize,
    config: &SummarizationConfig,
) -> String {
    format!(
        r#"The notes below, between ~~~ markers, were condensed from one document in reading order:
~~~
{partials}
~~~

Rewrite these notes into one coherent summary of the whole document.
- Merge overlapping points and remove repetition.
- Preserve the order in which the document develops its argument.
- {length}
- {tone}
- {format}
{faithful}
{dont_tell_me}"#,
        partials = partials,
        length = length_instructions(config, source_words),
        tone = tone_instructions(config.tone),
        format = format_instructions(config.output_format),
        faithful = STAY_FAITHFUL,
        dont_tell_me = DONT_TELL_ME,
    )
}

fn focus_or_default(keywords: &[String]) -> String {
    let focus = focus_instructions(keywords);
    if focus.is_empty() {
        "Give balanced coverage to the whole text.".to_string()
    } else {
        focus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LengthPreset, Mode, Tone};

    #[test]
    fn test_summary_prompt_carries_options() {
        let mut config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short)
            .with_focus_keywords(["inflation"]);
        config.tone = Tone::Formal;
        let prompt = summary_prompt("Prices rose again in March.", &config);
        assert!(prompt.contains("Prices rose again in March."));
        assert!(prompt.contains("inflation"));
        assert!(prompt.contains("formal"));
    }

    #[test]
    fn test_chunk_prompt_is_one_based() {
        let config = SummarizationConfig::new(Mode::Hybrid, LengthPreset::Medium);
        let prompt = chunk_summary_prompt("Body.", 0, 3, &config);
        assert!(prompt.contains("section 1 of 3"));
    }
}
