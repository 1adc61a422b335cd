use crate::config::{Intent, SummarizationConfig};
use crate::prompt::common::{format_instructions, tone_instructions, DONT_TELL_ME, STAY_FAITHFUL};

fn intent_instructions(intent: Option<Intent>) -> &'static str {
    match intent {
        Some(Intent::Grammar) => {
            "Correct spelling, grammar and punctuation. Change as little wording as possible."
        }
        Some(Intent::Simplify) => {
            "Rewrite the text so it is easier to read: shorter sentences, common words, no jargon."
        }
        Some(Intent::Expand) => {
            "Rewrite the text with fuller sentences and smoother transitions, without adding new facts."
        }
        Some(Intent::Summarize) | Some(Intent::Paraphrase) | None => {
            "Rewrite the text in new words and sentence structures while keeping its full meaning and roughly its length."
        }
    }
}

/// Prompt for a single rewrite of `text`.
pub fn paraphrase_prompt(text: &str, config: &SummarizationConfig) -> String {
    format!(
        r#"TEXT (TO BE REWRITTEN):
-----------------------------
{text}
-----------------------------

{task}
- {tone}
- {format}
- Return only the rewritten text.
{faithful}
{dont_tell_me}"#,
        text = text,
        task = intent_instructions(config.intent),
        tone = tone_instructions(config.tone),
        format = format_instructions(config.output_format),
        faithful = STAY_FAITHFUL,
        dont_tell_me = DONT_TELL_ME,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LengthPreset, Mode};

    #[test]
    fn test_grammar_intent_changes_task() {
        let config = SummarizationConfig::new(Mode::Paraphrase, LengthPreset::Medium)
            .with_intent(Intent::Grammar);
        let prompt = paraphrase_prompt("teh cat sat", &config);
        assert!(prompt.contains("Correct spelling"));
        assert!(prompt.contains("teh cat sat"));
    }
}
