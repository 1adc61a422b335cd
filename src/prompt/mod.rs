mod common;
mod paraphrase;
mod summarization;

pub use common::*;
pub use paraphrase::paraphrase_prompt;
pub use summarization::{chunk_summary_prompt, combine_summaries_prompt, summary_prompt};
