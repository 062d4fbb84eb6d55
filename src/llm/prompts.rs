//! Default prompt texts. Templates use `{text}`, `{source}` and `{context}` placeholders.

use serde::{Deserialize, Serialize};

/// Replaceable prompt templates and system prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    /// Search query generation.
    pub query: String,
    /// System prompt for query generation.
    pub query_system: String,
    /// Main-claim summary.
    pub summary: String,
    /// System prompt for summaries.
    pub summary_system: String,
    /// Claim/source comparison with a fenced `rating` block.
    pub explain: String,
    /// System prompt for comparisons.
    pub explain_system: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            query: concat!(
                "{context}```text\n{text}\n```\n\n",
                "For the provided text, generate a web search engine query that would return the most ",
                "relevant results on the topic. The query should be concise and in the text's language. ",
                "Be very specific to make sure to get only results that are immediately relevant to the ",
                "text above. Respond with the query only: no disclaimer, introduction, or conclusion.\n",
            )
            .to_string(),
            query_system: "You are an expert at generating web search engine queries to verify information."
                .to_string(),
            summary: concat!(
                "```text\n{text}\n```\n\n",
                "Extract the main claim from the text above. If time, location, and people are available, ",
                "mention them explicitly and replace relative references with absolute ones. Respond in the ",
                "text's language with one single sentence only: no disclaimer, introduction, or conclusion.\n",
            )
            .to_string(),
            summary_system: "You are an expert at summarizing texts, focusing on key information and facts."
                .to_string(),
            explain: concat!(
                "```text\n{text}\n```\n\n```source\n{source}\n```\n\n",
                "Compare the above text against the source. Consider only statements about the same ",
                "things, objects, or subjects and ignore all others. Answer with one fenced block tagged ",
                "`rating`. Its first line is a single integer from -2 (the source clearly contradicts the ",
                "text) to 2 (the source clearly supports it). The second line is one sentence in the text's ",
                "language naming the clearest agreement or contradiction.\n",
            )
            .to_string(),
            explain_system: "You are an expert at spotting conflicting statements.".to_string(),
        }
    }
}

impl PromptSet {
    /// Query prompt, with optional page context in its own fenced block.
    pub fn render_query(&self, text: &str, context: Option<&str>) -> String {
        let context = context
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| format!("```\n{c}\n```\n\n"))
            .unwrap_or_default();
        self.query.replace("{context}", &context).replace("{text}", text)
    }

    /// Summary prompt.
    pub fn render_summary(&self, text: &str) -> String {
        self.summary.replace("{text}", text)
    }

    /// Comparison prompt.
    pub fn render_explain(&self, text: &str, source: &str) -> String {
        self.explain.replace("{text}", text).replace("{source}", source)
    }
}
