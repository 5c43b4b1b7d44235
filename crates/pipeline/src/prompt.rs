//! Prompt rendering. Pure: same inputs, same prompt.

use crate::context::ContextEntry;

pub struct PromptBuilder {
    language: String,
}

impl PromptBuilder {
    /// `language` is the language the answer must be written in.
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn build_prompt(&self, serialized_context: &str, question: &str, entries: &[ContextEntry]) -> String {
        let context = if serialized_context.trim().is_empty() {
            "[]"
        } else {
            serialized_context
        };

        let mut prompt = format!(
            "# Context\n{context}\n\n\
             # Question\n{question}\n\n\
             # Instructions\n\
             - Use only the above context to answer the question.\n\
             - Return your answer in valid Markdown (no JSON, no extra explanations).\n\
             - If information is missing from the context, state clearly what cannot be answered.\n\
             - Reply in {language}, concisely, organized with headings, bullets, or tables as needed.\n",
            language = self.language,
        );

        let references = unique_source_files(entries);
        if !references.is_empty() {
            prompt.push_str("\n## References\n");
            for source in references {
                prompt.push_str("- ");
                prompt.push_str(source);
                prompt.push('\n');
            }
        }

        prompt
    }
}

/// Non-empty source files in first-seen order, each once.
pub fn unique_source_files(entries: &[ContextEntry]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for entry in entries {
        let source = entry.source_file.as_str();
        if !source.is_empty() && !seen.contains(&source) {
            seen.push(source);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str) -> ContextEntry {
        ContextEntry {
            chunk_id: "C001".into(),
            source_file: source.into(),
            section_heading: String::new(),
            text: String::new(),
            similarity: 0.5,
        }
    }

    fn references_of(prompt: &str) -> Vec<&str> {
        prompt
            .split("## References\n")
            .nth(1)
            .map(|refs| refs.lines().filter_map(|l| l.strip_prefix("- ")).collect())
            .unwrap_or_default()
    }

    #[test]
    fn sections_in_order() {
        let prompt = PromptBuilder::new("English").build_prompt("[\n]", "What is X?", &[]);
        let context = prompt.find("# Context").unwrap();
        let question = prompt.find("# Question").unwrap();
        let instructions = prompt.find("# Instructions").unwrap();
        assert!(context < question && question < instructions);
        assert!(prompt.contains("# Question\nWhat is X?\n"));
        assert!(prompt.contains("Reply in English"));
    }

    #[test]
    fn blank_context_renders_empty_array() {
        let prompt = PromptBuilder::new("English").build_prompt("  \n", "q", &[]);
        assert!(prompt.starts_with("# Context\n[]\n"));
    }

    #[test]
    fn references_are_unique_in_first_seen_order() {
        let entries = vec![entry("A.md"), entry("B.md"), entry("A.md")];
        let prompt = PromptBuilder::new("English").build_prompt("[]", "q", &entries);
        assert_eq!(references_of(&prompt), vec!["A.md", "B.md"]);
    }

    #[test]
    fn references_omitted_without_source_files() {
        let entries = vec![entry(""), entry("")];
        let prompt = PromptBuilder::new("English").build_prompt("[]", "q", &entries);
        assert!(!prompt.contains("## References"));
    }

    #[test]
    fn deterministic() {
        let entries = vec![entry("A.md")];
        let builder = PromptBuilder::new("Persian");
        assert_eq!(
            builder.build_prompt("[]", "q", &entries),
            builder.build_prompt("[]", "q", &entries)
        );
        assert!(builder.build_prompt("[]", "q", &entries).contains("Reply in Persian"));
    }
}
