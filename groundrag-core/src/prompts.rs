//! Instruction templates for the reasoning stages.
//!
//! Each template is a system message plus a user message with `{placeholder}`
//! slots. Rendering is a single pass: substituted values are never scanned for
//! further placeholders, so passage text containing braces is safe.

use crate::types::{ConversationTurn, GradedPassage, Passage};
use std::fmt::Write;

/// Fixed sentence the generator must return when the evidence is insufficient.
pub const REFUSAL_SENTENCE: &str = "I apologize but I could not find an answer to your question.";

/// A parameterized system + user prompt pair.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

/// A rendered template, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    /// Fill the placeholders of both messages. Unknown placeholders are kept verbatim.
    pub fn render(&self, vars: &[(&str, &str)]) -> RenderedPrompt {
        RenderedPrompt {
            system: render_str(self.system, vars),
            user: render_str(self.user, vars),
        }
    }

    /// Placeholder names used by the user message, in order of appearance.
    pub fn placeholders(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut rest = self.user;
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) if is_placeholder_name(&after[..end]) => {
                    if !names.contains(&&after[..end]) {
                        names.push(&after[..end]);
                    }
                    rest = &after[end + 1..];
                }
                _ => rest = after,
            }
        }
        names
    }
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

fn render_str(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (end, *value))
        });
        match replaced {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render passages as tagged blocks for inclusion in a prompt.
pub fn format_passages<'a>(passages: impl IntoIterator<Item = &'a Passage>) -> String {
    let mut out = String::new();
    for passage in passages {
        let _ = writeln!(out, "<doc id=\"{}\">\n{}\n</doc>", passage.id, passage.text.trim());
    }
    out
}

/// Render the passages of a grounding set.
pub fn format_grounding(grounding: &[GradedPassage]) -> String {
    format_passages(grounding.iter().map(|g| g.passage.as_ref()))
}

/// Render conversation turns one per line, oldest first.
pub fn format_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub const CONTEXTUALIZER: PromptTemplate = PromptTemplate {
    name: "contextualizer",
    system: "You rewrite follow-up queries into standalone queries. You never answer them.\n\
Given the conversation history and the latest user query, which may refer to earlier \
turns, produce a query that can be understood without the history. Keep the user's \
intent intact. If the query is already standalone, return it unchanged.\n\
Reply with the rewritten query only.\n\n\
Examples:\n\
Query: 'and the second one?' after a list of emission scopes -> 'What is Scope 2 emissions?'\n\
Query: 'The weather is bad today.' -> 'The weather is bad today.'",
    user: "History:\n<history>\n{history}\n</history>\n\nUser query: <query>{question}</query>",
};

pub const GRADER: PromptTemplate = PromptTemplate {
    name: "grader",
    system: "You assess whether a retrieved document is relevant to a user question.\n\
A document is relevant if it contains keywords or meaning related to the question, \
including partial information that helps answer it. The goal is to filter out \
erroneous retrievals, not to be stringent.\n\
Reply with JSON: {\"relevant\": true|false, \"rationale\": \"<one short sentence>\"}.",
    user: "Retrieved document:\n\n{document}\n\nUser question: {question}",
};

pub const GENERATOR: PromptTemplate = PromptTemplate {
    name: "generator",
    system: "You answer questions strictly from the retrieved documents.\n\
Read every document closely; the answer may be in any of them, including those in the middle. \
If parts of the answer appear in several documents, include all of them. \
Use only what the documents state and make no assumptions. \
If the documents do not contain the answer, reply exactly: \"{refusal}\"",
    user: "Retrieved documents:\n\n<docs>\n{documents}</docs>\n\nUser question: <question>{question}</question>",
};

pub const REGENERATOR: PromptTemplate = PromptTemplate {
    name: "regenerator",
    system: "You answer questions strictly from the retrieved documents.\n\
Your previous answer to this question contained claims the documents do not support. \
Answer again using only statements you can trace to a document.\n\
Read every document closely; the answer may be in any of them, including those in the middle. \
If parts of the answer appear in several documents, include all of them. \
If the documents do not contain the answer, reply exactly: \"{refusal}\"",
    user: "Retrieved documents:\n\n<docs>\n{documents}</docs>\n\nUser question: <question>{question}</question>",
};

pub const HALLUCINATION: PromptTemplate = PromptTemplate {
    name: "hallucination",
    system: "You check whether an answer is grounded in a set of facts.\n\
The answer is grounded only if every claim it makes can be traced to the facts. \
A single unsupported claim makes the whole answer ungrounded.\n\
Reply with JSON: {\"grounded\": true|false}.",
    user: "Set of facts:\n\n<facts>\n{documents}</facts>\n\nAnswer: <answer>{answer}</answer>",
};

pub const KEYWORDS: PromptTemplate = PromptTemplate {
    name: "keywords",
    system: "Extract only the essential search keywords from the user query.\n\
Reply with JSON: {\"keywords\": [\"keyword1\", \"keyword2\"]}.",
    user: "User query: <query>{question}</query>",
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PassageMetadata;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let rendered = GRADER.render(&[("document", "Scope 3 covers..."), ("question", "What is Scope 3?")]);
        assert!(rendered.user.contains("Scope 3 covers..."));
        assert!(rendered.user.ends_with("What is Scope 3?"));
        assert!(rendered.system.contains("{\"relevant\""));
    }

    #[test]
    fn test_render_is_single_pass() {
        let rendered = KEYWORDS.render(&[("question", "what does {question} mean?")]);
        assert_eq!(rendered.user, "User query: <query>what does {question} mean?</query>");
    }

    #[test]
    fn test_generator_embeds_refusal_sentence() {
        let rendered = GENERATOR.render(&[("refusal", REFUSAL_SENTENCE), ("documents", ""), ("question", "q")]);
        assert!(rendered.system.contains(REFUSAL_SENTENCE));
        let regen = REGENERATOR.render(&[("refusal", REFUSAL_SENTENCE)]);
        assert!(regen.system.contains("previous answer"));
        assert!(regen.system.contains(REFUSAL_SENTENCE));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(CONTEXTUALIZER.placeholders(), vec!["history", "question"]);
        assert_eq!(HALLUCINATION.placeholders(), vec!["documents", "answer"]);
        assert_eq!(KEYWORDS.placeholders(), vec!["question"]);
    }

    #[test]
    fn test_format_passages_and_history() {
        let p = Passage::new("p1", "  Scope 3 emissions.  ", PassageMetadata::default());
        assert_eq!(format_passages([&p]), "<doc id=\"p1\">\nScope 3 emissions.\n</doc>\n");

        let turns = vec![
            ConversationTurn::user("list the scopes"),
            ConversationTurn::assistant("Scope 1, 2 and 3."),
        ];
        assert_eq!(format_history(&turns), "user: list the scopes\nassistant: Scope 1, 2 and 3.");
    }
}
