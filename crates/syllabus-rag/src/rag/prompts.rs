//! Prompt templates for classification, condensation and grounded answering.

use crate::types::RetrievedPassage;

/// Fixed reply when the context does not contain the answer.
pub const NOT_IN_SYLLABUS: &str = "The requested information is not covered in the current syllabus.";

pub const SUBJECT_CLASSIFIER_TEMPLATE: &str = r#"You are a G.C.E. Advanced Level science subject classifier.

Given a student's question, determine which subject it belongs to.
You must reply with ONLY a single word, one of: biology, physics, chemistry, general.

Rules:
- "general" means it could apply to multiple subjects or is not subject-specific.
- Choose the MOST specific subject if it clearly belongs to one.
- Do NOT explain your answer. Just output one word.

Question: {question}
Subject:"#;

pub const CONDENSE_TEMPLATE: &str = r#"Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:"#;

pub const QA_TEMPLATE: &str = r#"
You are a helpful AI assistant specializing in G.C.E. Advanced Level science education.

Instructions:
- Answer ONLY using the provided context below.
- Do NOT use any outside knowledge or training data.
- If the answer is not explicitly found in the context, respond ONLY with:
  "{refusal}"
- Do NOT add any explanation or extra text when declining.
- If the answer is found, provide a comprehensive, detailed response using Markdown formatting.

Context:
{context}

Question:
{question}

Answer:
"#;

pub fn build_classifier_prompt(question: &str) -> String {
    SUBJECT_CLASSIFIER_TEMPLATE.replace("{question}", question)
}

pub fn build_condense_prompt(transcript: &str, question: &str) -> String {
    CONDENSE_TEMPLATE
        .replace("{chat_history}", transcript)
        .replace("{question}", question)
}

/// Grounded answer prompt. Passage contents are joined by a blank line in rank order.
pub fn build_answer_prompt(passages: &[RetrievedPassage], question: &str) -> String {
    let context = passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    QA_TEMPLATE
        .replace("{refusal}", NOT_IN_SYLLABUS)
        .replace("{context}", &context)
        .replace("{question}", question)
}
