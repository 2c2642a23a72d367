use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Academic subject. Doubles as the vector namespace the passages live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Biology,
    Physics,
    Chemistry,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Biology, Subject::Physics, Subject::Chemistry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Biology => "biology",
            Self::Physics => "physics",
            Self::Chemistry => "chemistry",
        }
    }

    /// Capitalized form used in user-facing text: "physics" -> "Physics".
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Biology => "Biology",
            Self::Physics => "Physics",
            Self::Chemistry => "Chemistry",
        }
    }

    /// Comma-separated list of accepted subject names.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "biology" => Ok(Self::Biology),
            "physics" => Ok(Self::Physics),
            "chemistry" => Ok(Self::Chemistry),
            _ => Err(PipelineError::InvalidSubject(s.to_string())),
        }
    }
}

/// Classifier output: a concrete subject or the virtual "general" label.
/// `General` is never used as a storage or query namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectLabel {
    Subject(Subject),
    General,
}

impl SubjectLabel {
    /// Strict parse of a single classifier word. Anything else is `General`.
    pub fn from_label(raw: &str) -> Self {
        match raw {
            "biology" => Self::Subject(Subject::Biology),
            "physics" => Self::Subject(Subject::Physics),
            "chemistry" => Self::Subject(Subject::Chemistry),
            _ => Self::General,
        }
    }

    /// Returns the detected subject when it is concrete and differs from `declared`.
    pub fn redirect_target(&self, declared: Subject) -> Option<Subject> {
        match self {
            Self::Subject(detected) if *detected != declared => Some(*detected),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(s) => f.write_str(s.as_str()),
            Self::General => f.write_str("general"),
        }
    }
}

/// One prior exchange. Serialized as a two-element array `[question, answer]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPair(pub String, pub String);

impl TurnPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self(question.into(), answer.into())
    }

    pub fn question(&self) -> &str {
        &self.0
    }

    pub fn answer(&self) -> &str {
        &self.1
    }
}

/// Inbound request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub chat_history: Vec<TurnPair>,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            subject: subject.into(),
            chat_history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<TurnPair>) -> Self {
        self.chat_history = history;
        self
    }
}

/// Request after input validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub question: String,
    pub subject: Subject,
    pub history: Vec<TurnPair>,
}

impl TryFrom<ChatRequest> for ValidatedRequest {
    type Error = PipelineError;

    fn try_from(request: ChatRequest) -> Result<Self, Self::Error> {
        let question = sanitize_question(&request.question);
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }
        let subject = request.subject.parse::<Subject>()?;
        Ok(Self {
            question,
            subject,
            history: request.chat_history,
        })
    }
}

/// Trim and collapse newlines into spaces.
pub fn sanitize_question(raw: &str) -> String {
    raw.trim().replace(['\r', '\n'], " ")
}

/// A reference passage as stored in the subject namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
    pub subtopic: String,
    pub unit_number: u32,
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    pub content_type: String,
    pub image_url: Option<String>,
    pub latex: Option<String>,
}

/// Public projection of a passage sent to the client after the sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub content: String,
    pub subtopic: String,
    pub unit_number: u32,
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
}

impl From<&RetrievedPassage> for Citation {
    fn from(passage: &RetrievedPassage) -> Self {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        Self {
            content: passage.content.clone(),
            subtopic: passage.subtopic.clone(),
            unit_number: passage.unit_number,
            source_file: passage.source_file.clone(),
            page_start: passage.page_start,
            page_end: passage.page_end,
            content_type: passage.content_type.clone(),
            image_url: non_empty(&passage.image_url),
            latex: non_empty(&passage.latex),
        }
    }
}

/// Hard ceiling on citations sent to the client, whatever the configured limit.
pub const MAX_CITATIONS: usize = 2;

/// Take the first `limit` passages of the ranked list as citations, never
/// more than [`MAX_CITATIONS`].
pub fn select_citations(passages: &[RetrievedPassage], limit: usize) -> Vec<Citation> {
    passages
        .iter()
        .take(limit.min(MAX_CITATIONS))
        .map(Citation::from)
        .collect()
}

/// Finished exchange handed to the persistence layer once streaming completes.
#[derive(Debug, Clone, Serialize)]
pub struct AnsweredTurn {
    pub question: String,
    pub subject: Subject,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Set when the question was routed to another subject's assistant.
    pub redirected_to: Option<Subject>,
}
