//! Question handling ahead of retrieval: transcript rendering, subject
//! routing, follow-up condensation and prompt templates.

pub mod history;
pub mod prompts;
pub mod query_condenser;
pub mod subject_router;

pub use history::format_chat_history;
pub use prompts::{build_answer_prompt, NOT_IN_SYLLABUS};
pub use query_condenser::QueryCondenser;
pub use subject_router::{redirect_message, SubjectRouter};
