//! Event chunks emitted by a research run

use delver_core::ContextSummary;

/// One element of the finite chunk sequence a run produces. The terminal
/// marker is emitted exactly once at the end of a successful run; on error
/// an error chunk replaces it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchChunk {
    /// Announces the session id; always the first chunk of a run
    SessionId(String),
    /// Human-readable progress line
    Status(String),
    /// A research or writing plan
    Plan(String),
    /// One generated search query
    QueryLine(String),
    /// An extracted context summary
    Context(ContextSummary),
    /// A fragment of the final report
    ReportFragment(String),
    /// Fatal failure; replaces the terminal marker
    Error(String),
    /// Terminal marker of a successful run
    Done,
}

impl ResearchChunk {
    /// Text rendition used by the streaming protocol adapter
    pub fn render(&self) -> String {
        match self {
            ResearchChunk::SessionId(id) => id.clone(),
            ResearchChunk::Status(text) => format!("{}\n\n", text),
            ResearchChunk::Plan(plan) => format!("{}\n\n", plan),
            ResearchChunk::QueryLine(query) => format!("Search query: {}\n", query),
            ResearchChunk::Context(summary) => {
                format!("Extracted context from {}\n\n", summary.url)
            }
            ResearchChunk::ReportFragment(fragment) => fragment.clone(),
            ResearchChunk::Error(message) => format!("Error: {}\n", message),
            ResearchChunk::Done => String::new(),
        }
    }
}
