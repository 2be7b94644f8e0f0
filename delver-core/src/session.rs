//! Session model: iteration records, aggregated state and invariants
//!
//! A `Session` is created by the orchestrator, exclusively mutated by it
//! during a run, and persisted by the session store at every iteration
//! boundary. `AggregatedState` is a derived projection over the iteration
//! list and is recomputed after any rollback.

use crate::error::{DelverError, DelverResult, ErrorContext};
use crate::types::{MessageLog, ResearchSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a research session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Error => "error",
        }
    }

    /// Whether a session in this status may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Interrupted)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted page condensation relative to a particular query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Source page URL
    pub url: String,
    /// The search query that surfaced the page
    pub query: String,
    /// Extracted summary text
    pub text: String,
}

impl ContextSummary {
    pub fn new(
        url: impl Into<String>,
        query: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            query: query.into(),
            text: text.into(),
        }
    }

    /// Render in the `url:...\ncontext:...` form used inside prompts
    pub fn render(&self) -> String {
        format!("url:{}\ncontext:{}", self.url, self.text)
    }
}

/// Record of one completed planning-to-judgement cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based, dense, strictly increasing
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Plan consumed by this iteration (absent when planning is disabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Search queries executed in this iteration
    pub queries: Vec<String>,
    /// Context summaries gathered, in completion order
    pub contexts: Vec<ContextSummary>,
    /// Plan produced for the next iteration (null when terminal)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_plan: Option<String>,
}

/// Running union across completed iterations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedState {
    /// Every query ever executed, deduplicated preserving first-seen order
    pub queries: Vec<String>,
    /// All gathered context summaries, in iteration order
    pub contexts: Vec<ContextSummary>,
    /// Most recent plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan: Option<String>,
    /// Highest completed iteration number; 0 when none has completed
    pub last_completed_iteration: u32,
}

impl AggregatedState {
    /// Record queries, preserving first-seen order
    pub fn record_queries<'a>(&mut self, queries: impl IntoIterator<Item = &'a str>) {
        for query in queries {
            if !self.queries.iter().any(|q| q == query) {
                self.queries.push(query.to_string());
            }
        }
    }

    /// Combined context text used in judging and report prompts
    pub fn combined_contexts(&self) -> String {
        self.contexts
            .iter()
            .map(ContextSummary::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Deterministically recompute the projection from an iteration list.
    /// Used after rollback so the aggregate never drifts from the records.
    pub fn rebuild(iterations: &[IterationRecord]) -> Self {
        let mut state = AggregatedState::default();
        for record in iterations {
            state.record_queries(record.queries.iter().map(String::as_str));
            state.contexts.extend(record.contexts.iter().cloned());
            state.last_plan = record.next_plan.clone().or_else(|| record.plan.clone());
            state.last_completed_iteration = record.iteration;
        }
        state
    }
}

/// The persistent record of a research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier (uuid v4)
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub user_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub settings: ResearchSettings,
    #[serde(default)]
    pub messages: MessageLog,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub aggregated: AggregatedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Session {
    pub fn new(
        user_query: impl Into<String>,
        system_instruction: Option<String>,
        settings: ResearchSettings,
        user_id: Option<String>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Running,
            user_query: user_query.into(),
            system_instruction,
            settings,
            messages: MessageLog::new(),
            iterations: Vec::new(),
            aggregated: AggregatedState::default(),
            final_report: None,
            error_message: None,
        }
    }

    /// Append a completed iteration and fold it into the aggregate
    pub fn append_iteration(&mut self, record: IterationRecord) {
        self.aggregated
            .record_queries(record.queries.iter().map(String::as_str));
        self.aggregated.contexts.extend(record.contexts.iter().cloned());
        self.aggregated.last_plan = record.next_plan.clone().or_else(|| record.plan.clone());
        self.aggregated.last_completed_iteration = record.iteration;
        self.iterations.push(record);
    }

    pub fn mark_completed(&mut self, report: String) {
        self.final_report = Some(report);
        self.status = SessionStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_interrupted(&mut self) {
        self.status = SessionStatus::Interrupted;
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.status = SessionStatus::Error;
        self.ended_at = Some(Utc::now());
    }

    /// Verify the structural invariants of the record.
    pub fn check_invariants(&self) -> DelverResult<()> {
        let fail = |message: String| {
            Err(DelverError::Invariant {
                message,
                context: ErrorContext::new("session").with_operation("check_invariants"),
            })
        };

        for (idx, record) in self.iterations.iter().enumerate() {
            let expected = idx as u32 + 1;
            if record.iteration != expected {
                return fail(format!(
                    "iteration numbering not dense: expected {}, found {}",
                    expected, record.iteration
                ));
            }
        }

        let highest = self.iterations.last().map(|r| r.iteration).unwrap_or(0);
        if self.aggregated.last_completed_iteration != highest {
            return fail(format!(
                "last_completed_iteration {} does not match highest record {}",
                self.aggregated.last_completed_iteration, highest
            ));
        }

        if self.status == SessionStatus::Completed
            && (self.final_report.is_none() || self.ended_at.is_none())
        {
            return fail("completed session without final report or end time".to_string());
        }

        if self.status == SessionStatus::Error && self.error_message.is_none() {
            return fail("error session without error message".to_string());
        }

        if self.status.is_resumable()
            && self.settings.with_planning
            && !self.iterations.is_empty()
            && self.aggregated.last_plan.is_none()
        {
            return fail("resumable session with completed iterations but no plan".to_string());
        }

        for summary in &self.aggregated.contexts {
            if !self.aggregated.queries.iter().any(|q| q == &summary.query) {
                return fail(format!(
                    "context summary query '{}' missing from aggregated queries",
                    summary.query
                ));
            }
        }

        Ok(())
    }
}

/// Session information for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub current_iteration: u32,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_query: session.user_query.clone(),
            user_id: session.user_id.clone(),
            status: session.status,
            started_at: session.started_at,
            ended_at: session.ended_at,
            current_iteration: session.aggregated.last_completed_iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32, queries: &[&str], next_plan: Option<&str>) -> IterationRecord {
        IterationRecord {
            iteration: n,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            plan: Some(format!("plan {}", n)),
            queries: queries.iter().map(|q| q.to_string()).collect(),
            contexts: queries
                .iter()
                .map(|q| ContextSummary::new(format!("https://example.com/{}", q), *q, "ctx"))
                .collect(),
            next_plan: next_plan.map(|p| p.to_string()),
        }
    }

    #[test]
    fn append_iteration_updates_aggregate() {
        let mut session = Session::new("q", None, ResearchSettings::default(), None);
        session.append_iteration(record(1, &["a", "b"], Some("next")));

        assert_eq!(session.aggregated.last_completed_iteration, 1);
        assert_eq!(session.aggregated.queries, vec!["a", "b"]);
        assert_eq!(session.aggregated.last_plan.as_deref(), Some("next"));
        session.check_invariants().unwrap();
    }

    #[test]
    fn queries_dedup_preserves_first_seen_order() {
        let mut state = AggregatedState::default();
        state.record_queries(["b", "a", "b", "c", "a"]);
        assert_eq!(state.queries, vec!["b", "a", "c"]);
    }

    #[test]
    fn rebuild_matches_incremental_fold() {
        let mut session = Session::new("q", None, ResearchSettings::default(), None);
        session.append_iteration(record(1, &["a"], Some("p2")));
        session.append_iteration(record(2, &["b", "a"], None));

        let rebuilt = AggregatedState::rebuild(&session.iterations);
        assert_eq!(rebuilt, session.aggregated);
    }

    #[test]
    fn invariants_catch_sparse_numbering() {
        let mut session = Session::new("q", None, ResearchSettings::default(), None);
        session.append_iteration(record(1, &["a"], Some("p")));
        session.iterations[0].iteration = 3;
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn invariants_catch_completed_without_report() {
        let mut session = Session::new("q", None, ResearchSettings::default(), None);
        session.status = SessionStatus::Completed;
        session.ended_at = Some(Utc::now());
        assert!(session.check_invariants().is_err());

        session.final_report = Some("report".to_string());
        session.check_invariants().unwrap();
    }

    #[test]
    fn summary_projection() {
        let mut session = Session::new("query", None, ResearchSettings::default(), Some("u1".into()));
        session.append_iteration(record(1, &["a"], Some("p")));
        let summary = SessionSummary::from(&session);
        assert_eq!(summary.current_iteration, 1);
        assert_eq!(summary.user_id.as_deref(), Some("u1"));
        assert_eq!(summary.status, SessionStatus::Running);
    }
}
