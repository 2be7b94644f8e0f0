//! Research orchestration engine
//!
//! One driver task per run walks the state machine Init -> Planning ->
//! Iterating(n) -> Writing -> Done, fanning out bounded per-URL sub-tasks
//! inside each iteration and checkpointing the session at every iteration
//! boundary. The run's output is a finite chunk sequence on a bounded
//! channel; cancellation is cooperative at every suspension point.

use crate::pipeline::LinkProcessor;
use crate::planner::{parse_query_list, strip_think_tags, QueryPlanOutcome, DONE_SENTINEL};
use crate::prompts;
use crate::types::ResearchChunk;
use chrono::Utc;
use delver_core::{
    DelverError, DelverResult, ErrorContext, IterationRecord, ResearchSettings, RetryConfig, Role,
    Session,
};
use delver_fetch::{AdmissionController, PageSource, SearchBackend};
use delver_llm::{LlmClient, LlmOptions};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Engine-level knobs shared by all runs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between iterations
    pub operation_wait_time: Duration,
    pub default_model_ctx: Option<u32>,
    pub reason_model_ctx: Option<u32>,
    /// Retry budget for per-URL fetches
    pub fetch_retry: RetryConfig,
    /// Chunk channel capacity
    pub chunk_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_wait_time: Duration::ZERO,
            default_model_ctx: None,
            reason_model_ctx: None,
            fetch_retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 500,
                max_delay_ms: 5_000,
                backoff_multiplier: 2.0,
                jitter: true,
            },
            chunk_buffer: 64,
        }
    }
}

/// Input for a fresh research run
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub user_query: String,
    pub system_instruction: Option<String>,
    pub settings: ResearchSettings,
    pub user_id: Option<String>,
}

/// A started run: the chunk sequence plus its cancellation token
pub struct ResearchRun {
    pub session_id: String,
    pub chunks: mpsc::Receiver<ResearchChunk>,
    pub cancel: CancellationToken,
    pub handle: tokio::task::JoinHandle<()>,
}

pub struct ResearchEngine {
    llm: Arc<LlmClient>,
    search: Arc<dyn SearchBackend>,
    pages: Arc<dyn PageSource>,
    admission: Arc<AdmissionController>,
    store: Arc<delver_persist::SessionStore>,
    config: EngineConfig,
}

fn cancelled(operation: &str) -> DelverError {
    DelverError::Cancelled {
        operation: operation.to_string(),
        context: ErrorContext::new("research_engine"),
    }
}

impl ResearchEngine {
    pub fn new(
        llm: Arc<LlmClient>,
        search: Arc<dyn SearchBackend>,
        pages: Arc<dyn PageSource>,
        admission: Arc<AdmissionController>,
        store: Arc<delver_persist::SessionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            search,
            pages,
            admission,
            store,
            config,
        }
    }

    pub fn store(&self) -> Arc<delver_persist::SessionStore> {
        self.store.clone()
    }

    /// Start a fresh session. The session record is committed before the
    /// run begins so the announced id is always resolvable.
    pub async fn start(self: &Arc<Self>, request: ResearchRequest) -> DelverResult<ResearchRun> {
        let mut session = Session::new(
            request.user_query,
            request.system_instruction.clone(),
            request.settings,
            request.user_id,
        );
        if let Some(instruction) = &request.system_instruction {
            session.messages.add(Role::System, instruction.clone());
        }
        session.messages.add(Role::User, session.user_query.clone());

        self.store.save(&session).await?;
        info!(
            session_id = session.session_id.as_str(),
            query = session.user_query.as_str(),
            "Research session created"
        );
        Ok(self.spawn_run(session))
    }

    /// Resume an existing session from its last completed iteration.
    pub async fn resume(self: &Arc<Self>, session_id: &str) -> DelverResult<ResearchRun> {
        let mut session = self.store.resume(session_id).await?;
        session.status = delver_core::SessionStatus::Running;
        session.ended_at = None;
        self.store.save(&session).await?;
        info!(
            session_id = session_id,
            from_iteration = session.aggregated.last_completed_iteration,
            "Research session resumed"
        );
        Ok(self.spawn_run(session))
    }

    fn spawn_run(self: &Arc<Self>, session: Session) -> ResearchRun {
        let (tx, rx) = mpsc::channel(self.config.chunk_buffer);
        let cancel = CancellationToken::new();
        let session_id = session.session_id.clone();
        let engine = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { engine.drive(session, tx, token).await });

        ResearchRun {
            session_id,
            chunks: rx,
            cancel,
            handle,
        }
    }

    async fn drive(
        self: Arc<Self>,
        mut session: Session,
        tx: mpsc::Sender<ResearchChunk>,
        cancel: CancellationToken,
    ) {
        let _ = tx
            .send(ResearchChunk::SessionId(session.session_id.clone()))
            .await;

        match self.run_session(&mut session, &tx, &cancel).await {
            Ok(()) => {
                let _ = tx.send(ResearchChunk::Done).await;
            }
            Err(DelverError::Cancelled { .. }) => {
                info!(
                    session_id = session.session_id.as_str(),
                    "Run cancelled, persisting interrupted session"
                );
                session.mark_interrupted();
                if let Err(e) = self.store.save(&session).await {
                    error!(error = %e, "Failed to persist interrupted session");
                }
                let _ = tx
                    .send(ResearchChunk::Status("Research interrupted.".to_string()))
                    .await;
            }
            Err(err) => {
                err.log();
                session.mark_error(err.to_string());
                if let Err(e) = self.store.save(&session).await {
                    error!(error = %e, "Failed to persist errored session");
                }
                let _ = tx.send(ResearchChunk::Error(err.to_string())).await;
            }
        }
    }

    /// Run a suspendable step under the cancellation token.
    async fn guard<T>(
        cancel: &CancellationToken,
        operation: &str,
        fut: impl std::future::Future<Output = DelverResult<T>>,
    ) -> DelverResult<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled(operation)),
            result = fut => result,
        }
    }

    async fn run_session(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<ResearchChunk>,
        cancel: &CancellationToken,
    ) -> DelverResult<()> {
        let settings = session.settings.clone();
        let query = session.user_query.clone();

        // Planning state: only a fresh planning-enabled session without a
        // standing plan passes through here.
        if settings.with_planning && session.aggregated.last_plan.is_none() {
            let _ = tx
                .send(ResearchChunk::Status(
                    "Generating initial research plan...".to_string(),
                ))
                .await;
            let raw = Self::guard(
                cancel,
                "initial_plan",
                self.llm.complete(
                    prompts::plan_initial(&query).to_chat_messages(),
                    &settings.reason_model,
                    self.config.reason_model_ctx,
                    LlmOptions::default(),
                ),
            )
            .await?;
            let plan = strip_think_tags(&raw);
            let _ = tx.send(ResearchChunk::Plan(plan.clone())).await;
            session.aggregated.last_plan = Some(plan);
            self.store.save(session).await?;
        }

        let processor = LinkProcessor {
            llm: self.llm.clone(),
            pages: self.pages.clone(),
            admission: self.admission.clone(),
            fetch_retry: self.config.fetch_retry.clone(),
            default_model_ctx: self.config.default_model_ctx,
            reason_model_ctx: self.config.reason_model_ctx,
        };

        let max_iterations = settings.max_iterations;
        while session.aggregated.last_completed_iteration < max_iterations {
            if cancel.is_cancelled() {
                return Err(cancelled("iteration_boundary"));
            }

            let n = session.aggregated.last_completed_iteration + 1;
            let started_at = Utc::now();
            let consumed_plan = session.aggregated.last_plan.clone();
            let _ = tx
                .send(ResearchChunk::Status(format!(
                    "=== Iteration {}/{} ===",
                    n, max_iterations
                )))
                .await;

            // 1. Candidate queries from the standing plan and history.
            let prior_contexts = session.aggregated.combined_contexts();
            let response = Self::guard(
                cancel,
                "generate_queries",
                self.llm.complete(
                    prompts::queries_from_plan(
                        &query,
                        consumed_plan.as_deref(),
                        &session.aggregated.queries,
                        &prior_contexts,
                    )
                    .to_chat_messages(),
                    &settings.default_model,
                    self.config.default_model_ctx,
                    LlmOptions::default(),
                ),
            )
            .await?;

            let queries = match parse_query_list(&response) {
                QueryPlanOutcome::Done => {
                    let _ = tx
                        .send(ResearchChunk::Status(
                            "Research complete. Generating final report...".to_string(),
                        ))
                        .await;
                    break;
                }
                QueryPlanOutcome::Empty => {
                    let _ = tx
                        .send(ResearchChunk::Status(
                            "No new search queries. Completing research...".to_string(),
                        ))
                        .await;
                    break;
                }
                QueryPlanOutcome::Queries(queries) => queries,
            };
            for candidate in &queries {
                let _ = tx.send(ResearchChunk::QueryLine(candidate.clone())).await;
            }

            // 2. Metasearch fan-out, bounded per query, deduplicated by URL
            // preserving first-seen order.
            let search_futures = queries.iter().map(|candidate| {
                let search = self.search.clone();
                let candidate = candidate.clone();
                async move {
                    match search.search(&candidate).await {
                        Ok(links) => links,
                        Err(err) => {
                            warn!(query = candidate.as_str(), error = %err, "Search failed");
                            Vec::new()
                        }
                    }
                }
            });
            let results: Vec<Vec<String>> = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled("search")),
                results = futures::future::join_all(search_futures) => results,
            };

            let mut seen = HashSet::new();
            let mut candidates: Vec<(String, String)> = Vec::new();
            for (idx, links) in results.iter().enumerate() {
                for link in links.iter().take(settings.max_search_items) {
                    if seen.insert(link.clone()) {
                        candidates.push((link.clone(), queries[idx].clone()));
                    }
                }
            }

            let _ = tx
                .send(ResearchChunk::Status(format!(
                    "Processing {} unique links...",
                    candidates.len()
                )))
                .await;

            // 3. Per-URL sub-tasks, started in list order, collected in
            // completion order (deliberately nondeterministic).
            let mut tasks = FuturesUnordered::new();
            for (url, search_query) in candidates {
                tasks.push(processor.process_link(
                    url,
                    &query,
                    search_query,
                    &settings,
                    tx,
                    cancel,
                ));
            }
            let mut contexts = Vec::new();
            while let Some(outcome) = tasks.next().await {
                if let Some(summary) = outcome {
                    contexts.push(summary);
                }
            }
            drop(tasks);

            if cancel.is_cancelled() {
                return Err(cancelled("link_processing"));
            }

            if contexts.is_empty() {
                let _ = tx
                    .send(ResearchChunk::Status(
                        "No useful contexts found in this iteration.".to_string(),
                    ))
                    .await;
            }

            // 5. Judge: refine the plan for iteration n+1, or stop. The
            // judge may emit the terminal sentinel even with planning
            // disabled; without planning the query step is the judge.
            let mut next_plan = None;
            let mut judge_done = false;
            if settings.with_planning {
                let mut combined = prior_contexts.clone();
                for summary in &contexts {
                    combined.push('\n');
                    combined.push_str(&summary.render());
                }
                let raw = Self::guard(
                    cancel,
                    "judge",
                    self.llm.complete(
                        prompts::plan_judge(
                            &query,
                            &combined,
                            consumed_plan.as_deref().unwrap_or(""),
                        )
                        .to_chat_messages(),
                        &settings.reason_model,
                        self.config.reason_model_ctx,
                        LlmOptions::default(),
                    ),
                )
                .await?;
                let plan = strip_think_tags(&raw);
                if plan == DONE_SENTINEL {
                    judge_done = true;
                } else {
                    let _ = tx.send(ResearchChunk::Plan(plan.clone())).await;
                    next_plan = Some(plan);
                }
            }

            // 6. Finalize the record and checkpoint. A checkpoint failure
            // is fatal for the run.
            let record = IterationRecord {
                iteration: n,
                started_at,
                finished_at: Utc::now(),
                plan: consumed_plan,
                queries,
                contexts,
                next_plan,
            };
            session.append_iteration(record);
            session.check_invariants()?;
            self.store.save(session).await?;

            if judge_done {
                let _ = tx
                    .send(ResearchChunk::Status(
                        "Research complete. Generating final report...".to_string(),
                    ))
                    .await;
                break;
            }

            if !self.config.operation_wait_time.is_zero()
                && session.aggregated.last_completed_iteration < max_iterations
            {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled("iteration_wait")),
                    _ = tokio::time::sleep(self.config.operation_wait_time) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled("writing"));
        }

        // Writing phase: optional writing plan, then the report.
        let combined = session.aggregated.combined_contexts();
        let report = if session.aggregated.contexts.is_empty() {
            let _ = tx
                .send(ResearchChunk::Status(
                    "No evidence was retrieved; writing an empty-evidence report.".to_string(),
                ))
                .await;
            format!(
                "No evidence was retrieved for the query \"{}\". No pages could be fetched \
                 or judged useful, so no source-grounded report can be written.",
                query
            )
        } else {
            let writing_plan = if settings.with_planning {
                let raw = Self::guard(
                    cancel,
                    "writing_plan",
                    self.llm.complete(
                        prompts::writing_plan(&query, &combined).to_chat_messages(),
                        &settings.reason_model,
                        self.config.reason_model_ctx,
                        LlmOptions::default(),
                    ),
                )
                .await?;
                let plan = strip_think_tags(&raw);
                let _ = tx.send(ResearchChunk::Plan(plan.clone())).await;
                Some(plan)
            } else {
                None
            };

            let raw = Self::guard(
                cancel,
                "final_report",
                self.llm.complete(
                    prompts::final_report(
                        &query,
                        writing_plan.as_deref(),
                        &combined,
                        session.system_instruction.as_deref(),
                    )
                    .to_chat_messages(),
                    &settings.default_model,
                    self.config.default_model_ctx,
                    LlmOptions::default(),
                ),
            )
            .await?;

            if raw.trim().chars().count() < 200 {
                warn!(
                    session_id = session.session_id.as_str(),
                    report_len = raw.len(),
                    "Report implausibly short, emitting salvage text"
                );
                prompts::salvage_report(&raw, &query, writing_plan.as_deref(), &combined)
            } else {
                raw
            }
        };

        let _ = tx.send(ResearchChunk::ReportFragment(report.clone())).await;
        session.mark_completed(report);
        session.check_invariants()?;
        self.store.save(session).await?;
        info!(
            session_id = session.session_id.as_str(),
            iterations = session.iterations.len(),
            "Research session completed"
        );
        Ok(())
    }
}
