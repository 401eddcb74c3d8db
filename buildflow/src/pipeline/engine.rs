//! The execution engine.
//!
//! Stages start as soon as all of their dependencies have succeeded, up to
//! the configured number of workers. Scheduling is driven by task
//! completion: the engine sleeps on a `FuturesUnordered` of stage tasks and
//! only wakes when one of them finishes.

use super::outcome::{RunOutcome, StageReport};
use super::{ExecutionPlan, StageSet};
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::StageStatus;
use crate::errors::{
    BuildflowError, PipelineValidationError, PlanError, StageFailedError, StageFailureCause,
};
use crate::events::{
    EventSink, RUN_FINISHED, RUN_STARTED, STAGE_BLOCKED, STAGE_FAILED, STAGE_SATISFIED,
    STAGE_STARTED, STAGE_SUCCEEDED,
};
use crate::ledger::{LedgerEntry, RunLedger};
use crate::observability::SpanTimer;
use crate::process::ProcessRunner;
use crate::stages::{CheckOutcome, StageDescriptor};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};

/// Executes plans against a process runner and a ledger.
#[derive(Clone)]
pub struct ExecutionEngine {
    runner: Arc<dyn ProcessRunner>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>, events: Arc<dyn EventSink>) -> Self {
        Self { runner, events }
    }

    /// Executes `plan`.
    ///
    /// A failed stage blocks its transitive dependents while independent
    /// stages keep running. Once `cancel` fires no further stage starts;
    /// stages that never started are reported with status `Pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan references undeclared stages or omits a
    /// dependency, if the target directory cannot be created, or if the
    /// final ledger flush fails. Stage failures are reported in the
    /// returned [`RunOutcome`], not as errors.
    pub async fn execute(
        &self,
        stages: &StageSet,
        plan: &ExecutionPlan,
        ctx: &RunContext,
        ledger: Arc<RunLedger>,
        cancel: Arc<CancellationToken>,
    ) -> Result<RunOutcome, BuildflowError> {
        let graph = PlanGraph::new(stages, plan)?;
        let timer = SpanTimer::start("run");
        let ctx = Arc::new(ctx.clone());

        tokio::fs::create_dir_all(ctx.target_dir()).await?;
        ledger.begin_invocation();

        info!(
            run_id = %ctx.run_id(),
            stages = plan.len(),
            parallelism = ctx.parallelism(),
            "Run started"
        );
        self.events.try_emit(
            RUN_STARTED,
            Some(serde_json::json!({
                "run_id": ctx.run_id().to_string(),
                "stages": plan.stage_ids(),
                "parallelism": ctx.parallelism(),
            })),
        );

        let semaphore = Arc::new(Semaphore::new(ctx.parallelism()));
        let mut waiting = graph.waiting.clone();
        let mut ready: BTreeSet<usize> = (0..graph.len()).filter(|&i| waiting[i] == 0).collect();
        let mut reports: Vec<Option<StageReport>> = vec![None; graph.len()];
        let mut active = FuturesUnordered::new();

        loop {
            if !cancel.is_cancelled() {
                while let Some(&pos) = ready.first() {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    ready.remove(&pos);
                    let task = StageTask {
                        descriptor: graph.descriptors[pos].clone(),
                        ctx: ctx.clone(),
                        ledger: ledger.clone(),
                        runner: self.runner.clone(),
                        events: self.events.clone(),
                        cancel: cancel.clone(),
                    };
                    active.push(join_stage(pos, task.spawn(permit)));
                }
            }

            let Some((pos, joined)) = active.next().await else {
                break;
            };

            let report = joined.unwrap_or_else(|err| self.crashed(&graph.descriptors[pos].id, &ledger, &err));

            match report.status {
                StageStatus::Succeeded => {
                    for &child in &graph.dependents[pos] {
                        waiting[child] -= 1;
                        if waiting[child] == 0 && reports[child].is_none() {
                            ready.insert(child);
                        }
                    }
                }
                StageStatus::Failed
                    if !report.failure.as_ref().is_some_and(StageFailedError::is_cancelled) =>
                {
                    self.block_dependents(pos, &graph, &ledger, &ctx, &mut reports);
                }
                _ => {}
            }
            reports[pos] = Some(report);

            if let Err(err) = ledger.flush().await {
                warn!(error = %err, "Failed to persist ledger, will retry after the next stage");
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(
                reason = %cancel.reason().unwrap_or_default(),
                "Run cancelled, remaining stages were not started"
            );
        }

        let stage_reports: Vec<StageReport> = reports
            .into_iter()
            .enumerate()
            .map(|(pos, report)| {
                report.unwrap_or_else(|| StageReport::not_run(&graph.descriptors[pos].id))
            })
            .collect();

        ledger.flush().await?;

        let outcome = RunOutcome {
            run_id: ctx.run_id(),
            stages: stage_reports,
            cancelled,
            duration: timer.finish(),
        };
        let counts = outcome.counts();

        info!(
            run_id = %outcome.run_id,
            succeeded = counts.succeeded,
            failed = counts.failed,
            blocked = counts.blocked,
            not_run = counts.not_run,
            duration_ms = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            "Run finished"
        );
        self.events.try_emit(
            RUN_FINISHED,
            Some(serde_json::json!({
                "run_id": outcome.run_id.to_string(),
                "success": outcome.is_success(),
                "cancelled": cancelled,
                "counts": counts,
            })),
        );

        Ok(outcome)
    }

    fn block_dependents(
        &self,
        failed: usize,
        graph: &PlanGraph,
        ledger: &RunLedger,
        ctx: &RunContext,
        reports: &mut [Option<StageReport>],
    ) {
        let failed_id = &graph.descriptors[failed].id;
        let mut queue: VecDeque<usize> = graph.dependents[failed].iter().copied().collect();

        while let Some(pos) = queue.pop_front() {
            if reports[pos].is_some() {
                continue;
            }
            let stage_id = &graph.descriptors[pos].id;
            let detail = format!("dependency '{failed_id}' failed");

            let entry = LedgerEntry::new(stage_id, StageStatus::Blocked)
                .with_error(&detail)
                .with_run_id(ctx.run_id());
            if let Err(err) = ledger.set(stage_id, entry) {
                error!(stage = %stage_id, error = %err, "Could not record blocked stage");
            }

            info!(stage = %stage_id, blocked_by = %failed_id, "Stage blocked");
            self.events.try_emit(
                STAGE_BLOCKED,
                Some(serde_json::json!({
                    "stage": stage_id,
                    "blocked_by": failed_id,
                })),
            );

            reports[pos] = Some(StageReport::blocked(stage_id, failed_id));
            queue.extend(graph.dependents[pos].iter().copied());
        }
    }

    fn crashed(&self, stage_id: &str, ledger: &RunLedger, err: &JoinError) -> StageReport {
        error!(stage = %stage_id, error = %err, "Stage task crashed");
        let failure = StageFailedError::new(stage_id, StageFailureCause::Internal(err.to_string()));

        let entry = LedgerEntry::new(stage_id, StageStatus::Failed).with_error(failure.cause.to_string());
        if let Err(err) = ledger.set(stage_id, entry) {
            error!(stage = %stage_id, error = %err, "Could not record crashed stage");
        }
        self.events.try_emit(
            STAGE_FAILED,
            Some(serde_json::json!({
                "stage": stage_id,
                "error": failure.cause.to_string(),
                "cancelled": false,
            })),
        );

        StageReport::failed(failure, std::time::Duration::ZERO)
    }
}

/// Plan positions with their in-plan dependency edges.
struct PlanGraph {
    descriptors: Vec<Arc<StageDescriptor>>,
    waiting: Vec<usize>,
    dependents: Vec<Vec<usize>>,
}

impl PlanGraph {
    fn new(stages: &StageSet, plan: &ExecutionPlan) -> Result<Self, PlanError> {
        let mut descriptors = Vec::with_capacity(plan.len());
        let mut position: HashMap<&str, usize> = HashMap::with_capacity(plan.len());
        for (pos, id) in plan.iter().enumerate() {
            let descriptor = stages
                .get(id)
                .ok_or_else(|| PlanError::UnknownStage(id.to_string()))?;
            descriptors.push(Arc::new(descriptor.clone()));
            position.insert(id, pos);
        }

        let mut waiting = vec![0; descriptors.len()];
        let mut dependents = vec![Vec::new(); descriptors.len()];
        for (pos, descriptor) in descriptors.iter().enumerate() {
            for dep in &descriptor.depends_on {
                let Some(&d) = position.get(dep.as_str()) else {
                    return Err(PipelineValidationError::new(format!(
                        "Plan includes '{}' but not its dependency '{dep}'",
                        descriptor.id
                    ))
                    .with_stages(vec![descriptor.id.clone(), dep.clone()])
                    .into());
                };
                if !dependents[d].contains(&pos) {
                    dependents[d].push(pos);
                    waiting[pos] += 1;
                }
            }
        }

        Ok(Self {
            descriptors,
            waiting,
            dependents,
        })
    }

    fn len(&self) -> usize {
        self.descriptors.len()
    }
}

async fn join_stage(
    pos: usize,
    handle: JoinHandle<StageReport>,
) -> (usize, Result<StageReport, JoinError>) {
    (pos, handle.await)
}

/// Everything a spawned stage needs.
struct StageTask {
    descriptor: Arc<StageDescriptor>,
    ctx: Arc<RunContext>,
    ledger: Arc<RunLedger>,
    runner: Arc<dyn ProcessRunner>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl StageTask {
    fn spawn(self, permit: OwnedSemaphorePermit) -> JoinHandle<StageReport> {
        let span = tracing::info_span!("stage", stage = %self.descriptor.id);
        tokio::spawn(
            async move {
                let report = self.run().await;
                drop(permit);
                report
            }
            .instrument(span),
        )
    }

    fn entry(&self, status: StageStatus) -> LedgerEntry {
        LedgerEntry::new(&self.descriptor.id, status)
            .with_fingerprint(self.descriptor.fingerprint())
            .with_run_id(self.ctx.run_id())
    }

    fn internal_failure(&self, detail: impl std::fmt::Display, timer: SpanTimer) -> StageReport {
        let id = &self.descriptor.id;
        error!(stage = %id, error = %detail, "Stage aborted");
        StageReport::failed(
            StageFailedError::new(id, StageFailureCause::Internal(detail.to_string())),
            timer.finish(),
        )
    }

    async fn run(self) -> StageReport {
        let id = self.descriptor.id.clone();
        let timer = SpanTimer::start(format!("stage.{id}"));

        if self.ctx.force() {
            debug!(stage = %id, "Forced run, idempotency check skipped");
        } else {
            let prior = self.ledger.get(&id);
            let check = self
                .descriptor
                .idempotency_check
                .evaluate(&self.descriptor, prior.as_ref(), self.runner.as_ref(), &self.ctx, &self.cancel)
                .await;

            if let CheckOutcome::Satisfied { reason } = check {
                let entry = self
                    .entry(StageStatus::Succeeded)
                    .with_duration(timer.elapsed());
                if let Err(err) = self.ledger.set(&id, entry) {
                    return self.internal_failure(err, timer);
                }
                info!(stage = %id, %reason, "Stage already satisfied, skipping");
                self.events.try_emit(
                    STAGE_SATISFIED,
                    Some(serde_json::json!({ "stage": &id, "reason": &reason })),
                );
                return StageReport::satisfied(id, reason, timer.finish());
            }
        }

        if let Err(err) = self.ledger.set(&id, self.entry(StageStatus::Running)) {
            return self.internal_failure(err, timer);
        }
        info!(stage = %id, commands = self.descriptor.commands.len(), "Stage started");
        self.events.try_emit(
            STAGE_STARTED,
            Some(serde_json::json!({
                "stage": &id,
                "commands": self.descriptor.commands.len(),
            })),
        );

        let mut output_tail = Vec::new();
        let mut failure = None;
        for (step, command) in self.descriptor.commands.iter().enumerate() {
            if self.cancel.is_cancelled() {
                failure = Some(StageFailedError::new(&id, StageFailureCause::Cancelled));
                break;
            }

            debug!(stage = %id, step = step + 1, %command, "Running command");
            let request = self.ctx.command_request(&id, command);
            match self.runner.run(request, self.cancel.clone()).await {
                Ok(outcome) => {
                    output_tail = outcome.lines().map(str::to_string).collect();
                }
                Err(err) => {
                    failure = Some(StageFailedError::new(&id, err));
                    break;
                }
            }
        }

        let duration = timer.elapsed();
        match failure {
            None => {
                let entry = self.entry(StageStatus::Succeeded).with_duration(duration);
                if let Err(err) = self.ledger.set(&id, entry) {
                    return self.internal_failure(err, timer);
                }
                info!(
                    stage = %id,
                    duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    "Stage succeeded"
                );
                self.events.try_emit(
                    STAGE_SUCCEEDED,
                    Some(serde_json::json!({
                        "stage": &id,
                        "duration_ms": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    })),
                );
                StageReport::succeeded(id, output_tail, timer.finish())
            }
            Some(failure) => {
                let entry = self
                    .entry(StageStatus::Failed)
                    .with_error(failure.cause.to_string())
                    .with_duration(duration);
                if let Err(err) = self.ledger.set(&id, entry) {
                    return self.internal_failure(err, timer);
                }
                warn!(stage = %id, error = %failure.cause, "Stage failed");
                self.events.try_emit(
                    STAGE_FAILED,
                    Some(serde_json::json!({
                        "stage": &id,
                        "error": failure.cause.to_string(),
                        "cancelled": failure.is_cancelled(),
                    })),
                );
                StageReport::failed(failure, timer.finish())
            }
        }
    }
}
