//! Executor runtime: the explicit work-queue/superstep loop that walks a
//! [`crate::plan::CompiledPlan`] to completion.
//!
//! Each iteration of the loop pops one `(node_id, scope)` pair off the work
//! queue, runs its pre-hook (data-pill resolution happens in
//! [`crate::variable_resolver`] before the node sees its input), invokes the
//! node's [`crate::plan::NodeExecutor`], runs the post-hook (loop-count
//! bookkeeping, task-result bookkeeping), merges the returned delta through
//! the compiled [`crate::state::StateSchema`], emits a
//! [`crate::trace::NodeTrace`], and computes successors before checkpointing.
//! Concurrent fan-out branches each carry an isolated scoped delta; branches
//! never observe each other's writes until they've all merged back into the
//! single writer.

use crate::error::{GraphError, Result};
use crate::interrupt::{InterruptTracker, InterruptWhen};
use crate::node_result::{NodeErrorKind, NodeResult};
use crate::plan::{CompiledPlan, ExpectedTasks};
use crate::retry::RetryPolicy;
use crate::trace::{NodeTrace, TraceSink};
use graphflow_checkpoint::{CheckpointConfig, CheckpointMetadata, CheckpointSaver};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Per-run configuration threaded through every node invocation.
///
/// Mirrors the run-scoped knobs a caller supplies to `invoke`/`stream`/`resume`:
/// the recursion (superstep) ceiling, the thread this run is checkpointed
/// under, a cooperative cancellation flag, and a per-node timeout.
#[derive(Clone)]
pub struct RunConfig {
    /// Upper bound on supersteps before the run fails with `RecursionLimit`.
    pub recursion_limit: u32,
    /// Checkpoint/thread identity this run persists under.
    pub thread_id: String,
    /// Cooperative cancellation: checked between supersteps.
    pub cancel: Arc<AtomicBool>,
    /// Per-node execution timeout; `None` means no timeout.
    pub timeout_ms: Option<u64>,
    /// Free-form tags attached to every trace emitted by this run.
    pub tags: Vec<String>,
    /// Free-form metadata attached to every checkpoint this run saves.
    pub metadata: HashMap<String, Value>,
}

impl RunConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            recursion_limit: 1000,
            thread_id: thread_id.into(),
            cancel: Arc::new(AtomicBool::new(false)),
            timeout_ms: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Work-queue entry: a node to run against a scoped view of state.
///
/// `scope` distinguishes concurrent fan-out branches spawned from the same
/// source node (via static fan-out or `Send`); branches never see each
/// other's deltas until they merge back through the single writer.
#[derive(Debug, Clone)]
struct WorkItem {
    node_id: String,
    scope: Option<Value>,
}

/// Per-node-kind fan-in barrier accounting, tracked while a run is in flight.
#[derive(Debug, Default)]
struct BarrierState {
    /// How many branches have merged their delta so far.
    arrived: usize,
    /// How many branches are expected before the barrier node may run.
    expected: usize,
}

/// Outcome of a completed (non-interrupted) run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub state: Value,
    pub traces: Vec<NodeTrace>,
    pub superstep_count: u32,
}

/// The executor runtime: holds the compiled plan and the services (retry
/// policy, checkpointer, trace sink) a run is executed against.
pub struct Runtime {
    plan: Arc<CompiledPlan>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    retry_policy: RetryPolicy,
    parallel_branch_concurrency: usize,
}

impl Runtime {
    pub fn new(plan: Arc<CompiledPlan>) -> Self {
        Self {
            plan,
            checkpointer: None,
            trace_sink: None,
            retry_policy: RetryPolicy::default(),
            parallel_branch_concurrency: 8,
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_parallel_branch_concurrency(mut self, concurrency: usize) -> Self {
        self.parallel_branch_concurrency = concurrency.max(1);
        self
    }

    /// Run a graph to completion (or to the next `interruptBefore` gate)
    /// starting from `initial_state`.
    #[instrument(skip(self, initial_state, run_config), fields(thread_id = %run_config.thread_id))]
    pub async fn invoke(&self, initial_state: Value, run_config: &RunConfig) -> Result<RunResult> {
        self.run(initial_state, run_config, InterruptTracker::new()).await
    }

    /// Resume a previously interrupted (or checkpointed) run from the latest
    /// saved checkpoint for `run_config.thread_id`.
    pub async fn resume(&self, run_config: &RunConfig) -> Result<RunResult> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| GraphError::Configuration("resume requires a checkpointer".into()))?;

        let tuple = checkpointer
            .latest(&run_config.thread_id)
            .await?
            .ok_or_else(|| GraphError::Configuration(format!("no checkpoint for thread '{}'", run_config.thread_id)))?;

        if tuple.checkpoint.plan_hash != self.plan.plan_hash {
            return Err(GraphError::Configuration(format!(
                "checkpoint plan_hash '{}' does not match compiled plan_hash '{}'; this graph's shape has changed since the checkpoint was taken",
                tuple.checkpoint.plan_hash, self.plan.plan_hash
            )));
        }

        let state = tuple.checkpoint.state.clone();
        let resume_from = tuple.checkpoint.node_cursor.clone();
        self.run_from(state, run_config, InterruptTracker::new(), resume_from).await
    }

    async fn run(&self, initial_state: Value, run_config: &RunConfig, interrupts: InterruptTracker) -> Result<RunResult> {
        self.run_from(initial_state, run_config, interrupts, None).await
    }

    /// Core work-queue loop. `bypass_interrupt_once` names a node whose
    /// `interruptBefore` gate was already passed by a prior run (the node the
    /// checkpoint being resumed from was cursor-stamped at); it is allowed
    /// through once, then cleared.
    async fn run_from(
        &self,
        initial_state: Value,
        run_config: &RunConfig,
        mut interrupts: InterruptTracker,
        mut bypass_interrupt_once: Option<String>,
    ) -> Result<RunResult> {
        let mut state = initial_state;
        if !state.is_object() {
            return Err(GraphError::Validation("initial state must be a JSON object".to_string()));
        }

        let mut queue: Vec<WorkItem> = match &bypass_interrupt_once {
            Some(node_id) => vec![WorkItem {
                node_id: node_id.clone(),
                scope: None,
            }],
            None => self
                .plan
                .start_node_ids
                .iter()
                .map(|id| WorkItem {
                    node_id: id.clone(),
                    scope: None,
                })
                .collect(),
        };

        let mut barriers: HashMap<String, BarrierState> = HashMap::new();
        let mut traces = Vec::new();
        let mut superstep: u32 = 0;
        let mut parent_config: Option<CheckpointConfig> = None;

        while !queue.is_empty() {
            if run_config.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            superstep += 1;
            if superstep > run_config.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: run_config.recursion_limit,
                });
            }

            let batch = std::mem::take(&mut queue);

            // Pre-hook: resolve data pills in each about-to-run node's declared
            // `context` config against the state as of the start of this
            // superstep, before any node in the batch observes it, and stash
            // the result under `node_contexts[node_id]`. Branches carrying a
            // freshly assigned `task_id` scope also get an isolated, empty
            // `task_states[task_id]` sub-map so concurrent branches never
            // share a key.
            for item in &batch {
                if let Some(task_id) = item.scope.as_ref().and_then(|v| v.as_str()) {
                    if let Some(state_obj) = state.as_object_mut() {
                        let task_states = state_obj
                            .entry("task_states")
                            .or_insert_with(|| Value::Object(serde_json::Map::new()));
                        if let Some(task_states) = task_states.as_object_mut() {
                            task_states.entry(task_id.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
                        }
                    }
                }

                let Some(wrapper) = self.plan.node(&item.node_id) else {
                    continue;
                };
                let Some(context) = wrapper.config.get("context") else {
                    continue;
                };
                let (resolved, warnings) = crate::variable_resolver::resolve_context(context, &state);
                for warning in warnings {
                    warn!(node = %item.node_id, %warning, "data pill resolution warning");
                }
                if let Some(state_obj) = state.as_object_mut() {
                    let node_contexts = state_obj
                        .entry("node_contexts")
                        .or_insert_with(|| Value::Object(serde_json::Map::new()));
                    if let Some(node_contexts) = node_contexts.as_object_mut() {
                        node_contexts.insert(item.node_id.clone(), resolved);
                    }
                }
            }

            let (fan_out, sequential): (Vec<_>, Vec<_>) = batch
                .into_iter()
                .partition(|item| self.plan.is_fan_out(&item.node_id));

            // Fan-out items in this batch run concurrently, bounded by
            // parallel_branch_concurrency; each branch's delta is collected
            // and merged back in completion order by the single writer below.
            let mut step_outcomes: Vec<(WorkItem, Result<NodeResult>)> = Vec::new();
            for chunk in fan_out.chunks(self.parallel_branch_concurrency.max(1)) {
                let results = self.execute_chunk(chunk, &state, run_config).await;
                step_outcomes.extend(results);
            }
            for item in sequential {
                let outcome = self.execute_one(&item, &state, run_config).await;
                step_outcomes.push((item, outcome));
            }

            let mut next_queue = Vec::new();
            let mut branch_errors: Vec<String> = Vec::new();
            let total_branches = step_outcomes.len();

            for (item, outcome) in step_outcomes {
                let node_id = item.node_id.clone();

                let wrapper = self
                    .plan
                    .node(&node_id)
                    .ok_or_else(|| GraphError::Validation(format!("node '{node_id}' missing from compiled plan")))?;
                let is_branch = wrapper.metadata.is_parallel_branch;
                let task_id = item
                    .scope
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| node_id.clone());

                let bypassed = bypass_interrupt_once.as_deref() == Some(node_id.as_str());
                if bypassed {
                    bypass_interrupt_once = None;
                }
                if wrapper.metadata.interrupt_before && !bypassed {
                    interrupts.interrupt(run_config.thread_id.clone(), node_id.clone(), InterruptWhen::Before, superstep as usize, None);
                    self.checkpoint(&state, &node_id, run_config, &mut parent_config).await?;
                    return Err(GraphError::interrupted(node_id, "interruptBefore gate"));
                }

                let start = Instant::now();
                let node_result = match outcome {
                    Ok(r) => r,
                    Err(e) => {
                        let trace = NodeTrace::error(&node_id, wrapper.metadata.kind, &state, start.elapsed(), e.to_string());
                        traces.push(trace.clone());
                        self.emit_trace(trace);

                        if let Some(fallback) = wrapper.metadata.fallback_target.clone().or_else(|| self.plan.fallback_node_id.clone()) {
                            next_queue.push(WorkItem { node_id: fallback, scope: None });
                            continue;
                        }
                        if is_branch {
                            self.record_task_result(&mut state, &task_id, "error", Value::Null, Some(e.to_string()))?;
                            self.advance_successors(&node_id, None, &mut barriers, &mut next_queue, total_branches)?;
                            continue;
                        }
                        branch_errors.push(format!("{node_id}: {e}"));
                        continue;
                    }
                };

                if let Some(err) = node_result.get_error() {
                    let trace = NodeTrace::error(&node_id, wrapper.metadata.kind, &state, start.elapsed(), err.message.clone());
                    traces.push(trace.clone());
                    self.emit_trace(trace);

                    if matches!(err.kind, NodeErrorKind::Internal) && self.plan.fallback_node_id.is_none() && !is_branch {
                        branch_errors.push(format!("{node_id}: {}", err.message));
                        continue;
                    }
                    if let Some(fallback) = wrapper.metadata.fallback_target.clone().or_else(|| self.plan.fallback_node_id.clone()) {
                        next_queue.push(WorkItem { node_id: fallback, scope: None });
                        continue;
                    }
                    if is_branch {
                        self.record_task_result(&mut state, &task_id, "error", Value::Null, Some(err.message.clone()))?;
                        self.advance_successors(&node_id, None, &mut barriers, &mut next_queue, total_branches)?;
                        continue;
                    }
                    branch_errors.push(format!("{node_id}: {}", err.message));
                    continue;
                }

                let delta = node_result.get_state_update();
                if let Some(delta) = &delta {
                    self.plan.state_schema.apply(&mut state, delta).map_err(|e| GraphError::state_error(Some(node_id.clone()), e.to_string()))?;
                }
                if is_branch {
                    self.record_task_result(&mut state, &task_id, "success", delta.clone().unwrap_or(Value::Null), None)?;
                }

                let trace = NodeTrace::ok(&node_id, wrapper.metadata.kind, &state, start.elapsed(), delta.clone());
                traces.push(trace.clone());
                self.emit_trace(trace);

                let command = node_result.get_command();
                let route_decision = delta
                    .as_ref()
                    .and_then(|d| d.get("route_decision"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                if let Some(cmd) = command {
                    if let Some(goto) = &cmd.goto {
                        self.enqueue_goto(goto, &mut next_queue);
                        continue;
                    }
                }

                self.advance_successors(&node_id, route_decision.as_deref(), &mut barriers, &mut next_queue, total_branches)?;
            }

            if !branch_errors.is_empty() {
                return Err(GraphError::aggregated(branch_errors, total_branches));
            }

            queue = next_queue;
            self.checkpoint(&state, "__superstep__", run_config, &mut parent_config).await?;
        }

        Ok(RunResult {
            state,
            traces,
            superstep_count: superstep,
        })
    }

    async fn execute_chunk(&self, chunk: &[WorkItem], state: &Value, run_config: &RunConfig) -> Vec<(WorkItem, Result<NodeResult>)> {
        let mut handles = Vec::with_capacity(chunk.len());
        for item in chunk {
            let node_id = item.node_id.clone();
            let state_snapshot = state.clone();
            let run_config = run_config.clone();
            let policy = self.retry_policy.clone();
            let plan = self.plan.clone();
            handles.push(tokio::spawn(async move {
                let outcome = Self::execute_with_retry(&plan, &node_id, &state_snapshot, &run_config, &policy).await;
                (node_id, outcome)
            }));
        }

        let mut results = Vec::with_capacity(chunk.len());
        for (item, handle) in chunk.iter().zip(handles) {
            let outcome = match handle.await {
                Ok((_, outcome)) => outcome,
                Err(join_err) => Err(GraphError::InternalError(format!("node task panicked: {join_err}"))),
            };
            results.push((item.clone(), outcome));
        }
        results
    }

    async fn execute_one(&self, item: &WorkItem, state: &Value, run_config: &RunConfig) -> Result<NodeResult> {
        Self::execute_with_retry(&self.plan, &item.node_id, state, run_config, &self.retry_policy).await
    }

    async fn execute_with_retry(
        plan: &CompiledPlan,
        node_id: &str,
        state: &Value,
        run_config: &RunConfig,
        policy: &RetryPolicy,
    ) -> Result<NodeResult> {
        let wrapper = plan
            .node(node_id)
            .ok_or_else(|| GraphError::Validation(format!("node '{node_id}' missing from compiled plan")))?;

        let mut attempt = 0;
        loop {
            let call = wrapper.execute(state, run_config);
            let outcome = match run_config.timeout_ms {
                Some(ms) => match tokio::time::timeout(std::time::Duration::from_millis(ms), call).await {
                    Ok(inner) => inner,
                    Err(_) => Err(GraphError::Timeout {
                        operation: node_id.to_string(),
                        duration_ms: ms,
                    }),
                },
                None => call.await,
            };

            let is_transient = matches!(
                &outcome,
                Err(GraphError::ExternalError { .. }) | Err(GraphError::Timeout { .. })
            ) || matches!(&outcome, Ok(r) if matches!(r.get_error().map(|e| e.kind), Some(NodeErrorKind::External)));

            if outcome.is_err() && is_transient && policy.should_retry(attempt) {
                debug!(node = node_id, attempt, "retrying after transient failure");
                tokio::time::sleep(policy.calculate_delay(attempt)).await;
                attempt += 1;
                continue;
            }

            return outcome;
        }
    }

    fn enqueue_goto(&self, goto: &crate::command::GotoTarget, queue: &mut Vec<WorkItem>) {
        use crate::command::GotoTarget;
        match goto {
            GotoTarget::Node(node) => queue.push(WorkItem { node_id: node.clone(), scope: None }),
            GotoTarget::Nodes(nodes) => {
                for node in nodes {
                    queue.push(WorkItem { node_id: node.clone(), scope: None });
                }
            }
            GotoTarget::Send(send) => {
                queue.push(WorkItem { node_id: send.node().to_string(), scope: Some(send.arg().clone()) });
            }
            GotoTarget::Sends(sends) => {
                for send in sends {
                    queue.push(WorkItem { node_id: send.node().to_string(), scope: Some(send.arg().clone()) });
                }
            }
        }
    }

    fn is_fan_in_target(&self, node_id: &str) -> bool {
        self.plan.expected_tasks.contains_key(node_id)
    }

    fn expected_arrivals(&self, node_id: &str, total_branches: usize) -> usize {
        match self.plan.expected_tasks.get(node_id) {
            Some(ExpectedTasks::Fixed(n)) => *n,
            Some(ExpectedTasks::Dynamic) | None => total_branches.max(1),
            Some(ExpectedTasks::Auto) => self
                .plan
                .static_successors
                .values()
                .filter(|succs| succs.iter().any(|s| s == node_id))
                .count()
                .max(1),
        }
    }

    /// Enqueues `node_id`'s successors, applying fan-in barrier bookkeeping
    /// and assigning a fresh `task_id` scope to any successor flagged as a
    /// parallel branch so its `task_states` sub-map stays isolated from
    /// sibling branches.
    fn advance_successors(
        &self,
        node_id: &str,
        route_decision: Option<&str>,
        barriers: &mut HashMap<String, BarrierState>,
        next_queue: &mut Vec<WorkItem>,
        total_branches: usize,
    ) -> Result<()> {
        let successors = self.plan.successors(node_id, route_decision)?;
        for succ in successors {
            if let Some(barrier) = barriers.get_mut(&succ) {
                barrier.arrived += 1;
                if barrier.arrived < barrier.expected {
                    continue;
                }
            } else if self.is_fan_in_target(&succ) {
                let expected = self.expected_arrivals(&succ, total_branches);
                barriers.insert(succ.clone(), BarrierState { arrived: 1, expected });
                if expected > 1 {
                    continue;
                }
            }
            let scope = self
                .plan
                .node(&succ)
                .filter(|w| w.metadata.is_parallel_branch)
                .map(|_| Value::String(uuid::Uuid::new_v4().to_string()));
            next_queue.push(WorkItem { node_id: succ, scope });
        }
        Ok(())
    }

    /// Post-hook: stamps a fan-out branch's outcome into `task_results` as
    /// `{task_id, status, result, error?}` so a downstream aggregator's
    /// fan-in barrier sees a one-to-one record of every completed branch.
    fn record_task_result(&self, state: &mut Value, task_id: &str, status: &str, result: Value, error: Option<String>) -> Result<()> {
        let mut entry = serde_json::Map::new();
        entry.insert("task_id".to_string(), Value::String(task_id.to_string()));
        entry.insert("status".to_string(), Value::String(status.to_string()));
        entry.insert("result".to_string(), result);
        if let Some(error) = error {
            entry.insert("error".to_string(), Value::String(error));
        }
        let delta = Value::Object({
            let mut m = serde_json::Map::new();
            m.insert("task_results".to_string(), Value::Array(vec![Value::Object(entry)]));
            m
        });
        self.plan
            .state_schema
            .apply(state, &delta)
            .map_err(|e| GraphError::state_error(Some(task_id.to_string()), e.to_string()))
    }

    async fn checkpoint(&self, state: &Value, node_cursor: &str, run_config: &RunConfig, parent_config: &mut Option<CheckpointConfig>) -> Result<()> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };

        let metadata = CheckpointMetadata::new();
        let cursor = if node_cursor == "__superstep__" { None } else { Some(node_cursor) };
        let config = checkpointer
            .save_with_cursor(&run_config.thread_id, parent_config.as_ref(), cursor, state.clone(), metadata, &self.plan.plan_hash)
            .await?;
        *parent_config = Some(config);
        Ok(())
    }

    fn emit_trace(&self, trace: NodeTrace) {
        if let Some(sink) = &self.trace_sink {
            sink.record(trace);
        } else {
            warn!(node = %trace.node_id, "no trace sink configured; dropping trace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::{EdgeDef, GraphDefinition, NodeDef, NodeKind, StateFieldSpec, StateFieldType};
    use crate::plan::NodeExecutor;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo {
        field: &'static str,
        value: Value,
    }

    #[async_trait]
    impl NodeExecutor for Echo {
        async fn execute(&self, _state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
            Ok(NodeResult::State(json!({ self.field: self.value.clone() })))
        }
    }

    fn build_plan() -> Arc<CompiledPlan> {
        use crate::plan::{NodeMetadata, NodeWrapper};
        use crate::state::{reducer_from_name, StateSchema};
        use std::collections::HashMap as Map;

        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::Function, "A"))
            .with_node(NodeDef::new("b", NodeKind::Function, "B"))
            .with_edge(EdgeDef::normal("a", "b"))
            .with_state_field(StateFieldSpec::new("count", StateFieldType::Int, "replace"));

        let mut schema = StateSchema::new();
        schema.add_field("count", reducer_from_name("replace").unwrap());

        let mut node_wrappers = Map::new();
        node_wrappers.insert(
            "a".to_string(),
            NodeWrapper::new("a", Arc::new(Echo { field: "count", value: json!(1) }), NodeMetadata::default()),
        );
        node_wrappers.insert(
            "b".to_string(),
            NodeWrapper::new("b", Arc::new(Echo { field: "count", value: json!(2) }), NodeMetadata::default()),
        );

        let mut static_successors = Map::new();
        static_successors.insert("a".to_string(), vec!["b".to_string()]);

        Arc::new(CompiledPlan {
            start_node_ids: vec!["a".to_string()],
            node_wrappers,
            static_successors,
            conditional_successors: Map::new(),
            state_schema: Arc::new(schema),
            expected_tasks: Map::new(),
            fallback_node_id: None,
            plan_hash: def.shape_hash(),
        })
    }

    #[tokio::test]
    async fn invoke_runs_to_completion_and_applies_deltas_in_order() {
        let runtime = Runtime::new(build_plan());
        let run_config = RunConfig::new("thread-1");
        let result = runtime.invoke(json!({"count": 0}), &run_config).await.unwrap();
        assert_eq!(result.state["count"], json!(2));
        assert_eq!(result.traces.len(), 2);
    }

    #[tokio::test]
    async fn invoke_rejects_non_object_initial_state() {
        let runtime = Runtime::new(build_plan());
        let run_config = RunConfig::new("thread-1");
        let err = runtime.invoke(json!([1, 2, 3]), &run_config).await.unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[tokio::test]
    async fn invoke_enforces_recursion_limit() {
        let runtime = Runtime::new(build_plan());
        let run_config = RunConfig::new("thread-1").with_recursion_limit(1);
        let err = runtime.invoke(json!({"count": 0}), &run_config).await.unwrap_err();
        assert!(matches!(err, GraphError::RecursionLimit { limit: 1 }));
    }

    struct MaybeFail {
        should_fail: bool,
    }

    #[async_trait]
    impl NodeExecutor for MaybeFail {
        async fn execute(&self, _state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
            if self.should_fail {
                Ok(NodeResult::Error(crate::node_result::NodeError::new(
                    NodeErrorKind::External,
                    "boom",
                    "branch",
                )))
            } else {
                Ok(NodeResult::State(json!({})))
            }
        }
    }

    struct CollectTaskResults;

    #[async_trait]
    impl NodeExecutor for CollectTaskResults {
        async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
            Ok(NodeResult::State(json!({ "collected": state.get("task_results").cloned().unwrap_or(json!([])) })))
        }
    }

    fn build_fan_out_plan() -> Arc<CompiledPlan> {
        use crate::plan::{ExpectedTasks, NodeMetadata, NodeWrapper};
        use crate::state::{reducer_from_name, StateSchema};
        use std::collections::HashMap as Map;

        let mut schema = StateSchema::new();
        schema.add_field("task_results", reducer_from_name("add").unwrap());
        schema.add_field("collected", reducer_from_name("replace").unwrap());

        let mut node_wrappers = Map::new();
        node_wrappers.insert(
            "start".to_string(),
            NodeWrapper::new("start", Arc::new(Echo { field: "kicked_off", value: json!(true) }), NodeMetadata::default()),
        );
        node_wrappers.insert(
            "p1".to_string(),
            NodeWrapper::new(
                "p1",
                Arc::new(MaybeFail { should_fail: false }),
                NodeMetadata { is_parallel_branch: true, ..NodeMetadata::default() },
            ),
        );
        node_wrappers.insert(
            "p2".to_string(),
            NodeWrapper::new(
                "p2",
                Arc::new(MaybeFail { should_fail: true }),
                NodeMetadata { is_parallel_branch: true, ..NodeMetadata::default() },
            ),
        );
        node_wrappers.insert("agg".to_string(), NodeWrapper::new("agg", Arc::new(CollectTaskResults), NodeMetadata::default()));

        let mut static_successors = Map::new();
        static_successors.insert("start".to_string(), vec!["p1".to_string(), "p2".to_string()]);
        static_successors.insert("p1".to_string(), vec!["agg".to_string()]);
        static_successors.insert("p2".to_string(), vec!["agg".to_string()]);

        let mut expected_tasks = Map::new();
        expected_tasks.insert("agg".to_string(), ExpectedTasks::Auto);

        Arc::new(CompiledPlan {
            start_node_ids: vec!["start".to_string()],
            node_wrappers,
            static_successors,
            conditional_successors: Map::new(),
            state_schema: Arc::new(schema),
            expected_tasks,
            fallback_node_id: None,
            plan_hash: "fan-out".to_string(),
        })
    }

    #[tokio::test]
    async fn fan_out_branches_stamp_task_results_with_distinct_task_ids_before_aggregator_runs() {
        let runtime = Runtime::new(build_fan_out_plan());
        let run_config = RunConfig::new("thread-1");
        let result = runtime.invoke(json!({}), &run_config).await.unwrap();

        let collected = result.state["collected"].as_array().unwrap();
        assert_eq!(collected.len(), 2);

        let statuses: Vec<&str> = collected.iter().map(|e| e["status"].as_str().unwrap()).collect();
        assert!(statuses.contains(&"success"));
        assert!(statuses.contains(&"error"));

        let task_ids: std::collections::HashSet<&str> = collected.iter().map(|e| e["task_id"].as_str().unwrap()).collect();
        assert_eq!(task_ids.len(), 2, "each branch must get a distinct task_id");

        let task_states = result.state["task_states"].as_object().unwrap();
        assert_eq!(task_states.len(), 2, "each branch's task_id must have its own task_states sub-map");
    }
}
