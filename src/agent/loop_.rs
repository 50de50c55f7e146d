//! Core ReAct loop: Think → Act → Observe.
//!
//! Each iteration:
//! 1. Checks cancellation and the run deadline
//! 2. Builds the prompt from the question and the transcript so far
//! 3. Makes exactly one model call
//! 4. Dispatches the requested tool, if any
//! 5. Records the step and emits progress events
//!
//! The run ends on a final answer, when the iteration budget is spent, or
//! on a gateway failure. Tool failures never end a run.

use crate::agent::grounding::{caution_notice, verify_quick};
use crate::agent::injection_defense::sanitize_observation;
use crate::agent::trace::{NoopTraceSink, TraceSink};
use crate::agent::{context, system_prompt, AgentOptions, ModelTurn, RunRequest};
use crate::error::{GatewayError, RunError};
use crate::llm::{GenerateOptions, LanguageModel};
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const NO_PROGRESS_ANSWER: &str =
    "I'm sorry, I wasn't able to find an answer to your question within the allowed number of steps.";

/// Drives ReAct runs against one model. Cheap to share behind an `Arc`.
pub struct ReActController {
    model: Arc<dyn LanguageModel>,
    options: AgentOptions,
    trace: Arc<dyn TraceSink>,
}

/// Mutable bookkeeping for a single run.
struct RunState {
    run_id: String,
    started: Instant,
    deadline: Option<Instant>,
    phase: RunPhase,
    steps: Vec<ReActStep>,
    reasoning_trace: Vec<String>,
    tools_used: Vec<String>,
    observations: Vec<String>,
    model_calls: u32,
}

impl RunState {
    fn new(run_timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            run_id: ulid::Ulid::new().to_string(),
            started,
            deadline: run_timeout.map(|t| started + t),
            phase: RunPhase::Init,
            steps: Vec::new(),
            reasoning_trace: Vec::new(),
            tools_used: Vec::new(),
            observations: Vec::new(),
            model_calls: 0,
        }
    }

    /// Time left before the run deadline, `None` when unbounded.
    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_passed(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// Clamp a per-call bound to the remaining run budget.
    fn bound(&self, limit: Duration) -> Duration {
        match self.remaining() {
            Some(left) => limit.min(left),
            None => limit,
        }
    }

    fn record(&mut self, step: ReActStep) {
        let n = step.iteration;
        match &step.thought {
            Some(thought) => self.reasoning_trace.push(format!("Thought {}: {}", n, thought)),
            None => self
                .reasoning_trace
                .push(format!("Thought {}: (no usable response)", n)),
        }
        if let Some(action) = &step.action {
            self.reasoning_trace
                .push(format!("Action {}: {}({})", n, action.tool, action.args));
        }
        if let Some(observation) = &step.observation {
            self.reasoning_trace
                .push(format!("Observation {}: {}", n, observation));
        }
        self.steps.push(step);
    }

    fn note_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

impl ReActController {
    pub fn new(model: Arc<dyn LanguageModel>, options: AgentOptions) -> Self {
        Self {
            model,
            options,
            trace: Arc::new(NoopTraceSink),
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = sink;
        self
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Run to completion without progress events.
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> ReActResult {
        self.drive(request, None, cancel).await
    }

    /// Run to completion, sending progress events as they happen.
    ///
    /// A closed receiver cancels the run: nobody is left to read the answer.
    pub async fn run_with_events(
        &self,
        request: &RunRequest,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> ReActResult {
        self.drive(request, Some(events), cancel).await
    }

    async fn drive(
        &self,
        request: &RunRequest,
        events: Option<&mpsc::Sender<StreamEvent>>,
        cancel: &CancellationToken,
    ) -> ReActResult {
        let mut state = RunState::new(self.options.run_timeout);
        let max_iterations = request.max_iterations;
        let system = system_prompt::build_system_prompt(&request.system_prompt, &request.tools);

        info!(
            "[{}] Starting run: up to {} iterations, {} tools",
            state.run_id,
            max_iterations,
            request.tools.len()
        );
        self.trace.begin_run(&state.run_id, &request.user_message);

        for iteration in 1..=max_iterations {
            match self
                .iterate(iteration, request, &system, events, cancel, &mut state)
                .await
            {
                Ok(Some(answer)) => {
                    return self
                        .finish_done(iteration, answer, request, events, state)
                        .await
                }
                Ok(None) => {}
                Err(err) => return self.finish_failed(iteration, err, events, state).await,
            }
        }

        self.finish_exhausted(max_iterations, events, state).await
    }

    /// One Think → Act → Observe cycle. Returns the final answer if the
    /// model produced one.
    async fn iterate(
        &self,
        iteration: u32,
        request: &RunRequest,
        system: &str,
        events: Option<&mpsc::Sender<StreamEvent>>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<Option<String>, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        if state.deadline_passed() {
            return Err(self.deadline_error());
        }

        // Think
        state.phase = RunPhase::Thinking;
        let prompt = context::build_prompt(
            &request.user_message,
            &state.steps,
            self.options.transcript_max_chars,
        );
        let options = GenerateOptions::with_system(system)
            .tag("run_id", &state.run_id)
            .tag("iteration", iteration);
        let call_timeout = state.bound(self.options.model_timeout);
        let clamped = call_timeout < self.options.model_timeout;

        state.model_calls += 1;
        let generation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            result = tokio::time::timeout(call_timeout, self.model.generate(&prompt, &options)) => {
                match result {
                    Ok(generation) => generation?,
                    Err(_) if clamped => return Err(self.deadline_error()),
                    Err(_) => return Err(GatewayError::Timeout(call_timeout).into()),
                }
            }
        };

        let turn = super::parse_model_turn(&generation.content);
        let now = Utc::now();

        match turn {
            ModelTurn::FinalAnswer { thought, answer } => {
                if let Some(thought) = &thought {
                    emit(events, cancel, thought_event(iteration, thought)).await;
                }
                let step = ReActStep {
                    iteration,
                    thought,
                    action: None,
                    observation: None,
                    timestamp: now,
                };
                self.trace.update_run(&state.run_id, &step);
                state.record(step);
                state
                    .reasoning_trace
                    .push(format!("Final Answer: {}", answer));
                Ok(Some(answer))
            }

            ModelTurn::Action { thought, invocation } => {
                emit(
                    events,
                    cancel,
                    thought_event(iteration, thought.as_deref().unwrap_or_default()),
                )
                .await;
                emit(
                    events,
                    cancel,
                    StreamEvent::Action {
                        iteration,
                        tool: invocation.tool.clone(),
                        args: invocation.args.clone(),
                        timestamp: Utc::now(),
                    },
                )
                .await;

                // Act
                state.phase = RunPhase::Acting;
                info!(
                    "[Iteration {}] Tool: {}({})",
                    iteration, invocation.tool, invocation.args
                );
                self.trace
                    .begin_tool(&state.run_id, iteration, &invocation.tool, &invocation.args);
                let tool_started = Instant::now();
                let tool_timeout = state.bound(self.options.tool_timeout);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RunError::Cancelled),
                    outcome = request
                        .tools
                        .dispatch(&invocation.tool, &invocation.args, tool_timeout) => outcome,
                };
                self.trace.end_tool(
                    &state.run_id,
                    iteration,
                    &invocation.tool,
                    outcome.success,
                    tool_started.elapsed(),
                );

                // Observe
                state.phase = RunPhase::Observing;
                if outcome.invoked {
                    state.note_tool(&invocation.tool);
                }
                if !outcome.success {
                    warn!(
                        "[Iteration {}] Tool {} did not succeed: {}",
                        iteration, invocation.tool, outcome.output
                    );
                }
                let observation = context::truncate_observation(
                    &sanitize_observation(&outcome.output),
                    self.options.observation_max_chars,
                );
                emit(
                    events,
                    cancel,
                    StreamEvent::Observation {
                        iteration,
                        tool: invocation.tool.clone(),
                        content: observation.clone(),
                        is_error: !outcome.success,
                        timestamp: Utc::now(),
                    },
                )
                .await;

                state.observations.push(observation.clone());
                let step = ReActStep {
                    iteration,
                    thought,
                    action: Some(invocation),
                    observation: Some(observation),
                    timestamp: now,
                };
                self.trace.update_run(&state.run_id, &step);
                state.record(step);
                Ok(None)
            }

            ModelTurn::Thought(thought) => {
                debug!("[Iteration {}] Thought without action", iteration);
                emit(events, cancel, thought_event(iteration, &thought)).await;
                let step = ReActStep {
                    iteration,
                    thought: Some(thought),
                    action: None,
                    observation: None,
                    timestamp: now,
                };
                self.trace.update_run(&state.run_id, &step);
                state.record(step);
                Ok(None)
            }

            ModelTurn::Unparseable(raw) => {
                warn!(
                    "[Iteration {}] Could not parse model response ({} chars)",
                    iteration,
                    raw.len()
                );
                emit(events, cancel, thought_event(iteration, "")).await;
                let step = ReActStep {
                    iteration,
                    thought: None,
                    action: None,
                    observation: None,
                    timestamp: now,
                };
                self.trace.update_run(&state.run_id, &step);
                state.record(step);
                Ok(None)
            }
        }
    }

    fn deadline_error(&self) -> RunError {
        RunError::DeadlineExceeded(self.options.run_timeout.unwrap_or_default())
    }

    async fn finish_done(
        &self,
        iteration: u32,
        answer: String,
        request: &RunRequest,
        events: Option<&mpsc::Sender<StreamEvent>>,
        state: RunState,
    ) -> ReActResult {
        let mut answer = answer;
        let grounding = match request.grounding_mode {
            GroundingMode::Off => None,
            GroundingMode::Quick => {
                let mut report = verify_quick(&answer, &state.observations.join("\n"));
                if !report.is_grounded() {
                    warn!(
                        "[{}] Ungrounded claims in final answer: {:?}",
                        state.run_id, report.ungrounded
                    );
                    if self.options.grounding_policy == GroundingPolicy::Reject {
                        answer = format!("{}\n\n{}", caution_notice(&report), answer);
                        report.rejected = true;
                    }
                }
                Some(report)
            }
        };

        let ungrounded = grounding
            .as_ref()
            .map(|g| g.ungrounded.clone())
            .unwrap_or_default();
        let result = self.build_result(state, answer, RunStatus::Done, grounding, None);

        if let Some(tx) = events {
            let _ = tx
                .send(StreamEvent::Final {
                    iteration,
                    answer: result.answer.clone(),
                    status: RunStatus::Done,
                    tools_used: result.tools_used.clone(),
                    ungrounded,
                    timestamp: Utc::now(),
                })
                .await;
        }
        self.trace.end_run(&result.metadata.run_id, &result);
        result
    }

    async fn finish_exhausted(
        &self,
        max_iterations: u32,
        events: Option<&mpsc::Sender<StreamEvent>>,
        state: RunState,
    ) -> ReActResult {
        warn!(
            "[{}] Iteration budget of {} spent without a final answer",
            state.run_id, max_iterations
        );
        let answer = match state.observations.last() {
            Some(last) => format!(
                "I couldn't reach a final answer within {} steps. The most recent information I found was:\n\n{}",
                max_iterations, last
            ),
            None => NO_PROGRESS_ANSWER.to_string(),
        };
        let result = self.build_result(state, answer, RunStatus::MaxIterations, None, None);

        if let Some(tx) = events {
            let _ = tx
                .send(StreamEvent::Final {
                    iteration: max_iterations,
                    answer: result.answer.clone(),
                    status: RunStatus::MaxIterations,
                    tools_used: result.tools_used.clone(),
                    ungrounded: Vec::new(),
                    timestamp: Utc::now(),
                })
                .await;
        }
        self.trace.end_run(&result.metadata.run_id, &result);
        result
    }

    async fn finish_failed(
        &self,
        iteration: u32,
        err: RunError,
        events: Option<&mpsc::Sender<StreamEvent>>,
        state: RunState,
    ) -> ReActResult {
        match &err {
            RunError::Cancelled => {
                info!("[{}] Run cancelled at iteration {}", state.run_id, iteration)
            }
            other => warn!("[{}] Run failed at iteration {}: {}", state.run_id, iteration, other),
        }
        let failure = FailureInfo {
            category: err.category(),
            message: err.to_string(),
        };
        let result = self.build_result(
            state,
            err.user_message(),
            RunStatus::Failed,
            None,
            Some(failure.clone()),
        );

        if let Some(tx) = events {
            let _ = tx
                .send(StreamEvent::Error {
                    iteration,
                    category: failure.category,
                    message: result.answer.clone(),
                    timestamp: Utc::now(),
                })
                .await;
        }
        self.trace.end_run(&result.metadata.run_id, &result);
        result
    }

    fn build_result(
        &self,
        mut state: RunState,
        answer: String,
        status: RunStatus,
        grounding: Option<GroundingReport>,
        failure: Option<FailureInfo>,
    ) -> ReActResult {
        state.phase = status.into();
        debug!("[{}] Run reached phase {}", state.run_id, state.phase);
        ReActResult {
            answer,
            iterations: state.steps.len() as u32,
            tools_used: state.tools_used,
            reasoning_trace: state.reasoning_trace,
            steps: state.steps,
            status,
            metadata: RunMetadata {
                run_id: state.run_id,
                model_calls: state.model_calls,
                elapsed_ms: state.started.elapsed().as_millis() as u64,
                grounding,
                failure,
            },
        }
    }
}

fn thought_event(iteration: u32, content: &str) -> StreamEvent {
    StreamEvent::Thought {
        iteration,
        content: content.to_string(),
        timestamp: Utc::now(),
    }
}

/// Send a progress event. A closed channel cancels the run.
async fn emit(
    events: Option<&mpsc::Sender<StreamEvent>>,
    cancel: &CancellationToken,
    event: StreamEvent,
) {
    let Some(tx) = events else {
        return;
    };
    if tx.send(event).await.is_err() && !cancel.is_cancelled() {
        debug!("Event receiver dropped, cancelling run");
        cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::tools::{ToolDescriptor, ToolSet};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_tools(calls: Arc<AtomicUsize>) -> Arc<ToolSet> {
        Arc::new(
            ToolSet::new(vec![ToolDescriptor::from_fn(
                "echo",
                "Echo the text argument",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
                move |args: Value| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(format!("echo: {}", args["text"].as_str().unwrap_or_default()))
                    }
                },
            )])
            .unwrap(),
        )
    }

    fn controller(model: ScriptedModel) -> (ReActController, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let controller = ReActController::new(model.clone(), AgentOptions::default());
        (controller, model)
    }

    #[tokio::test]
    async fn action_then_final_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (controller, model) = controller(ScriptedModel::new([
            "Thought: echo it\nAction: echo\nAction Input: {\"text\": \"hi\"}",
            "Thought: done\nFinal Answer: it said hi",
        ]));
        let request = RunRequest::new("say hi", echo_tools(calls.clone()));

        let result = controller.run(&request, &CancellationToken::new()).await;

        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.answer, "it said hi");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.tools_used, vec!["echo"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.call_count(), 2);
        assert_eq!(result.steps[0].observation.as_deref(), Some("echo: hi"));
        assert!(result
            .reasoning_trace
            .iter()
            .any(|line| line.starts_with("Observation 1:")));
        assert!(model.prompts()[1].contains("Observation: echo: hi"));
    }

    #[tokio::test]
    async fn budget_bounds_model_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (controller, model) = controller(ScriptedModel::repeating(
            "Thought: again\nAction: echo\nAction Input: {\"text\": \"x\"}",
        ));
        let request =
            RunRequest::new("loop", echo_tools(calls.clone())).with_max_iterations(3);

        let result = controller.run(&request, &CancellationToken::new()).await;

        assert_eq!(result.status, RunStatus::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert_eq!(model.call_count(), 3);
        assert_eq!(result.metadata.model_calls, 3);
        assert!(result.answer.contains("echo: x"));
    }

    #[tokio::test]
    async fn exhausted_without_observations_apologizes() {
        let (controller, _) = controller(ScriptedModel::repeating("Thought: hmm"));
        let request = RunRequest::new("q", Arc::new(ToolSet::default())).with_max_iterations(2);

        let result = controller.run(&request, &CancellationToken::new()).await;
        assert_eq!(result.status, RunStatus::MaxIterations);
        assert_eq!(result.answer, NO_PROGRESS_ANSWER);
    }

    #[tokio::test]
    async fn zero_budget_makes_no_model_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (controller, model) = controller(ScriptedModel::repeating(
            "Thought: again\nAction: echo\nAction Input: {\"text\": \"x\"}",
        ));
        let request = RunRequest::new("q", echo_tools(calls.clone())).with_max_iterations(0);

        let result = controller.run(&request, &CancellationToken::new()).await;

        assert_eq!(model.call_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.status, RunStatus::MaxIterations);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.metadata.model_calls, 0);
        assert_eq!(result.answer, NO_PROGRESS_ANSWER);
    }

    #[tokio::test]
    async fn gateway_failure_fails_the_run() {
        let (controller, _) = controller(
            ScriptedModel::default().then_fail(GatewayError::RateLimited("429".into())),
        );
        let request = RunRequest::new("q", Arc::new(ToolSet::default()));

        let result = controller.run(&request, &CancellationToken::new()).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.iterations, 0);
        let failure = result.metadata.failure.unwrap();
        assert_eq!(failure.category, FailureCategory::RateLimited);
    }

    #[tokio::test]
    async fn pre_cancelled_run_makes_no_calls() {
        let (controller, model) = controller(ScriptedModel::repeating("Final Answer: x"));
        let request = RunRequest::new("q", Arc::new(ToolSet::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = controller.run(&request, &cancel).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(model.call_count(), 0);
        assert_eq!(
            result.metadata.failure.map(|f| f.category),
            Some(FailureCategory::Cancelled)
        );
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let model = Arc::new(
            ScriptedModel::repeating("Final Answer: late").with_delay(Duration::from_millis(500)),
        );
        let options = AgentOptions {
            model_timeout: Duration::from_millis(20),
            ..AgentOptions::default()
        };
        let controller = ReActController::new(model, options);
        let request = RunRequest::new("q", Arc::new(ToolSet::default()));

        let result = controller.run(&request, &CancellationToken::new()).await;
        assert_eq!(
            result.metadata.failure.map(|f| f.category),
            Some(FailureCategory::TimedOut)
        );
    }

    #[tokio::test]
    async fn run_deadline_is_enforced() {
        let model = Arc::new(
            ScriptedModel::repeating("Thought: thinking").with_delay(Duration::from_millis(30)),
        );
        let options = AgentOptions {
            run_timeout: Some(Duration::from_millis(50)),
            ..AgentOptions::default()
        };
        let controller = ReActController::new(model, options);
        let request =
            RunRequest::new("q", Arc::new(ToolSet::default())).with_max_iterations(10);

        let result = controller.run(&request, &CancellationToken::new()).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            result.metadata.failure.map(|f| f.category),
            Some(FailureCategory::DeadlineExceeded)
        );
        assert!(result.iterations < 10);
    }

    #[tokio::test]
    async fn events_follow_iteration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (controller, _) = controller(ScriptedModel::new([
            "Thought: echo\nAction: echo\nAction Input: {\"text\": \"a\"}",
            "Final Answer: a",
        ]));
        let request = RunRequest::new("q", echo_tools(calls));
        let (tx, mut rx) = mpsc::channel(16);

        let result = controller
            .run_with_events(&request, &tx, &CancellationToken::new())
            .await;
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push((event.iteration(), event.kind()));
        }
        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(
            kinds,
            vec![
                (1, "thought"),
                (1, "action"),
                (1, "observation"),
                (2, "final"),
            ]
        );
    }

    #[tokio::test]
    async fn reject_policy_prefixes_caution() {
        let model = Arc::new(ScriptedModel::new(["Final Answer: Take 40 mg daily."]));
        let options = AgentOptions {
            grounding_policy: GroundingPolicy::Reject,
            ..AgentOptions::default()
        };
        let controller = ReActController::new(model, options);
        let request = RunRequest::new("dose?", Arc::new(ToolSet::default()));

        let result = controller.run(&request, &CancellationToken::new()).await;
        assert_eq!(result.status, RunStatus::Done);
        assert!(result.answer.starts_with("Caution:"));
        assert!(result.answer.ends_with("Take 40 mg daily."));
        let report = result.metadata.grounding.unwrap();
        assert!(report.rejected);
        assert_eq!(report.ungrounded, vec!["40 mg"]);
    }
}
