//! Two-stage chapter writing with optional human approval.
//!
//! The workflow is a four-node graph: `prepare -> review -> generate -> persist`.
//! `review` halts with [`WriteWorkflowState::awaiting_approval`] set when a
//! plan needs confirmation. Calling [`StoryWriteWorkflow::invoke`] again with
//! `approved = true` and the returned preparation resumes without repeating
//! the planning calls.
//!
//! Two executors run the graph: an explicit step graph and a straight-line
//! sequence. They produce identical states.

use crate::chapter::{
    ChapterGenerator, ChapterPreparation, GenerationError, GenerationResult, WorldUpdateOutcome,
};
use crate::llm::{ProgressStream, StreamItem};
use crate::store::{ProjectStore, StoreError};
use crate::thinking::{format_full_plan_display, ThinkingPlan};
use futures::StreamExt;
use std::path::PathBuf;
use thiserror::Error;

/// Plan text shown when no plan needs review.
pub const NO_PLAN_TEXT: &str = "Plot planning disabled; the chapter will be generated directly.";

/// Terminal workflow failures.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("preparation failed: {0}")]
    Preparation(GenerationError),

    #[error("missing preparation; cannot generate the chapter")]
    MissingPreparation,

    #[error("generation failed: {0}")]
    Generation(GenerationError),

    #[error("generation returned no result")]
    NoResult,

    #[error("missing generation result; nothing to save")]
    MissingResult,

    #[error("saving the chapter failed: {0}")]
    Store(#[from] StoreError),
}

/// The chapter operations the workflow drives.
///
/// [`ChapterGenerator`] is the production implementation.
pub trait ChapterSteps: Send {
    /// Whether a planning engine is attached. Plans only need review when one is.
    fn has_thinking_engine(&self) -> bool;

    fn prepare(&self) -> ProgressStream<'_, Result<ChapterPreparation, GenerationError>>;

    fn generate_from_plan<'a>(
        &'a self,
        prep: &'a ChapterPreparation,
    ) -> ProgressStream<'a, Result<GenerationResult, GenerationError>>;

    fn update_world_state<'a>(
        &'a mut self,
        new_content: &'a str,
    ) -> ProgressStream<'a, Result<WorldUpdateOutcome, GenerationError>>;

    fn plan_display(&self, plan: &ThinkingPlan) -> String {
        format_full_plan_display(Some(plan))
    }
}

impl ChapterSteps for ChapterGenerator {
    fn has_thinking_engine(&self) -> bool {
        self.thinking_engine().is_some()
    }

    fn prepare(&self) -> ProgressStream<'_, Result<ChapterPreparation, GenerationError>> {
        ChapterGenerator::prepare(self)
    }

    fn generate_from_plan<'a>(
        &'a self,
        prep: &'a ChapterPreparation,
    ) -> ProgressStream<'a, Result<GenerationResult, GenerationError>> {
        ChapterGenerator::generate_from_plan(self, prep)
    }

    fn update_world_state<'a>(
        &'a mut self,
        new_content: &'a str,
    ) -> ProgressStream<'a, Result<WorldUpdateOutcome, GenerationError>> {
        ChapterGenerator::update_world_state(self, new_content)
    }
}

/// How the workflow graph is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowExecutor {
    /// Node-by-node with explicit routing.
    #[default]
    StepGraph,
    /// Direct calls in order.
    Sequential,
}

/// State carried through one invocation.
#[derive(Debug, Default)]
pub struct WriteWorkflowState {
    pub approved: bool,
    /// Progress lines from preparation.
    pub logs: Vec<String>,
    pub preparation: Option<ChapterPreparation>,
    pub plan_text: String,
    pub requires_approval: bool,
    pub awaiting_approval: bool,
    /// Prose streamed during generation, even when no result arrived.
    pub generated_text: String,
    pub result: Option<GenerationResult>,
    pub saved_path: Option<PathBuf>,
    pub world_update_logs: Vec<String>,
    pub world_update: Option<WorldUpdateOutcome>,
    pub error: Option<WorkflowError>,
}

impl WriteWorkflowState {
    pub fn is_done(&self) -> bool {
        self.saved_path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Prepare,
    Review,
    Generate,
    Persist,
}

/// Interactive chapter-writing workflow for one project.
pub struct StoryWriteWorkflow<G = ChapterGenerator> {
    project: String,
    store: ProjectStore,
    steps: G,
    executor: WorkflowExecutor,
}

impl StoryWriteWorkflow<ChapterGenerator> {
    /// Workflow around a generator, saving into the generator's store.
    pub fn from_generator(generator: ChapterGenerator) -> Self {
        let project = generator.project().to_string();
        let store = generator.store().clone();
        Self::new(project, store, generator)
    }
}

impl<G: ChapterSteps> StoryWriteWorkflow<G> {
    pub fn new(project: impl Into<String>, store: ProjectStore, steps: G) -> Self {
        Self {
            project: project.into(),
            store,
            steps,
            executor: WorkflowExecutor::default(),
        }
    }

    pub fn with_executor(mut self, executor: WorkflowExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn executor(&self) -> WorkflowExecutor {
        self.executor
    }

    pub fn steps(&self) -> &G {
        &self.steps
    }

    /// Run the workflow.
    ///
    /// Call first with `approved = false`. If the returned state is awaiting
    /// approval, call again with `approved = true` and its preparation.
    pub async fn invoke(
        &mut self,
        approved: bool,
        preparation: Option<ChapterPreparation>,
    ) -> WriteWorkflowState {
        let mut state = WriteWorkflowState {
            approved,
            preparation,
            ..Default::default()
        };
        match self.executor {
            WorkflowExecutor::StepGraph => self.run_graph(&mut state).await,
            WorkflowExecutor::Sequential => self.run_sequential(&mut state).await,
        }
        tracing::debug!(
            project = %self.project,
            awaiting = state.awaiting_approval,
            saved = state.is_done(),
            failed = state.error.is_some(),
            "workflow finished"
        );
        state
    }

    async fn run_graph(&mut self, state: &mut WriteWorkflowState) {
        let mut node = Some(Node::Prepare);
        while let Some(current) = node {
            self.run_node(current, state).await;
            node = route(current, state);
        }
    }

    async fn run_sequential(&mut self, state: &mut WriteWorkflowState) {
        self.prepare(state).await;
        if state.error.is_some() {
            return;
        }
        review(state);
        if state.awaiting_approval {
            return;
        }
        self.generate(state).await;
        if state.error.is_some() {
            return;
        }
        self.persist(state).await;
    }

    async fn run_node(&mut self, node: Node, state: &mut WriteWorkflowState) {
        match node {
            Node::Prepare => self.prepare(state).await,
            Node::Review => review(state),
            Node::Generate => self.generate(state).await,
            Node::Persist => self.persist(state).await,
        }
    }

    fn requires_approval(&self, prep: &ChapterPreparation) -> bool {
        prep.thinking_plan.is_some() && self.steps.has_thinking_engine()
    }

    fn plan_text(&self, prep: &ChapterPreparation) -> String {
        match &prep.thinking_plan {
            Some(plan) if self.steps.has_thinking_engine() => self.steps.plan_display(plan),
            _ => NO_PLAN_TEXT.to_string(),
        }
    }

    async fn prepare(&mut self, state: &mut WriteWorkflowState) {
        if state.preparation.is_none() {
            let mut stream = self.steps.prepare();
            let mut outcome = None;
            while let Some(item) = stream.next().await {
                match item {
                    StreamItem::Progress(line) => state.logs.push(line),
                    StreamItem::Result(result) => outcome = Some(result),
                }
            }
            match outcome {
                Some(Ok(prep)) => state.preparation = Some(prep),
                Some(Err(e)) => {
                    state.error = Some(WorkflowError::Preparation(e));
                    return;
                }
                None => {
                    state.error = Some(WorkflowError::MissingPreparation);
                    return;
                }
            }
        }

        if let Some(prep) = &state.preparation {
            state.requires_approval = self.requires_approval(prep);
            state.plan_text = self.plan_text(prep);
        }
    }

    async fn generate(&mut self, state: &mut WriteWorkflowState) {
        let Some(prep) = &state.preparation else {
            state.error = Some(WorkflowError::MissingPreparation);
            return;
        };

        let mut stream = self.steps.generate_from_plan(prep);
        let mut outcome = None;
        while let Some(item) = stream.next().await {
            match item {
                StreamItem::Progress(text) => state.generated_text.push_str(&text),
                StreamItem::Result(result) => outcome = Some(result),
            }
        }
        drop(stream);

        match outcome {
            Some(Ok(result)) => state.result = Some(result),
            Some(Err(e)) => state.error = Some(WorkflowError::Generation(e)),
            None => state.error = Some(WorkflowError::NoResult),
        }
    }

    async fn persist(&mut self, state: &mut WriteWorkflowState) {
        let Some(result) = &state.result else {
            state.error = Some(WorkflowError::MissingResult);
            return;
        };

        let saved = self
            .store
            .save_chapter(&self.project, result.chapter, &result.title, &result.full_text)
            .await;
        match saved {
            Ok(path) => state.saved_path = Some(path),
            Err(e) => {
                state.error = Some(WorkflowError::Store(e));
                return;
            }
        }

        if result.new_content.is_empty() {
            return;
        }
        let mut stream = self.steps.update_world_state(&result.new_content);
        while let Some(item) = stream.next().await {
            match item {
                StreamItem::Progress(line) => state.world_update_logs.push(line),
                StreamItem::Result(Ok(outcome)) => state.world_update = Some(outcome),
                StreamItem::Result(Err(e)) => {
                    tracing::warn!(project = %self.project, error = %e, "world state update failed");
                    state
                        .world_update_logs
                        .push(format!("world state update failed: {e}"));
                }
            }
        }
    }
}

fn review(state: &mut WriteWorkflowState) {
    state.awaiting_approval = state.requires_approval && !state.approved;
}

fn route(node: Node, state: &WriteWorkflowState) -> Option<Node> {
    if state.error.is_some() {
        return None;
    }
    match node {
        Node::Prepare => Some(Node::Review),
        Node::Review if state.awaiting_approval => None,
        Node::Review => Some(Node::Generate),
        Node::Generate => Some(Node::Persist),
        Node::Persist => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThinkingMode;
    use crate::llm::StreamItem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Canned steps: one plan, two fragments, one world update.
    struct FakeSteps {
        with_plan: bool,
        with_result: bool,
        prepare_calls: AtomicUsize,
    }

    impl FakeSteps {
        fn new(with_plan: bool) -> Self {
            Self {
                with_plan,
                with_result: true,
                prepare_calls: AtomicUsize::new(0),
            }
        }
    }

    fn preparation(with_plan: bool) -> ChapterPreparation {
        ChapterPreparation {
            chapter_num: 1,
            chapter_title: "序章".into(),
            target_words: 3500,
            thinking_plan: with_plan.then(|| ThinkingPlan::fallback(1, "先稳住冲突后推进主线", ThinkingMode::Fast)),
            ..Default::default()
        }
    }

    impl ChapterSteps for FakeSteps {
        fn has_thinking_engine(&self) -> bool {
            self.with_plan
        }

        fn prepare(&self) -> ProgressStream<'_, Result<ChapterPreparation, GenerationError>> {
            self.prepare_calls.fetch_add(1, Ordering::SeqCst);
            let prep = preparation(self.with_plan);
            Box::pin(futures::stream::iter(vec![
                StreamItem::progress("preparing..."),
                StreamItem::Result(Ok(prep)),
            ]))
        }

        fn generate_from_plan<'a>(
            &'a self,
            prep: &'a ChapterPreparation,
        ) -> ProgressStream<'a, Result<GenerationResult, GenerationError>> {
            let mut items = vec![StreamItem::progress("第一段。"), StreamItem::progress("第二段。")];
            if self.with_result {
                items.push(StreamItem::Result(Ok(GenerationResult {
                    mode: prep.mode,
                    chapter: prep.chapter_num,
                    title: prep.chapter_title.clone(),
                    added_words: 3200,
                    total_words: 3200,
                    new_content: "第一段。第二段。".into(),
                    full_text: "第一段。第二段。".into(),
                })));
            }
            Box::pin(futures::stream::iter(items))
        }

        fn update_world_state<'a>(
            &'a mut self,
            _new_content: &'a str,
        ) -> ProgressStream<'a, Result<WorldUpdateOutcome, GenerationError>> {
            Box::pin(futures::stream::iter(vec![
                StreamItem::progress("updating world state..."),
                StreamItem::Result(Ok(WorldUpdateOutcome {
                    updated: true,
                    ..Default::default()
                })),
            ]))
        }

        fn plan_display(&self, _plan: &ThinkingPlan) -> String {
            "plan summary: 先稳住冲突后推进主线".into()
        }
    }

    fn workflow(dir: &TempDir, steps: FakeSteps, executor: WorkflowExecutor) -> StoryWriteWorkflow<FakeSteps> {
        StoryWriteWorkflow::new("测试项目", ProjectStore::new(dir.path()), steps).with_executor(executor)
    }

    #[tokio::test]
    async fn test_plan_waits_for_approval_then_persists() {
        for executor in [WorkflowExecutor::StepGraph, WorkflowExecutor::Sequential] {
            let dir = TempDir::new().unwrap();
            let mut flow = workflow(&dir, FakeSteps::new(true), executor);

            let pending = flow.invoke(false, None).await;
            assert!(pending.awaiting_approval);
            assert!(pending.plan_text.contains("plan summary"));
            assert!(pending.saved_path.is_none());
            assert_eq!(pending.logs, vec!["preparing...".to_string()]);

            let done = flow.invoke(true, pending.preparation).await;
            assert!(done.error.is_none(), "{executor:?}: {:?}", done.error);
            assert!(done.logs.is_empty());
            let path = done.saved_path.unwrap();
            assert!(path.ends_with("chapters/001_序章.txt"));
            assert_eq!(done.result.unwrap().added_words, 3200);
            assert_eq!(done.generated_text, "第一段。第二段。");
            assert!(done.world_update_logs.concat().contains("updating world state"));
            assert!(done.world_update.unwrap().updated);
        }
    }

    #[tokio::test]
    async fn test_runs_straight_through_without_plan() {
        let dir = TempDir::new().unwrap();
        let mut flow = workflow(&dir, FakeSteps::new(false), WorkflowExecutor::StepGraph);
        let state = flow.invoke(false, None).await;
        assert!(!state.awaiting_approval);
        assert!(!state.requires_approval);
        assert_eq!(state.plan_text, NO_PLAN_TEXT);
        assert_eq!(state.result.as_ref().map(|r| r.chapter), Some(1));
        assert!(state.is_done());
    }

    #[tokio::test]
    async fn test_missing_result_is_terminal() {
        for executor in [WorkflowExecutor::StepGraph, WorkflowExecutor::Sequential] {
            let dir = TempDir::new().unwrap();
            let mut steps = FakeSteps::new(false);
            steps.with_result = false;
            let mut flow = workflow(&dir, steps, executor);
            let state = flow.invoke(false, None).await;
            assert!(matches!(state.error, Some(WorkflowError::NoResult)));
            assert_eq!(state.error.as_ref().unwrap().to_string(), "generation returned no result");
            assert_eq!(state.generated_text, "第一段。第二段。");
            assert!(state.saved_path.is_none());
        }
    }

    #[tokio::test]
    async fn test_resume_skips_preparation() {
        let dir = TempDir::new().unwrap();
        let mut flow = workflow(&dir, FakeSteps::new(true), WorkflowExecutor::Sequential);
        let state = flow.invoke(true, Some(preparation(true))).await;
        assert!(state.logs.is_empty());
        assert!(state.requires_approval);
        assert!(!state.awaiting_approval);
        assert!(state.is_done());
        assert_eq!(flow.steps().prepare_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_routing() {
        let mut state = WriteWorkflowState::default();
        assert_eq!(route(Node::Prepare, &state), Some(Node::Review));
        state.awaiting_approval = true;
        assert_eq!(route(Node::Review, &state), None);
        state.awaiting_approval = false;
        assert_eq!(route(Node::Review, &state), Some(Node::Generate));
        state.error = Some(WorkflowError::NoResult);
        assert_eq!(route(Node::Generate, &state), None);
    }
}
