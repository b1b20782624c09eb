//! Serialized novel generation engine with gated character progression.
//!
//! This crate provides:
//! - A setup pipeline from a one-line idea to an outline and a world state
//! - Chapter generation with optional plot planning and character action passes
//! - A progression gate that only lets a character advance a realm once its
//!   resources and conditions are met
//! - Bounded, de-duplicating merges of model-produced state updates
//! - A two-stage approval workflow around the expensive generation call
//!
//! # Quick Start
//!
//! ```ignore
//! use story_core::{collect, ChapterGenerator, StoryConfig, StoryWriteWorkflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoryConfig::from_env();
//!     let generator = ChapterGenerator::from_config("阴井", config).await?;
//!     let mut workflow = StoryWriteWorkflow::from_generator(generator);
//!
//!     let pending = workflow.invoke(false, None).await;
//!     if pending.awaiting_approval {
//!         println!("{}", pending.plan_text);
//!         let done = workflow.invoke(true, pending.preparation).await;
//!         println!("saved to {:?}", done.saved_path);
//!     }
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod chapter;
pub mod config;
pub mod gate;
pub mod llm;
pub mod merge;
pub mod outline;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod testing;
pub mod thinking;
pub mod word_count;
pub mod workflow;

// Primary public API
pub use actions::{plan_character_actions, ActionRequest, CharacterActionPlan};
pub use chapter::{
    resolve_generation_target, ChapterGenerator, ChapterPreparation, GenerationError,
    GenerationMode, GenerationResult, WorldUpdateOutcome,
};
pub use config::{StoryConfig, ThinkingMode};
pub use gate::{evaluate_level_update, missing_requirements, GateDecision};
pub use llm::{collect, ProgressStream, StreamItem};
pub use merge::apply_state_update;
pub use outline::{resolve_chapter, OutlineInfo};
pub use pipeline::{PipelineError, StoryPipeline};
pub use state::{Character, StateUpdate, WorldState};
pub use store::{ProjectStore, StoreError};
pub use testing::{ScriptedModel, TestHarness};
pub use thinking::{PlotThinkingEngine, ThinkingPlan};
pub use word_count::count_words;
pub use workflow::{ChapterSteps, StoryWriteWorkflow, WorkflowError, WorkflowExecutor, WriteWorkflowState};
