//! Integration tests that call a real model backend.
//!
//! These tests require DEEPSEEK_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p story-core --test api_integration -- --ignored --nocapture`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available
//! - Slow test runs (generation calls take tens of seconds)

use story_core::{ChapterGenerator, StoryConfig, StoryPipeline, StoryWriteWorkflow};
use tempfile::TempDir;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("DEEPSEEK_API_KEY").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p story-core --test api_integration -- --ignored
async fn test_pipeline_then_first_chapter() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: DEEPSEEK_API_KEY not set");
        return;
    }

    let dir = TempDir::new().unwrap();
    let config = StoryConfig::new()
        .with_model("deepseek")
        .with_plot_thinking(false)
        .with_output_dir(dir.path());

    let model = std::sync::Arc::new(
        chat_client::ChatClient::from_model_name(&config.model_name).expect("client should build"),
    );
    let pipeline = StoryPipeline::new(model, story_core::ProjectStore::new(dir.path()));
    let output = pipeline
        .build_story_pipeline("一个死在井底的书生化作怨灵，一步步爬出阴井复仇", "live", 5)
        .await
        .expect("pipeline should run");

    println!("Blueprint: {}", output.blueprint.title_candidate);
    println!("Volumes: {}", output.detailed_outline.volumes.len());
    println!("Characters: {}", output.world_state.characters.len());
    assert!(!output.world_state.characters.is_empty());

    let generator = ChapterGenerator::from_config("live", config)
        .await
        .expect("generator should build");
    let mut workflow = StoryWriteWorkflow::from_generator(generator);
    let state = workflow.invoke(false, None).await;

    assert!(state.error.is_none(), "workflow failed: {:?}", state.error);
    let result = state.result.expect("chapter result");
    println!("Chapter {}: {} ({} words)", result.chapter, result.title, result.added_words);
    for line in &state.world_update_logs {
        println!("  {line}");
    }
    assert_eq!(result.chapter, 1);
    assert!(result.added_words > 0);
}
