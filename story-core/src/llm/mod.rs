//! Glue between the engine and the language model seam.
//!
//! Long-running operations report progress as a stream of [`StreamItem`]s:
//! any number of `Progress` lines followed by at most one `Result`.

pub mod json;

use chat_client::{LanguageModel, TextStream};
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub use json::{extract_json_object, repair_json};

/// One element of a progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// Human-facing progress or streamed prose.
    Progress(String),
    /// The terminal structured value.
    Result(T),
}

impl<T> StreamItem<T> {
    pub fn progress(text: impl Into<String>) -> Self {
        StreamItem::Progress(text.into())
    }

    pub fn into_result(self) -> Option<T> {
        match self {
            StreamItem::Result(value) => Some(value),
            StreamItem::Progress(_) => None,
        }
    }
}

/// Boxed progress stream borrowing from its producer.
pub type ProgressStream<'a, T> = Pin<Box<dyn Stream<Item = StreamItem<T>> + Send + 'a>>;

/// Drain a progress stream, returning the progress lines and the final result.
pub async fn collect<T>(mut stream: ProgressStream<'_, T>) -> (Vec<String>, Option<T>) {
    let mut lines = Vec::new();
    let mut result = None;
    while let Some(item) = stream.next().await {
        match item {
            StreamItem::Progress(text) => lines.push(text),
            StreamItem::Result(value) => result = Some(value),
        }
    }
    (lines, result)
}

/// Run a streaming chat call to completion and return the full text.
pub(crate) async fn stream_to_string(
    model: &dyn LanguageModel,
    prompt: &str,
    system_prompt: &str,
) -> Result<String, chat_client::Error> {
    let stream: TextStream = model.stream_chat(prompt, system_prompt).await?;
    chat_client::collect_text(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_splits_progress_and_result() {
        let stream: ProgressStream<'static, u32> = Box::pin(futures::stream::iter(vec![
            StreamItem::progress("a"),
            StreamItem::progress("b"),
            StreamItem::Result(7),
        ]));
        let (lines, result) = collect(stream).await;
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(result, Some(7));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(StreamItem::<u8>::progress("x").into_result(), None);
        assert_eq!(StreamItem::Result(3u8).into_result(), Some(3));
    }
}
