//! Background ingestion of uploaded documents.
//!
//! The upload route registers a task and hands the bytes to
//! [`spawn_ingestion`]; the job reports every stage through the
//! [`TaskTracker`] and never fails the request that started it.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::collaborators::Collaborators;
use crate::tasks::{TaskStatus, TaskTracker};

#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub task_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub index_name: String,
}

pub fn spawn_ingestion(
    tasks: Arc<TaskTracker>,
    collaborators: Collaborators,
    job: IngestionJob,
) -> JoinHandle<()> {
    tokio::spawn(async move { run_ingestion(&tasks, &collaborators, job).await })
}

/// Run the job to completion, leaving the task in a terminal state.
pub async fn run_ingestion(tasks: &TaskTracker, collaborators: &Collaborators, job: IngestionJob) {
    let IngestionJob {
        task_id,
        file_name,
        bytes,
        index_name,
    } = job;
    tracing::info!(task_id = %task_id, index = %index_name, size = bytes.len(), "Ingestion started");

    let step = |status: Option<TaskStatus>, progress: i64, message: &str| {
        if !tasks.update(&task_id, status, Some(progress), Some(message)) {
            tracing::debug!(task_id = %task_id, "Task no longer tracked, progress dropped");
        }
        tasks.append_detail(&task_id, message);
    };
    let fail = |message: String| {
        tracing::warn!(task_id = %task_id, reason = %message, "Ingestion failed");
        tasks.update(&task_id, Some(TaskStatus::Failed), None, Some(&message));
        tasks.append_detail(&task_id, &message);
    };

    step(
        Some(TaskStatus::Processing),
        10,
        &format!("Processing file: {}", file_name),
    );

    step(None, 30, "Extracting text...");
    let chunks = match collaborators
        .processor
        .extract_chunks(&file_name, &bytes)
        .await
    {
        Ok(chunks) => chunks,
        Err(e) => return fail(format!("Text extraction failed: {}", e)),
    };
    if chunks.is_empty() {
        return fail("No text extracted from file.".to_string());
    }

    step(None, 60, &format!("Prepared {} chunks", chunks.len()));

    step(None, 85, "Indexing...");
    let indexed = match collaborators
        .index
        .add_chunks(&index_name, &file_name, chunks)
        .await
    {
        Ok(indexed) => indexed,
        Err(e) => return fail(format!("Indexing failed: {}", e)),
    };

    if indexed > 0 {
        step(
            Some(TaskStatus::Completed),
            100,
            &format!("Upload complete. Indexed {} chunks to '{}'.", indexed, index_name),
        );
    } else {
        step(
            Some(TaskStatus::CompletedWithWarning),
            100,
            "Finished, but no documents indexed.",
        );
    }
    tracing::info!(task_id = %task_id, indexed = indexed, "Ingestion finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::{DocumentProcessor, DEFAULT_INDEX_NAME};
    use crate::config::TaskConfig;
    use async_trait::async_trait;

    fn tracker() -> TaskTracker {
        TaskTracker::new(&TaskConfig::default(), Arc::new(ManualClock::starting_now()))
    }

    fn job(file_name: &str, bytes: &[u8]) -> IngestionJob {
        IngestionJob {
            task_id: "t1".to_string(),
            file_name: file_name.to_string(),
            bytes: bytes.to_vec(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }

    struct NothingIndexable;

    #[async_trait]
    impl DocumentProcessor for NothingIndexable {
        async fn extract_chunks(&self, _file_name: &str, _bytes: &[u8]) -> anyhow::Result<Vec<String>> {
            Ok(vec!["   ".to_string()])
        }
    }

    #[tokio::test]
    async fn text_file_completes() {
        let tasks = tracker();
        let collaborators = Collaborators::demo();
        tasks.create("t1", "user1@company.com");

        run_ingestion(&tasks, &collaborators, job("notes.txt", b"onboarding checklist")).await;

        let task = tasks.read("t1", false).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.details.len(), 5);
        assert_eq!(
            collaborators
                .index
                .document_count(DEFAULT_INDEX_NAME)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unsupported_file_fails_with_message() {
        let tasks = tracker();
        tasks.create("t1", "a");

        run_ingestion(&tasks, &Collaborators::demo(), job("scan.pdf", b"%PDF")).await;

        let task = tasks.read("t1", false).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.message.starts_with("Text extraction failed"));
        assert_eq!(task.progress, 30);
    }

    #[tokio::test]
    async fn empty_text_fails() {
        let tasks = tracker();
        tasks.create("t1", "a");

        run_ingestion(&tasks, &Collaborators::demo(), job("empty.txt", b"\n\n  \n")).await;

        assert_eq!(tasks.read("t1", false).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn nothing_indexed_is_a_warning() {
        let tasks = tracker();
        tasks.create("t1", "a");
        let collaborators = Collaborators {
            processor: Arc::new(NothingIndexable),
            ..Collaborators::demo()
        };

        run_ingestion(&tasks, &collaborators, job("blank.txt", b"x")).await;

        let task = tasks.read("t1", false).unwrap();
        assert_eq!(task.status, TaskStatus::CompletedWithWarning);
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn evicted_task_is_left_alone() {
        let tasks = tracker();
        run_ingestion(&tasks, &Collaborators::demo(), job("notes.txt", b"text")).await;
        assert!(tasks.read("t1", true).is_none());
    }
}
