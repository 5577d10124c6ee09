//! Deep collection: enrich saved records with an LLM analysis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::JobStatus;
use crate::models::SavedRecord;
use crate::request::FetchRequest;
use crate::traits::{Cleaner, Completion, DeepCollectionStore, DeepOutcome, Fetcher};

/// Default cap on page text included in a prompt, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 8_000;

/// How long finished tasks stay queryable.
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(600);

/// Progress of one deep-collection task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepTaskStatus {
    pub task_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

struct TaskEntry {
    status: DeepTaskStatus,
    finished_at: Option<Instant>,
}

/// Pipeline: load record → fetch page → clean → prompt → complete →
/// extract analysis → save.
///
/// Generic over all external dependencies. Clones share the task registry.
#[derive(Clone)]
pub struct DeepCollectionService<F, C, M, S>
where
    F: Fetcher,
    C: Cleaner,
    M: Completion,
    S: DeepCollectionStore,
{
    fetcher: F,
    cleaner: C,
    completion: M,
    store: S,
    model_name: String,
    max_content_chars: usize,
    task_ttl: Duration,
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
}

impl<F, C, M, S> DeepCollectionService<F, C, M, S>
where
    F: Fetcher + 'static,
    C: Cleaner + 'static,
    M: Completion + 'static,
    S: DeepCollectionStore,
{
    pub fn new(fetcher: F, cleaner: C, completion: M, store: S, model_name: String) -> Self {
        Self {
            fetcher,
            cleaner,
            completion,
            store,
            model_name,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            task_ttl: DEFAULT_TASK_TTL,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Start a background task over `record_ids`. Returns the task id.
    pub fn start(&self, record_ids: Vec<i64>) -> Result<String, AppError> {
        if record_ids.is_empty() {
            return Err(AppError::InvalidInput("no record ids given".into()));
        }

        let task_id = Uuid::now_v7().to_string();
        {
            let mut tasks = self.lock_tasks();
            let ttl = self.task_ttl;
            tasks.retain(|_, entry| {
                entry
                    .finished_at
                    .is_none_or(|finished| finished.elapsed() < ttl)
            });
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    status: DeepTaskStatus {
                        task_id: task_id.clone(),
                        status: JobStatus::Running,
                        total: record_ids.len(),
                        completed: 0,
                        failed: 0,
                    },
                    finished_at: None,
                },
            );
        }

        let service = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move { service.run_task(&id, &record_ids).await });

        tracing::info!(%task_id, "Deep collection started");
        Ok(task_id)
    }

    pub fn task_status(&self, task_id: &str) -> Option<DeepTaskStatus> {
        self.lock_tasks()
            .get(task_id)
            .map(|entry| entry.status.clone())
    }

    async fn run_task(&self, task_id: &str, record_ids: &[i64]) {
        for &record_id in record_ids {
            let succeeded = match self.process(record_id).await {
                Ok(DeepOutcome::Completed { .. }) => true,
                Ok(DeepOutcome::Failed { error_message }) => {
                    tracing::warn!(%task_id, record_id, error = %error_message, "Deep collection failed");
                    false
                }
                Err(e) => {
                    tracing::warn!(%task_id, record_id, error = %e, "Deep collection failed");
                    false
                }
            };

            if let Some(TaskEntry { status, .. }) = self.lock_tasks().get_mut(task_id) {
                if succeeded {
                    status.completed += 1;
                } else {
                    status.failed += 1;
                }
            }
        }

        if let Some(TaskEntry {
            status,
            finished_at,
        }) = self.lock_tasks().get_mut(task_id)
        {
            status.status = JobStatus::Completed;
            *finished_at = Some(Instant::now());
            tracing::info!(
                %task_id,
                completed = status.completed,
                failed = status.failed,
                "Deep collection finished"
            );
        }
    }

    /// Enrich one saved record and persist the outcome.
    ///
    /// A missing record is an error and writes nothing. Anything that goes
    /// wrong after the record is loaded is saved as a failed outcome.
    pub async fn process(&self, record_id: i64) -> Result<DeepOutcome, AppError> {
        let record = self
            .store
            .get_saved_record(record_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Saved record {record_id}")))?;

        let outcome = match self.analyze(&record).await {
            Ok(outcome) => outcome,
            Err(e) => DeepOutcome::Failed {
                error_message: e.to_string(),
            },
        };

        self.store
            .save_deep_result(record_id, &self.model_name, &outcome)
            .await?;
        Ok(outcome)
    }

    async fn analyze(&self, record: &SavedRecord) -> Result<DeepOutcome, AppError> {
        let page = self.page_content(record).await;

        tracing::info!(record_id = record.id, model = %self.model_name, "Requesting analysis");
        let output = self
            .completion
            .complete(&build_prompt(record, page.as_deref()))
            .await?;

        if output.content.trim().is_empty() {
            return Err(AppError::LlmError {
                message: "empty completion".into(),
                status_code: 0,
                retryable: false,
            });
        }

        Ok(DeepOutcome::Completed {
            analysis_result: extract_analysis(&output.content).to_string(),
            deep_content: output.content,
            tokens_used: output.tokens_used,
        })
    }

    /// Best-effort page text; `None` if the record has no URL or the page
    /// cannot be fetched or cleaned.
    async fn page_content(&self, record: &SavedRecord) -> Option<String> {
        if record.url.is_empty() {
            return None;
        }

        let html = match self.fetcher.fetch(&FetchRequest::get(&record.url)).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(url = %record.url, error = %e, "Page fetch failed; using summary only");
                return None;
            }
        };

        match self.cleaner.clean(&html) {
            Ok(markdown) => Some(truncate_chars(&markdown, self.max_content_chars)),
            Err(e) => {
                tracing::debug!(url = %record.url, error = %e, "Cleaning failed; using summary only");
                None
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_prompt(record: &SavedRecord, page: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze the following web page in depth.\n\n\
         Title: {}\n\nSummary: {}\n\nSource: {}\n\nKeyword: {}\n\nURL: {}\n",
        record.title, record.summary, record.source, record.keyword, record.url
    );

    if let Some(page) = page {
        prompt.push_str("\nPage content (Markdown):\n");
        prompt.push_str(page);
        prompt.push('\n');
    }

    prompt.push_str(
        "\nReturn a JSON object with these fields:\n\
         - full_content: the full text of the page\n\
         - key_points: list of key points\n\
         - summary: an in-depth summary\n\
         - tags: list of related tags\n\
         - sentiment: positive, negative or neutral\n\
         - importance: importance score from 1 to 10\n",
    );
    prompt
}

/// Pull the JSON payload out of a completion: a fenced ```` ```json ````
/// block, else the outermost `{…}`, else the whole reply.
pub fn extract_analysis(content: &str) -> &str {
    const FENCE: &str = "```json";

    if let Some(start) = content.find(FENCE) {
        let body = &content[start + FENCE.len()..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim();
    }

    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}'))
        && start < end
    {
        return content[start..=end].trim();
    }

    content
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
