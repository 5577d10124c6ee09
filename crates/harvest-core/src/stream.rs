use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::ResultQueueEvent;

/// Consumer side of a job's event queue.
///
/// Pulls with a bounded wait and loops on timeout, so a consumer can be
/// cancelled while the job is idle. Ends right after the terminal event;
/// a spent stream cannot be restarted.
pub struct ResultStream {
    job_id: String,
    receiver: mpsc::UnboundedReceiver<ResultQueueEvent>,
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
    finished: bool,
}

impl ResultStream {
    pub(crate) fn new(
        job_id: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<ResultQueueEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            receiver,
            poll_interval,
            cancel: None,
            finished: false,
        }
    }

    /// End the stream early (without a terminal event) once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event, or `None` once the stream is spent or cancelled.
    pub async fn next_event(&mut self) -> Option<ResultQueueEvent> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                tracing::debug!(job_id = %self.job_id, "Result stream cancelled");
                self.finished = true;
                return None;
            }

            match tokio::time::timeout(self.poll_interval, self.receiver.recv()).await {
                Ok(Some(event)) => {
                    if event.is_terminal() {
                        self.finished = true;
                        self.receiver.close();
                    }
                    return Some(event);
                }
                Ok(None) => {
                    // Producer dropped without a terminal event.
                    tracing::error!(job_id = %self.job_id, "Collection worker exited unexpectedly");
                    self.finished = true;
                    return Some(ResultQueueEvent::fatal(
                        &self.job_id,
                        "collection worker exited without finishing",
                    ));
                }
                Err(_) => continue,
            }
        }
    }

    /// Drain everything up to and including the terminal event.
    pub async fn collect_all(mut self) -> Vec<ResultQueueEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = ResultQueueEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_event().await.map(|event| (event, stream))
        })
    }
}
