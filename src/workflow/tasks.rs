//! Background analysis of new submissions
//! Author: kartik4091
//! Created: 2025-06-06
//!
//! Uploads enqueue a job and return immediately. One worker task reads the
//! stored PDF, hands its text to a `SubmissionAnalyzer` and saves the
//! labels as keywords. Failures never reach the upload; they are logged and
//! reported on the failure channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::pdf::DocumentParser;
use crate::storage::{FileStore, WorkflowStore};
use crate::types::TrackingCode;
use crate::utils::{join_lines, normalize};

pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Produces interest labels from the text of a submission
#[async_trait]
pub trait SubmissionAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub tracking_code: TrackingCode,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFailure {
    pub tracking_code: TrackingCode,
    pub reason: String,
}

#[derive(Clone)]
struct Worker {
    store: Arc<dyn WorkflowStore>,
    files: Arc<dyn FileStore>,
    parser: Arc<dyn DocumentParser>,
    analyzer: Arc<dyn SubmissionAnalyzer>,
}

impl Worker {
    async fn run(
        self,
        mut jobs: mpsc::Receiver<AnalysisJob>,
        failures: mpsc::UnboundedSender<AnalysisFailure>,
    ) {
        while let Some(job) = jobs.recv().await {
            if let Err(e) = self.process(&job).await {
                warn!("Analysis of {} failed: {}", job.tracking_code, e);
                let _ = failures.send(AnalysisFailure {
                    tracking_code: job.tracking_code,
                    reason: e.to_string(),
                });
            }
        }
        debug!("Analysis queue closed");
    }

    async fn process(&self, job: &AnalysisJob) -> Result<()> {
        let bytes = self.files.read(&job.path).await?;
        let parser = Arc::clone(&self.parser);
        let text = task::spawn_blocking(move || -> Result<String> {
            let doc = parser.open(&bytes)?;
            let mut pages = Vec::with_capacity(doc.page_count());
            for page in 0..doc.page_count() {
                pages.push(join_lines(&normalize(&doc.page_text(page)?)));
            }
            Ok(pages.join(" "))
        })
        .await??;

        let labels = self.analyzer.analyze(&text).await?;
        self.store.add_keywords(job.tracking_code, &labels).await?;
        debug!("Stored {} keyword(s) for {}", labels.len(), job.tracking_code);
        Ok(())
    }
}

/// Handle to the analysis worker. Dropping every handle stops the worker.
#[derive(Clone)]
pub struct AnalysisQueue {
    jobs: mpsc::Sender<AnalysisJob>,
}

impl AnalysisQueue {
    /// Spawns the worker on the current runtime
    pub fn spawn(
        store: Arc<dyn WorkflowStore>,
        files: Arc<dyn FileStore>,
        parser: Arc<dyn DocumentParser>,
        analyzer: Arc<dyn SubmissionAnalyzer>,
        depth: usize,
    ) -> (Self, mpsc::UnboundedReceiver<AnalysisFailure>, JoinHandle<()>) {
        let (jobs, rx) = mpsc::channel(depth.max(1));
        let (failures, failure_rx) = mpsc::unbounded_channel();
        let worker = Worker { store, files, parser, analyzer };
        let handle = tokio::spawn(worker.run(rx, failures));
        (Self { jobs }, failure_rx, handle)
    }

    /// Never waits; a full or closed queue drops the job
    pub fn enqueue(&self, job: AnalysisJob) -> Result<()> {
        let code = job.tracking_code;
        self.jobs.try_send(job).map_err(|e| {
            error!("Dropping analysis job for {}: {}", code, e);
            Error::internal(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::EditableDocument;
    use crate::storage::MemoryStore;

    struct NoFiles;

    #[async_trait]
    impl FileStore for NoFiles {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            Err(Error::NotFound(path.to_string()))
        }
        async fn write_new(&self, _path: &str, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn exists(&self, _path: &str) -> Result<bool> {
            Ok(false)
        }
        async fn discard(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NoParser;

    impl DocumentParser for NoParser {
        fn open(&self, _bytes: &[u8]) -> Result<Box<dyn EditableDocument>> {
            Err(Error::DocumentOpenError("unused".into()))
        }
    }

    struct Fixed;

    #[async_trait]
    impl SubmissionAnalyzer for Fixed {
        async fn analyze(&self, _text: &str) -> Result<Vec<String>> {
            Ok(vec!["nlp".into()])
        }
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        let (queue, mut failures, handle) = AnalysisQueue::spawn(
            store,
            Arc::new(NoFiles),
            Arc::new(NoParser),
            Arc::new(Fixed),
            4,
        );
        let code = TrackingCode::new(12_345_678).unwrap();
        queue
            .enqueue(AnalysisJob { tracking_code: code, path: "papers/12345678.pdf".into() })
            .unwrap();

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.tracking_code, code);
        assert!(failure.reason.contains("papers/12345678.pdf"));

        drop(queue);
        handle.await.unwrap();
    }
}
