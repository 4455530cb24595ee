//! Bounded worker pool
//!
//! A fixed number of workers consume pending objects from one bounded
//! channel; outcomes fan back in over a result channel. The first error
//! stops the producer from enqueueing further work, workers drain what was
//! already queued, and the caller receives the successes plus that first
//! error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use objmirror_common::{MirrorError, Result};
use objmirror_core::storage::ObjectInfo;
use objmirror_core::Rule;

use crate::trigger::Trigger;

/// Run every object through the trigger with at most `limit` workers
pub(crate) async fn dispatch_all(
    trigger: Arc<dyn Trigger>,
    rule: Arc<Rule>,
    objects: Vec<ObjectInfo>,
    limit: usize,
) -> (Vec<ObjectInfo>, Option<MirrorError>) {
    if objects.is_empty() {
        return (Vec::new(), None);
    }

    let abort = Arc::new(AtomicBool::new(false));
    let (job_tx, job_rx) = mpsc::channel::<ObjectInfo>(limit.max(1));
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(ObjectInfo, Result<()>)>();

    let worker_count = limit.max(1).min(objects.len());
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let job_rx = job_rx.clone();
        let trigger = trigger.clone();
        let rule = rule.clone();
        let done_tx = done_tx.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some(object) = job else { break };
                let result = trigger.dispatch(&rule, &object).await;
                if done_tx.send((object, result)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(done_tx);

    let producer_abort = abort.clone();
    let producer = tokio::spawn(async move {
        for object in objects {
            if producer_abort.load(Ordering::SeqCst) {
                break;
            }
            if job_tx.send(object).await.is_err() {
                break;
            }
        }
    });

    let mut successes = Vec::new();
    let mut first_error = None;
    while let Some((object, result)) = done_rx.recv().await {
        match result {
            Ok(()) => successes.push(object),
            Err(err) => {
                if first_error.is_none() {
                    abort.store(true, Ordering::SeqCst);
                    first_error = Some(err);
                }
            }
        }
    }

    let _ = producer.await;
    for worker in workers {
        let _ = worker.await;
    }
    (successes, first_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;

    struct CountingTrigger {
        calls: AtomicUsize,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Trigger for CountingTrigger {
        async fn dispatch(&self, _rule: &Rule, object: &ObjectInfo) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(object.url.as_str()) {
                return Err(MirrorError::storage(&object.url, "injected"));
            }
            Ok(())
        }
    }

    fn objects(count: usize) -> Vec<ObjectInfo> {
        (0..count)
            .map(|i| ObjectInfo {
                url: format!("mem://src/{}", i),
                name: i.to_string(),
                is_dir: false,
                size: 1,
                modified: Utc::now(),
                checksum: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_objects_processed() {
        let trigger = Arc::new(CountingTrigger {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let rule = Arc::new(Rule::simple("mem://src", "mem://dst"));
        let (successes, err) =
            dispatch_all(trigger.clone(), rule, objects(200), 50).await;
        assert!(err.is_none());
        assert_eq!(successes.len(), 200);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 200);
    }

    #[tokio::test]
    async fn test_first_error_reported_and_successes_kept() {
        let trigger = Arc::new(CountingTrigger {
            calls: AtomicUsize::new(0),
            fail_on: Some("mem://src/3".to_string()),
        });
        let rule = Arc::new(Rule::simple("mem://src", "mem://dst"));
        let (successes, err) = dispatch_all(trigger, rule, objects(10), 2).await;
        assert!(err.is_some());
        assert!(successes.iter().all(|o| o.url != "mem://src/3"));
        assert!(successes.len() < 10);
    }
}
