//! Blocking I/O worker.
//!
//! Store and state-file jobs run one at a time on a single blocking thread,
//! in the order they were submitted. A save followed by a load of the same
//! record therefore always sees the save.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use rewards_store::{PublisherStore, StateStore};

pub(crate) type IoJob = Box<dyn FnOnce(&PublisherStore, &StateStore) + Send>;

pub(crate) struct IoWorker {
    jobs: mpsc::UnboundedSender<IoJob>,
}

impl IoWorker {
    pub(crate) fn start(store: Arc<PublisherStore>, state: Arc<StateStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<IoJob>();
        tokio::task::spawn_blocking(move || {
            info!("Rewards I/O worker started");
            let mut processed: u64 = 0;
            while let Some(job) = rx.blocking_recv() {
                job(&store, &state);
                processed += 1;
            }
            debug!("Rewards I/O worker stopped after {} jobs", processed);
        });
        Self { jobs: tx }
    }

    /// Queue a job. Returns false once the worker has stopped; the job and
    /// any reply it carries are dropped.
    pub(crate) fn submit(&self, job: IoJob) -> bool {
        self.jobs.send(job).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::DataPaths;
    use rewards_store::{BlobLoad, PublisherInfo, StateBlob};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        let store = Arc::new(PublisherStore::open(&paths.publisher_info_db).unwrap());
        let state = Arc::new(StateStore::new(&paths));
        let worker = IoWorker::start(store, state);

        worker.submit(Box::new(|store: &PublisherStore, state: &StateStore| {
            let mut info = PublisherInfo::new("a.com");
            info.name = "A".into();
            store.upsert_publisher(&info).unwrap();
            state.save(StateBlob::Ledger, "v1").unwrap();
        }));

        let (tx, rx) = oneshot::channel();
        worker.submit(Box::new(move |store: &PublisherStore, state: &StateStore| {
            let name = store.get_publisher("a.com").unwrap().map(|p| p.name);
            let _ = tx.send((name, state.load(StateBlob::Ledger)));
        }));

        let (name, blob) = rx.await.unwrap();
        assert_eq!(name.as_deref(), Some("A"));
        assert_eq!(blob, BlobLoad::Found("v1".into()));
    }
}
