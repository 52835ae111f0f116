//! Sequential background queue for playlist store work.
//!
//! Each screen owns one `StoreWorker`.  Jobs run one after another on the
//! blocking pool, so a screen never sees its own writes reordered.  There is
//! no cancellation: a submitted job always runs, and its callback decides
//! what to do with the result.

use tokio::sync::mpsc;
use tracing::{error, warn};
use tune_proto::store::{self, PlaylistStore, SharedStore, StoreError};

type Job = Box<dyn FnOnce(Result<&mut PlaylistStore, StoreError>) + Send>;

#[derive(Clone)]
pub struct StoreWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

impl StoreWorker {
    pub fn new(store: SharedStore) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || match store::lock(&store) {
                    Ok(mut guard) => job(Ok(&mut *guard)),
                    Err(e) => job(Err(e)),
                })
                .await;
                if let Err(e) = result {
                    error!("Store job panicked: {}", e);
                }
            }
        });
        Self { jobs }
    }

    /// Queue `job`; `on_done` runs on the blocking thread with its result.
    /// Use it to post the result back to the UI channel.
    pub fn submit<T, F, C>(&self, job: F, on_done: C)
    where
        T: Send + 'static,
        F: FnOnce(&mut PlaylistStore) -> Result<T, StoreError> + Send + 'static,
        C: FnOnce(Result<T, StoreError>) + Send + 'static,
    {
        let boxed: Job = Box::new(move |store| on_done(store.and_then(job)));
        if self.jobs.send(boxed).is_err() {
            warn!("Store worker is gone, dropping job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tune_proto::track::Track;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let store = PlaylistStore::open_in_memory().unwrap().into_shared();
        let worker = StoreWorker::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let done = tx.clone();
        worker.submit(
            |s| s.create_playlist("First"),
            move |r| {
                let _ = done.send(format!("created {}", r.unwrap()));
            },
        );
        let done = tx.clone();
        worker.submit(
            |s| {
                let id = s.list_playlists()?[0].id;
                let track = Track {
                    title: "A".into(),
                    artist: "B".into(),
                    path: "/a.mp3".into(),
                    ..Default::default()
                };
                s.add_track_to_playlist(id, &track)
            },
            move |r| {
                let _ = done.send(format!("added {:?}", r.unwrap()));
            },
        );

        assert_eq!(rx.recv().await.unwrap(), "created 1");
        assert_eq!(rx.recv().await.unwrap(), "added Added");
    }

    #[tokio::test]
    async fn test_errors_reach_the_callback() {
        let store = PlaylistStore::open_in_memory().unwrap().into_shared();
        let worker = StoreWorker::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();

        worker.submit(
            |s| {
                let track = Track {
                    path: "/a.mp3".into(),
                    ..Default::default()
                };
                s.add_track_to_playlist(42, &track)
            },
            move |r| {
                let _ = tx.send(r.is_err());
            },
        );
        assert!(rx.recv().await.unwrap());
    }
}
