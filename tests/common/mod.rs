#![allow(dead_code)]

use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use mailroom::{
    config::Config,
    message::{Message, NewMessage},
    notifier::Notifier,
    service::Service,
};
use tempfile::TempDir;

pub struct TmpService {
    svc: Service,
    tmpdir: TempDir,
}

impl Deref for TmpService {
    type Target = Service;

    fn deref(&self) -> &Self::Target {
        &self.svc
    }
}

impl TmpService {
    /// Drop the connection pool and reopen the same database file.
    pub async fn reopen(self) -> TmpService {
        let config = self.svc.config().clone();
        self.svc.db().close().await;

        TmpService {
            svc: Service::connect_with(config).await.unwrap(),
            tmpdir: self.tmpdir,
        }
    }

    /// Split into a shareable service, for workers and app data, and the
    /// directory guard that keeps the database file alive.
    pub fn into_shared(self) -> (Arc<Service>, TempDir) {
        (Arc::new(self.svc), self.tmpdir)
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        db_path: dir.path().join("mailroom.db").to_string_lossy().to_string(),
        poll_interval_secs: 1,
        error_backoff_secs: 1,
        send_timeout_secs: 1,
        stop_timeout_secs: 5,
        ..Config::default()
    }
}

pub async fn setup() -> TmpService {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut Config)) -> TmpService {
    let tmpdir = tempfile::tempdir().unwrap();

    let mut config = test_config(&tmpdir);
    tweak(&mut config);

    TmpService {
        svc: Service::connect_with(config).await.unwrap(),
        tmpdir,
    }
}

pub fn new_message(kind: &str) -> NewMessage {
    NewMessage::builder()
        .kind(kind)
        .recipient("customer@example.com")
        .subject("Test notification")
        .payload(br#"{"order_id":1}"#.to_vec())
        .build()
}

pub fn delayed_message(kind: &str, delay: Duration) -> NewMessage {
    NewMessage::builder()
        .kind(kind)
        .recipient("customer@example.com")
        .subject("Delayed notification")
        .payload(br#"{"order_id":1}"#.to_vec())
        .delay(delay)
        .build()
}

/// What a scripted notifier does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Deliver,
    Decline,
    Fail(&'static str),
    Panic,
    Hang(Duration),
}

/// Plays back a fixed sequence of outcomes, then delivers everything.
#[derive(Default)]
pub struct ScriptedNotifier {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedNotifier {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(std::iter::repeat(step).take(1000))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Notifier for ScriptedNotifier {
    fn send<'a>(&'a self, _message: &'a Message) -> BoxFuture<'a, eyre::Result<bool>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Deliver);

        Box::pin(async move {
            match step {
                Step::Deliver => Ok(true),
                Step::Decline => Ok(false),
                Step::Fail(reason) => Err(eyre::eyre!(reason)),
                Step::Panic => panic!("transport exploded"),
                Step::Hang(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(true)
                }
            }
        })
    }
}
