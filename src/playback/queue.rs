//! Sequential playback of synthesized clips.
//!
//! A single worker task owns the player, so exactly one clip plays at a time
//! and clips play in arrival order. A failed clip is logged and skipped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::player::AudioPlayer;

/// One queued clip
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub id: u64,
    pub clip: Vec<u8>,
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackCounts {
    pub queued: usize,
    pub played: usize,
    pub failed: usize,
    pub discarded: usize,
    pub pending: usize,
}

#[derive(Default)]
struct Shared {
    queued: AtomicUsize,
    played: AtomicUsize,
    failed: AtomicUsize,
    discarded: AtomicUsize,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    idle: Notify,
}

pub struct PlaybackQueue {
    tx: Option<mpsc::UnboundedSender<PlaybackItem>>,
    shared: Arc<Shared>,
    next_id: u64,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    /// Spawn the playback worker. Must be called inside a tokio runtime.
    pub fn new(player: Arc<dyn AudioPlayer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        info!("Playback queue started ({} player)", player.name());
        let worker = tokio::spawn(run_worker(player, rx, Arc::clone(&shared)));

        Self {
            tx: Some(tx),
            shared,
            next_id: 0,
            worker: Some(worker),
        }
    }

    /// Queue a clip behind everything already queued
    pub fn enqueue(&mut self, clip: Vec<u8>) -> bool {
        let Some(tx) = &self.tx else {
            debug!("Playback queue shut down, discarding clip");
            return false;
        };

        let item = PlaybackItem {
            id: self.next_id,
            clip,
        };
        self.next_id += 1;

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(item).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        self.shared.queued.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn counts(&self) -> PlaybackCounts {
        PlaybackCounts {
            queued: self.shared.queued.load(Ordering::Relaxed),
            played: self.shared.played.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            pending: self.shared.pending.load(Ordering::Acquire),
        }
    }

    /// Wait until every queued clip has played, failed or been discarded
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting clips and discard the ones not yet started.
    /// A clip that is already playing finishes on the worker.
    pub fn shutdown(&mut self) {
        if self.tx.take().is_some() {
            self.shared.shutdown.store(true, Ordering::Release);
            debug!("Playback queue shutting down");
        }
        self.worker.take();
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(
    player: Arc<dyn AudioPlayer>,
    mut rx: mpsc::UnboundedReceiver<PlaybackItem>,
    shared: Arc<Shared>,
) {
    while let Some(item) = rx.recv().await {
        if shared.shutdown.load(Ordering::Acquire) {
            shared.discarded.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("Playing clip {} ({} bytes)", item.id, item.clip.len());
            match player.play(item.clip).await {
                Ok(()) => {
                    shared.played.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Clip {} failed, advancing queue: {}", item.id, e);
                }
            }
        }

        shared.pending.fetch_sub(1, Ordering::AcqRel);
        shared.idle.notify_waiters();
    }
    debug!("Playback worker stopped");
}
