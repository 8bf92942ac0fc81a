//! Strictly serial synthesis-and-playback queue.
//!
//! Fragments play back-to-back: synthesis of the next fragment never starts
//! before the previous fragment's playback-completion signal. Serialization
//! comes from an atomic processing guard plus a single drain task, not a
//! lock held across the pipeline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{decode_pcm_base64, AudioSink, SpeechSource};

/// Lazily opens the playback device on first use.
pub type SinkOpener = Box<dyn Fn() -> Result<Arc<dyn AudioSink>> + Send + Sync>;

/// Ordered text-to-speech playback queue.
///
/// `enqueue` never blocks; a background drain task pops fragments oldest
/// first and plays each to completion. Per-fragment failures are logged and
/// skipped. `reset` clears pending fragments and tears down the device,
/// ready for the next conversational turn.
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

struct Inner {
    pending: Mutex<VecDeque<String>>,
    // Reentrancy guard: true while a drain task is active.
    processing: AtomicBool,
    playing: watch::Sender<bool>,
    speech: Arc<dyn SpeechSource>,
    sink: Mutex<Option<Arc<dyn AudioSink>>>,
    open_sink: SinkOpener,
    sample_rate: u32,
}

impl PlaybackQueue {
    pub fn new(speech: Arc<dyn SpeechSource>, open_sink: SinkOpener, sample_rate: u32) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                playing,
                speech,
                sink: Mutex::new(None),
                open_sink,
                sample_rate,
            }),
        }
    }

    /// Append a fragment and start draining unless a drain is already active.
    /// Blank fragments are dropped without touching the playback flag.
    pub fn enqueue(&self, fragment: impl Into<String>) {
        let fragment = fragment.into();
        if fragment.trim().is_empty() {
            return;
        }
        {
            // Push and raise under one lock so the drain's idle check can
            // never observe the push without the raised flag (or clear the
            // flag between the two).
            let mut pending = lock(&self.inner.pending);
            pending.push_back(fragment);
            self.inner.playing.send_replace(true);
        }
        if !self.inner.processing.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }

    /// Observable playback state: true from first enqueue until the pending
    /// list is empty and nothing is in flight.
    pub fn playing(&self) -> watch::Receiver<bool> {
        self.inner.playing.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        *self.inner.playing.borrow()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Turn-boundary reset: drop pending fragments, clear the playback flag,
    /// cut in-flight audio, and tear down the device so the next turn
    /// reopens it fresh.
    pub fn reset(&self) {
        lock(&self.inner.pending).clear();
        self.inner.playing.send_replace(false);
        if let Some(sink) = lock(&self.inner.sink).take() {
            // The drain task still holds its own handle mid-play; stopping
            // here resolves that play immediately instead of letting the
            // superseded fragment sound into the next turn.
            sink.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn drain(inner: Arc<Inner>) {
    loop {
        loop {
            let fragment = lock(&inner.pending).pop_front();
            let Some(fragment) = fragment else { break };
            if fragment.trim().is_empty() {
                continue;
            }
            if let Err(e) = play_fragment(&inner, &fragment).await {
                // Speech is an enhancement over text: skip and move on.
                warn!("dropping fragment after synthesis/playback failure: {e:#}");
            }
        }

        inner.processing.store(false, Ordering::SeqCst);
        // A fragment may have arrived between the last pop and the guard
        // clear; reclaim the guard and keep draining if so. The idle check
        // and the flag clear happen under the pending lock, which `enqueue`
        // also holds for its push-and-raise, so a concurrent enqueue is
        // ordered entirely before or entirely after the clear.
        let reclaimed = {
            let pending = lock(&inner.pending);
            if pending.is_empty() {
                if !inner.processing.load(Ordering::SeqCst) {
                    inner.playing.send_replace(false);
                }
                false
            } else {
                !inner.processing.swap(true, Ordering::SeqCst)
            }
        };
        if !reclaimed {
            break;
        }
    }
}

async fn play_fragment(inner: &Inner, fragment: &str) -> Result<()> {
    debug!(chars = fragment.len(), "synthesizing fragment");
    let Some(encoded) = inner.speech.synthesize(fragment).await? else {
        // Provider returned no audio data: not an error, just nothing to say.
        return Ok(());
    };
    let buffer = decode_pcm_base64(&encoded, inner.sample_rate)?;

    let sink = {
        let mut slot = lock(&inner.sink);
        match slot.as_ref() {
            Some(sink) => Arc::clone(sink),
            None => {
                let sink = (inner.open_sink)().context("opening playback device")?;
                *slot = Some(Arc::clone(&sink));
                sink
            }
        }
    };
    sink.play(buffer).await
}
