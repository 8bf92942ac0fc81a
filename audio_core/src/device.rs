//! System playback device behind a dedicated thread.
//!
//! The rodio output stream wraps a cpal stream handle that is not `Send`,
//! so a small thread owns it for the sink's lifetime. The `Sink` control
//! handle itself is thread-safe and shared with callers.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use tracing::info;

use crate::{AudioBuffer, AudioSink};

/// Playback device backed by the default rodio output stream.
///
/// Dropping the handle stops any in-flight audio and closes the device.
pub struct RodioSink {
    sink: Arc<rodio::Sink>,
    // The device thread exits (dropping the output stream) when this closes.
    _keepalive: tokio::sync::mpsc::UnboundedSender<()>,
}

impl RodioSink {
    /// Open the default output device.
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (keepalive, mut shutdown) = tokio::sync::mpsc::unbounded_channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow!("no audio output device: {e}")));
                        return;
                    }
                };
                let sink = Arc::new(rodio::Sink::connect_new(stream.mixer()));
                let _ = ready_tx.send(Ok(Arc::clone(&sink)));

                // Keep the output stream alive until the handle is dropped.
                while shutdown.blocking_recv().is_some() {}
            })
            .context("spawning audio output thread")?;

        let sink = ready_rx
            .recv()
            .context("audio output thread exited before opening the device")??;
        info!("audio output device opened");

        Ok(Self {
            sink,
            _keepalive: keepalive,
        })
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, buffer: AudioBuffer) -> Result<()> {
        self.sink
            .append(SamplesBuffer::new(1, buffer.sample_rate, buffer.samples));
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .context("waiting for playback completion")?;
        Ok(())
    }

    fn stop(&self) {
        // Clears the sink's source queue, so sleep_until_end returns.
        self.sink.stop();
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        // Cut any in-flight audio before the device thread winds down.
        self.sink.stop();
    }
}
