//! Page acquisition: parameters, protocol, crop, output.

use crate::channel::{DeviceChannel, ResetFuture};
use crate::codec::{CropRect, ImageCodec};
use crate::config::{BlankProfile, CropMode, EngineConfig, ScanConfig};
use crate::edge::{self, EdgeResult};
use crate::error::{CodecError, Error, ProtocolError};
use crate::output::OutputTarget;
use crate::params::ParameterBlock;
use crate::protocol::{self, RawScan};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed page before handshaking again.
const PAGE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consecutive failed pages after which continuous scanning gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// A finished page, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedPage {
    pub jpeg: Vec<u8>,
    /// `None` when the raw stream was passed through uncropped.
    pub rect: Option<CropRect>,
    pub raw_len: usize,
    pub final_height: u32,
}

/// Drives the scanner through whole pages.
pub struct Scanner<C, K> {
    channel: C,
    codec: Arc<K>,
    config: ScanConfig,
    engine: EngineConfig,
}

impl<C: DeviceChannel, K: ImageCodec + 'static> Scanner<C, K> {
    pub fn new(channel: C, codec: K, config: ScanConfig, engine: EngineConfig) -> Self {
        Self {
            channel,
            codec: Arc::new(codec),
            config,
            engine,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn codec(&self) -> &K {
        &self.codec
    }

    pub fn into_parts(self) -> (C, Arc<K>) {
        (self.channel, self.codec)
    }

    /// Scan one page and crop it as configured.
    pub async fn scan_page(&mut self, cancel: &CancellationToken) -> Result<ScannedPage, Error> {
        let raw = self.acquire(cancel).await?;
        self.finish_page(raw).await
    }

    /// Scan and emit a single page.
    pub async fn run_once(
        &mut self,
        output: &mut OutputTarget,
        cancel: &CancellationToken,
    ) -> Result<ScannedPage, Error> {
        let page = self.scan_page(cancel).await?;
        output.emit(&page.jpeg).map_err(Error::Io)?;
        Ok(page)
    }

    /// Keep scanning pages until cancelled or the device goes away. Returns
    /// the number of pages saved.
    ///
    /// A failed page is logged and the next one is awaited. After each page
    /// the device is reset on a detached task, which never delays the next
    /// handshake.
    pub async fn run_continuous(
        &mut self,
        output: &mut OutputTarget,
        cancel: &CancellationToken,
    ) -> Result<u32, Error> {
        let mut saved = 0u32;
        let mut page_no = 0u32;
        let mut failures = 0u32;
        while !cancel.is_cancelled() {
            page_no += 1;
            info!(page = page_no, "Ready for the next page");
            let acquired = self.acquire(cancel).await;
            spawn_background_reset(self.channel.detached_reset());

            let result = match acquired {
                Ok(raw) => self.finish_page(raw).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(page) => {
                    output.emit(&page.jpeg).map_err(Error::Io)?;
                    saved += 1;
                    failures = 0;
                }
                Err(Error::Protocol(ProtocolError::Cancelled)) => break,
                Err(err) if is_fatal_for_run(&err) => return Err(err),
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        error!(failures, "Too many failed pages in a row, giving up");
                        return Err(err);
                    }
                    error!(page = page_no, error = %err, "Page failed, waiting for the next one");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(PAGE_RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!(pages = saved, "Continuous scanning stopped");
        Ok(saved)
    }

    async fn acquire(&mut self, cancel: &CancellationToken) -> Result<RawScan, Error> {
        let params = ParameterBlock::build(&self.config);
        debug!(
            resolution = %self.config.resolution(),
            color = %self.config.color(),
            quality = self.config.quality(),
            "Built parameter block of {} bytes",
            params.len()
        );
        let raw = protocol::scan_page(&mut self.channel, &params, self.engine, cancel).await?;
        info!(bytes = raw.jpeg.len(), height = raw.final_height, "Page received");
        Ok(raw)
    }

    async fn finish_page(&self, raw: RawScan) -> Result<ScannedPage, Error> {
        let raw_len = raw.jpeg.len();
        let final_height = raw.final_height;

        let Some(rect) = self.crop_rect(&raw).await else {
            return Ok(ScannedPage {
                jpeg: raw.jpeg.to_vec(),
                rect: None,
                raw_len,
                final_height,
            });
        };

        let codec = Arc::clone(&self.codec);
        let jpeg = run_blocking(move || codec.crop(&raw.jpeg, rect)).await?;
        Ok(ScannedPage {
            jpeg,
            rect: Some(rect),
            raw_len,
            final_height,
        })
    }

    /// The rectangle to keep, or `None` to emit the raw stream.
    pub async fn crop_rect(&self, raw: &RawScan) -> Option<CropRect> {
        let width = self.config.width_px();
        let full = CropRect {
            left: 0,
            width,
            height: raw.final_height,
        };
        match self.config.crop() {
            CropMode::None => None,
            CropMode::FixedHeight => Some(full),
            CropMode::AutoEdges => Some(match self.detect_edges(raw).await {
                Some(edges) => CropRect {
                    left: edges.left,
                    width: edges.width(),
                    height: raw.final_height,
                },
                None => full,
            }),
        }
    }

    async fn detect_edges(&self, raw: &RawScan) -> Option<EdgeResult> {
        let width = self.config.width_px();
        let height = raw.final_height;
        let codec = Arc::clone(&self.codec);
        let jpeg = raw.jpeg.clone();
        let line = match run_blocking(move || codec.scan_line(&jpeg, width, height)).await {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Could not sample the page, autocrop disabled");
                return None;
            }
        };
        match edge::detect_with_profile(&line, BlankProfile::for_mode(self.config.color())) {
            Ok(edges) => {
                debug!(left = edges.left, right = edges.right, "Detected page edges");
                Some(edges)
            }
            Err(err) => {
                warn!(error = %err, "Autocrop failed, keeping the full width");
                None
            }
        }
    }
}

/// Run CPU-bound or blocking codec work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, CodecError>
where
    F: FnOnce() -> Result<T, CodecError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(join) => Err(CodecError::Worker(join)),
    }
}

/// Errors after which waiting for another page is pointless.
fn is_fatal_for_run(err: &Error) -> bool {
    match err {
        Error::Protocol(ProtocolError::Transport(transport)) => !transport.is_benign(),
        Error::Protocol(_) | Error::Codec(_) => false,
        Error::DeviceNotFound | Error::Usb(_) | Error::Config(_) | Error::Io(_) => true,
    }
}

/// Run a device reset without waiting for it.
///
/// The reset runs on its own task. A watcher task reports its outcome: a
/// failure is logged as a warning, a panic as an error. Neither reaches the
/// caller, and the caller never waits on either task.
pub fn spawn_background_reset(reset: ResetFuture) {
    let task = tokio::spawn(reset);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => debug!("Background device reset completed"),
            Ok(Err(err)) => warn!(error = %err, "Background device reset failed"),
            Err(join) if join.is_panic() => error!("Background device reset panicked: {join}"),
            Err(join) => warn!("Background device reset was cancelled: {join}"),
        }
    });
}
