//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use dsforty_lib::channel::{DeviceChannel, Reply, ScriptedChannel};
#[allow(unused_imports)]
pub use dsforty_lib::codec::{CropRect, ImageCodec};
#[allow(unused_imports)]
pub use dsforty_lib::config::{ColorMode, CropMode, EngineConfig, PaperWait, ScanConfig};
#[allow(unused_imports)]
pub use dsforty_lib::edge::Pixel;
#[allow(unused_imports)]
pub use dsforty_lib::error::{CodecError, Error, ProtocolError, TransportError};
#[allow(unused_imports)]
pub use std::time::Duration;
#[allow(unused_imports)]
pub use tokio_util::sync::CancellationToken;

use std::sync::Mutex;

/// Feeder background, as a colour scan sees it
#[allow(dead_code)]
pub const BLANK: Pixel = [44, 45, 45];

/// Printed page content
#[allow(dead_code)]
pub const INK: Pixel = [230, 228, 225];

/// Route library logs to the test harness, honouring `RUST_LOG`
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine policy without real delays
#[allow(dead_code)]
pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        control_retries: 1,
        control_retry_delay: Duration::ZERO,
        paper_wait: PaperWait::forever(Duration::from_millis(1)),
    }
}

/// Replies for the handshake and an accepted parameter block
#[allow(dead_code)]
pub fn handshake_replies() -> Vec<Reply> {
    vec![
        Reply::data(&b"FIN x0000000"[..]),
        Reply::data(&b"\x06"[..]),
        Reply::data(&b"PARAx0000000#parOK"[..]),
    ]
}

/// An `IMG` reply announcing `len` bytes, optionally with a `#peni` height record
#[allow(dead_code)]
pub fn image_reply(len: usize, height: Option<u32>) -> Reply {
    let mut reply = format!("IMG x{len:07X}");
    if let Some(height) = height {
        reply.push_str(&format!("#peni{:07}i{height:07}", 2550));
    }
    Reply::data(reply.into_bytes())
}

/// Everything a well-behaved scanner says for one page whose data arrives as `chunks`
#[allow(dead_code)]
pub fn page_replies(no_paper_polls: usize, chunks: &[(Vec<u8>, Option<u32>)]) -> Vec<Reply> {
    let mut replies = handshake_replies();
    for _ in 0..no_paper_polls {
        replies.push(Reply::data(&b"TRDTx0000000#errADF PE"[..]));
    }
    replies.push(Reply::data(&b"TRDTx0000000"[..]));
    for (data, height) in chunks {
        replies.push(image_reply(data.len(), *height));
        replies.push(Reply::data(data.clone()));
    }
    replies.push(Reply::data(&b"IMG x0000000#errADF PE"[..]));
    replies.push(Reply::data(&b"FIN x0000000"[..]));
    replies
}

/// A row that is blank except for `content`
#[allow(dead_code)]
pub fn synthetic_line(width: usize, content: std::ops::Range<usize>) -> Vec<Pixel> {
    (0..width).map(|i| if content.contains(&i) { INK } else { BLANK }).collect()
}

/// Codec double that records what it was asked to crop.
#[allow(dead_code)]
pub struct RecordingCodec {
    pub line: Option<Vec<Pixel>>,
    pub crops: Mutex<Vec<(usize, CropRect)>>,
    /// Threads the codec was called on.
    pub threads: Mutex<Vec<std::thread::ThreadId>>,
    /// Cancelled once this many pages have been cropped.
    pub stop_after: Option<(usize, CancellationToken)>,
}

#[allow(dead_code)]
impl RecordingCodec {
    pub fn new(line: Option<Vec<Pixel>>) -> Self {
        Self {
            line,
            crops: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            stop_after: None,
        }
    }

    pub fn stopping_after(mut self, pages: usize, cancel: CancellationToken) -> Self {
        self.stop_after = Some((pages, cancel));
        self
    }

    pub fn threads(&self) -> Vec<std::thread::ThreadId> {
        self.threads.lock().unwrap().clone()
    }

    pub fn crops(&self) -> Vec<(usize, CropRect)> {
        self.crops.lock().unwrap().clone()
    }
}

impl ImageCodec for RecordingCodec {
    fn scan_line(&self, _jpeg: &[u8], _width: u32, _height: u32) -> Result<Vec<Pixel>, CodecError> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        self.line
            .clone()
            .ok_or(CodecError::InvalidRect { left: 0, width: 0, height: 0 })
    }

    fn crop(&self, jpeg: &[u8], rect: CropRect) -> Result<Vec<u8>, CodecError> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        let mut crops = self.crops.lock().unwrap();
        crops.push((jpeg.len(), rect));
        if let Some((pages, cancel)) = &self.stop_after {
            if crops.len() >= *pages {
                cancel.cancel();
            }
        }
        Ok(format!("cropped {}", rect.geometry()).into_bytes())
    }
}
