use nusb::transfer::TransferError;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `dsforty-lib` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("USB device not found. Is the Epson DS-40 connected?")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("Invalid scan configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Image error: {0}")]
    Codec(#[from] CodecError),

    #[error("Output error: {0}")]
    Io(#[source] io::Error),
}

/// Failure of a single bulk transfer on a [`DeviceChannel`](crate::channel::DeviceChannel).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Timeout during USB operation after {0:?}")]
    Timeout(Duration),

    #[error("Channel is closed")]
    Closed,
}

impl TransportError {
    /// Errors the DS-40 firmware is known to produce occasionally and recover from.
    ///
    /// A disconnect or a failure from the host stack is never benign.
    pub fn is_benign(&self) -> bool {
        match self {
            TransportError::Timeout(_) => true,
            TransportError::Transfer(TransferError::Disconnected) => false,
            TransportError::Transfer(_) => true,
            TransportError::Usb(_) | TransportError::Closed => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Scanner didn't ACK control mode (reply: {reply})")]
    HandshakeRejected { reply: String },

    #[error("Scanner didn't accept params (reply: {reply})")]
    ParamsRejected { reply: String },

    #[error("No paper in the feeder after {attempts} polls")]
    NoPaper { attempts: u32 },

    #[error("Scan cancelled while waiting for paper")]
    Cancelled,

    #[error("Bad image data ack (reply: {reply})")]
    BadImageAck { reply: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("No final height reported")]
    MissingHeight,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Autocrop could not place the page edges. Never fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Couldn't find edges (left {left} >= right {right})")]
pub struct CropDetectionFailed {
    pub left: u32,
    pub right: u32,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to decode JPEG: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to run jpegtran: {0}")]
    Spawn(#[source] io::Error),

    #[error("jpegtran exited with {status}: {stderr}")]
    CropFailed { status: ExitStatus, stderr: String },

    #[error("Crop rectangle {width}x{height}+{left}+0 is empty or outside the image")]
    InvalidRect { left: u32, width: u32, height: u32 },

    #[error("Image worker stopped: {0}")]
    Worker(#[source] tokio::task::JoinError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported resolution {0} dpi (must be 300 or 600)")]
    UnsupportedResolution(u16),

    #[error("JPEG quality {0} is out of range 1..100")]
    QualityOutOfRange(u8),

    #[error("Parameter block of {0} bytes does not fit the 7 digit size header")]
    ParamsTooLarge(usize),
}

/// Render a device reply for diagnostics, keeping printable ASCII readable.
pub(crate) fn describe_reply(reply: &[u8]) -> String {
    const PREVIEW: usize = 32;
    let head = &reply[..reply.len().min(PREVIEW)];
    if head.iter().all(|b| b.is_ascii_graphic() || *b == b' ') && !head.is_empty() {
        String::from_utf8_lossy(head).into_owned()
    } else {
        format!("0x{}", hex::encode(head))
    }
}
