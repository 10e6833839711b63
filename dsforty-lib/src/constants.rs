// Protocol and physical constants for the Epson DS-40

/// USB vendor ID (Seiko Epson)
pub const VID: u16 = 0x04b8;

/// USB product ID of the DS-40
pub const PID: u16 = 0x0152;

/// Bulk OUT endpoint used for commands
pub const ENDPOINT_OUT: u8 = 0x02;

/// Bulk IN endpoint used for replies and image data
pub const ENDPOINT_IN: u8 = 0x81;

/// Size of a single bulk IN request (1 MiB). Also advertised to the device in `#BSZ`.
pub const IN_BUF_SIZE: usize = 1024 * 1024;

/// Widest page the feeder accepts, in inches
pub const MAX_WIDTH_INCHES: f64 = 8.5;

/// Longest page the feeder accepts, in inches
pub const MAX_HEIGHT_INCHES: f64 = 14.0;

// --- Commands (host to device) ---

/// Abort whatever job is running and return to idle.
pub const CMD_FINISH: &[u8] = b"FIN x0000000";

/// Enter control mode.
pub const CMD_CONTROL_MODE: &[u8] = &[0x1c, 0x58];

/// Prefix of the parameter block size header, followed by 7 hex digits.
pub const CMD_PARAMS_PREFIX: &[u8] = b"PARAx";

/// Start a scan (polls the feeder for paper).
pub const CMD_START_SCAN: &[u8] = b"TRDTx0000000";

/// Request the next image chunk.
pub const CMD_IMAGE_CHUNK: &[u8] = b"IMG x0000000";

// --- Replies (device to host) ---

pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// Present in the reply to a parameter block the device accepted.
pub const MARKER_PARAMS_OK: &[u8] = b"#parOK";

/// "Paper empty": no sheet before a scan, end of page during one.
pub const MARKER_PAPER_EMPTY: &[u8] = b"#errADF PE";

/// Carries the final scanned height.
pub const MARKER_PAGE_END: &[u8] = b"#peni";

/// Every image chunk reply starts with this.
pub const IMAGE_ACK_PREFIX: &[u8] = b"IMG x";

/// Byte range of the hex-encoded chunk length in an image reply
pub const CHUNK_LEN_RANGE: std::ops::Range<usize> = 5..12;

/// Offset of the 7-digit height, relative to the start of `#peni`
pub const HEIGHT_OFFSET: usize = 13;

/// Width of every fixed-width numeric field on the wire
pub const FIELD_DIGITS: usize = 7;

/// Largest length the 7 hex digit `PARAx` header can express
pub const MAX_PARAMS_LEN: usize = 0x0FFF_FFFF;

// --- Autocrop ---

/// Smallest horizontal feature treated as content, in inches
pub const MIN_FEATURE_INCHES: f64 = 0.3937;

/// Background luminance seen by the sensor when no paper is under it (grayscale)
pub const BLANK_GRAY: u8 = 45;

/// Background colour seen by the sensor when no paper is under it
pub const BLANK_COLOR: [u8; 3] = [44, 45, 45];

/// How far a channel may stray from the blank reference and still count as blank
pub const BLANK_TOLERANCE: u8 = 25;
