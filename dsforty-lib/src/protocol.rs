//! # DS-40 scan protocol
//!
//! One page is a strict request/reply conversation over a [`DeviceChannel`]:
//!
//! ```text
//! Idle ── FIN, 1C 58 ──▶ ControlHandshake ── PARAx + block ──▶ ParamsSent
//!      ── TRDT (repeat while "#errADF PE") ──▶ AwaitingPaper ──▶ Scanning
//!      ── IMG (repeat until "#errADF PE") ──▶ Draining ── FIN ──▶ Finished
//! ```
//!
//! Any failure moves the session to the absorbing [`Phase::Faulted`] state.
//! Image replies look like `IMG x0000400#peni0002550i0003300...`: bytes 5..12
//! hold the hex length of the chunk that follows in separate reads, and the
//! optional `#peni` record carries the final page height.

use crate::channel::DeviceChannel;
use crate::config::{EngineConfig, PaperWait};
use crate::constants::{
    ACK, CHUNK_LEN_RANGE, CMD_CONTROL_MODE, CMD_FINISH, CMD_IMAGE_CHUNK, CMD_START_SCAN, FIELD_DIGITS,
    HEIGHT_OFFSET, IMAGE_ACK_PREFIX, MARKER_PAGE_END, MARKER_PAPER_EMPTY, MARKER_PARAMS_OK, NAK,
};
use crate::error::{ProtocolError, TransportError, describe_reply};
use crate::params::ParameterBlock;
use bytes::{Bytes, BytesMut};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Zero-length reads tolerated in a row while collecting a chunk.
pub const MAX_EMPTY_READS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Idle,
    ControlHandshake,
    ParamsSent,
    AwaitingPaper,
    Scanning,
    Draining,
    Finished,
    Faulted,
}

/// The engine's output for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScan {
    /// JPEG stream exactly as the device sent it, padded to the full acquisition height.
    pub jpeg: Bytes,
    /// Height in pixels the device reported for the sheet it actually fed.
    pub final_height: u32,
}

/// What an `IMG` reply announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageReply {
    /// The page is done; no data follows.
    EndOfPage,
    Chunk { len: usize, height: Option<u32> },
}

impl ImageReply {
    pub fn parse(reply: &[u8]) -> Result<Self, ProtocolError> {
        if !reply.starts_with(IMAGE_ACK_PREFIX) {
            return Err(ProtocolError::BadImageAck {
                reply: describe_reply(reply),
            });
        }
        if contains(reply, MARKER_PAPER_EMPTY) {
            return Ok(ImageReply::EndOfPage);
        }

        let height = match find(reply, MARKER_PAGE_END) {
            Some(idx) => {
                let start = idx + HEIGHT_OFFSET;
                let field = reply
                    .get(start..start + FIELD_DIGITS)
                    .ok_or_else(|| truncated("height", reply))?;
                Some(parse_field(field, 10, "height")? as u32)
            }
            None => None,
        };

        let field = reply
            .get(CHUNK_LEN_RANGE)
            .ok_or_else(|| truncated("chunk length", reply))?;
        let len = parse_field(field, 16, "chunk length")? as usize;

        Ok(ImageReply::Chunk { len, height })
    }
}

fn truncated(what: &str, reply: &[u8]) -> ProtocolError {
    ProtocolError::MalformedReply(format!("truncated {what} in {}", describe_reply(reply)))
}

fn parse_field(field: &[u8], radix: u32, what: &str) -> Result<u64, ProtocolError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| u64::from_str_radix(s, radix).ok())
        .ok_or_else(|| ProtocolError::MalformedReply(format!("bad {what} field {:?}", String::from_utf8_lossy(field))))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// State for scanning a single page. Holds the channel exclusively until it
/// finishes or faults.
pub struct ScanSession<'a, C: DeviceChannel + ?Sized> {
    channel: &'a mut C,
    config: EngineConfig,
    phase: Phase,
    buffer: BytesMut,
    final_height: Option<u32>,
}

impl<'a, C: DeviceChannel + ?Sized> ScanSession<'a, C> {
    pub fn new(channel: &'a mut C, config: EngineConfig) -> Self {
        Self {
            channel,
            config,
            phase: Phase::Idle,
            buffer: BytesMut::new(),
            final_height: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the whole page: handshake, parameters, paper wait, image transfer, drain.
    pub async fn run(mut self, params: &ParameterBlock, cancel: &CancellationToken) -> Result<RawScan, ProtocolError> {
        match self.drive(params, cancel).await {
            Ok(scan) => Ok(scan),
            Err(err) => {
                warn!(phase = %self.phase, error = %err, "Scan session faulted");
                self.transition(Phase::Faulted);
                Err(err)
            }
        }
    }

    async fn drive(&mut self, params: &ParameterBlock, cancel: &CancellationToken) -> Result<RawScan, ProtocolError> {
        self.handshake().await?;
        self.send_params(params).await?;
        self.wait_for_paper(cancel).await?;
        self.receive_image().await?;
        self.drain().await
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
    }

    async fn exchange(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.channel.write(command).await?;
        self.channel.read().await
    }

    async fn handshake(&mut self) -> Result<(), ProtocolError> {
        self.transition(Phase::ControlHandshake);
        // Finish off anything currently going on; the reply carries nothing useful.
        self.exchange(CMD_FINISH)
            .await
            .map_err(|err| ProtocolError::HandshakeRejected {
                reply: format!("transport error: {err}"),
            })?;

        let mut attempt = 0;
        loop {
            match self.exchange(CMD_CONTROL_MODE).await {
                Ok(reply) if reply[..] == [ACK] => break,
                Ok(reply) => {
                    if reply[..] == [NAK] {
                        warn!("Scanner refused control mode (NAK)");
                    }
                    return Err(ProtocolError::HandshakeRejected {
                        reply: describe_reply(&reply),
                    });
                }
                Err(err) if err.is_benign() && attempt < self.config.control_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Control mode request failed, retrying");
                    tokio::time::sleep(self.config.control_retry_delay).await;
                }
                Err(err) => {
                    return Err(ProtocolError::HandshakeRejected {
                        reply: format!("transport error: {err}"),
                    });
                }
            }
        }
        info!("Scanner is in control mode.");
        Ok(())
    }

    async fn send_params(&mut self, params: &ParameterBlock) -> Result<(), ProtocolError> {
        let [header, payload] = params.frame();
        self.channel.write(&header).await?;
        self.channel.write(&payload).await?;
        let reply = self.channel.read().await?;
        if !contains(&reply, MARKER_PARAMS_OK) {
            return Err(ProtocolError::ParamsRejected {
                reply: describe_reply(&reply),
            });
        }
        self.transition(Phase::ParamsSent);
        info!(len = params.len(), "Scan parameters accepted.");
        Ok(())
    }

    async fn wait_for_paper(&mut self, cancel: &CancellationToken) -> Result<(), ProtocolError> {
        let PaperWait {
            poll_interval,
            max_attempts,
        } = self.config.paper_wait;

        self.transition(Phase::AwaitingPaper);
        let mut attempts = 0u32;
        loop {
            let reply = self.exchange(CMD_START_SCAN).await?;
            attempts += 1;
            if !contains(&reply, MARKER_PAPER_EMPTY) {
                break;
            }
            if attempts == 1 {
                info!("Waiting for paper in the feeder...");
            }
            if max_attempts.is_some_and(|max| attempts >= max) {
                self.abort().await;
                return Err(ProtocolError::NoPaper { attempts });
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.abort().await;
                    return Err(ProtocolError::Cancelled);
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        self.transition(Phase::Scanning);
        info!("Paper detected, scanning.");
        Ok(())
    }

    async fn receive_image(&mut self) -> Result<(), ProtocolError> {
        loop {
            let reply = self.exchange(CMD_IMAGE_CHUNK).await?;
            match ImageReply::parse(&reply)? {
                ImageReply::EndOfPage => break,
                ImageReply::Chunk { len, height } => {
                    if let Some(height) = height {
                        debug!(height, "Final height reported");
                        self.final_height = Some(height);
                    }
                    self.read_chunk(len).await?;
                }
            }
        }
        self.transition(Phase::Draining);
        info!(bytes = self.buffer.len(), "Image transfer complete.");
        Ok(())
    }

    async fn read_chunk(&mut self, declared: usize) -> Result<(), ProtocolError> {
        let mut received = 0usize;
        let mut empty_reads = 0u32;
        while received < declared {
            let data = self.channel.read().await?;
            if data.is_empty() {
                empty_reads += 1;
                if empty_reads > MAX_EMPTY_READS {
                    return Err(ProtocolError::MalformedReply(format!(
                        "device stopped sending after {received} of {declared} bytes"
                    )));
                }
                continue;
            }
            empty_reads = 0;
            let owed = declared - received;
            if data.len() > owed {
                warn!(
                    declared,
                    excess = data.len() - owed,
                    "Device sent more than the chunk declared, dropping the excess"
                );
            }
            let take = data.len().min(owed);
            self.buffer.extend_from_slice(&data[..take]);
            received += take;
        }
        debug!(declared, total = self.buffer.len(), "Chunk received");
        Ok(())
    }

    async fn drain(&mut self) -> Result<RawScan, ProtocolError> {
        self.exchange(CMD_FINISH).await?;
        let final_height = self.final_height.ok_or(ProtocolError::MissingHeight)?;
        self.transition(Phase::Finished);
        Ok(RawScan {
            jpeg: std::mem::take(&mut self.buffer).freeze(),
            final_height,
        })
    }

    /// Best-effort return to idle after giving up on a page.
    async fn abort(&mut self) {
        if let Err(err) = self.exchange(CMD_FINISH).await {
            warn!(error = %err, "Failed to abort the pending job");
        }
    }
}

/// Scan one page on `channel`. The channel is free again once this returns.
pub async fn scan_page<C: DeviceChannel + ?Sized>(
    channel: &mut C,
    params: &ParameterBlock,
    config: EngineConfig,
    cancel: &CancellationToken,
) -> Result<RawScan, ProtocolError> {
    ScanSession::new(channel, config).run(params, cancel).await
}
