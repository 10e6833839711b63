//! The transport capability the protocol engine talks through.
//!
//! The DS-40 is half-duplex: every write is answered by exactly one read.
//! [`UsbChannel`](crate::device::UsbChannel) implements this over bulk
//! endpoints; a network transport would be another implementation of the
//! same trait.

use crate::error::{TransportError, describe_reply};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A reset that has been detached from the channel that issued it.
pub type ResetFuture = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'static>>;

#[async_trait]
pub trait DeviceChannel: Send {
    /// Send one command or payload.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one reply, up to the channel's buffer size.
    async fn read(&mut self) -> Result<Bytes, TransportError>;

    /// Reset the device and wait for the reset to finish.
    async fn reset(&mut self) -> Result<(), TransportError>;

    /// A reset that can run on another task while this channel keeps being used.
    fn detached_reset(&self) -> ResetFuture;

    /// Release the device. Further use fails with [`TransportError::Closed`].
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<C: DeviceChannel + ?Sized> DeviceChannel for Box<C> {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data).await
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        (**self).read().await
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset().await
    }

    fn detached_reset(&self) -> ResetFuture {
        (**self).detached_reset()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

/// One scripted answer to a `read`.
#[derive(Debug)]
pub enum Reply {
    Data(Bytes),
    Fail(TransportError),
}

impl Reply {
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Reply::Data(bytes.into())
    }
}

/// Replays a fixed sequence of replies and records every write.
///
/// Useful for tests and for exercising the engine without hardware. Running
/// out of replies yields [`TransportError::Closed`].
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    replies: VecDeque<Reply>,
    writes: Vec<Bytes>,
    resets: Arc<AtomicUsize>,
    closed: bool,
}

impl ScriptedChannel {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Everything written so far, in order.
    pub fn writes(&self) -> &[Bytes] {
        &self.writes
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }

    /// Resets issued so far, blocking and detached combined.
    pub fn reset_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl DeviceChannel for ScriptedChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        debug!(bytes = %describe_reply(data), "Scripted write");
        self.writes.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.replies.pop_front() {
            Some(Reply::Data(bytes)) => Ok(bytes),
            Some(Reply::Fail(err)) => Err(err),
            None => Err(TransportError::Closed),
        }
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detached_reset(&self) -> ResetFuture {
        let resets = Arc::clone(&self.resets);
        Box::pin(async move {
            resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
