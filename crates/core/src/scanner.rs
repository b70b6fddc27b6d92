//! The scanner capability and the per-scan context handed to it.

use crate::device::Device;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope and deadline for one scan cycle.
///
/// The engine derives one of these per scan: the token is a child of the
/// engine's root token and is cancelled when the scan timeout elapses, so
/// observing either signal is enough. Scanners should treat channel sends
/// and socket reads as cancellable against it.
#[derive(Debug, Clone)]
pub struct ScanContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ScanContext {
    /// Context without a deadline, cancelled only through the token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Context that is cancelled when `deadline` passes. The expiry watch
    /// task lives as long as the token.
    pub fn with_deadline(token: CancellationToken, deadline: Instant) -> Self {
        let expiry = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => expiry.cancel(),
                _ = expiry.cancelled() => {}
            }
        });
        Self {
            token,
            deadline: Some(deadline),
        }
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self::with_deadline(token, Instant::now() + timeout)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The absolute deadline, when one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scan is cancelled (timeout or engine shutdown).
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// A discovery strategy (ARP cache, mDNS, SSDP, ...).
///
/// Implementations push partial device observations to `out` as they are
/// found and return when the context is cancelled. Cancellation is not an
/// error; returning `Err` surfaces as an [`Event::Error`](crate::Event::Error)
/// without aborting the rest of the scan.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable name recorded in [`Device::sources`](crate::Device::sources).
    fn name(&self) -> &'static str;

    /// Run one scan, streaming observations until done or cancelled.
    async fn scan(&self, ctx: ScanContext, out: mpsc::Sender<Arc<Device>>) -> Result<()>;
}
