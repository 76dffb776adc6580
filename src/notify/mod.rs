//! LISTEN/NOTIFY retrieval.
//!
//! A [`Connection`] is a cloneable, shared handle around a [`RawConnection`]
//! (the protocol session) and a [`ReadinessWaiter`]. All access to the raw
//! session goes through a [`Claim`], an async mutex guard held only for
//! non-blocking steps.
//!
//! # Blocking retrieval
//!
//! ```text
//!            ┌──────────────── claim held ────────────────┐
//!  claim ──► drain ──(empty)──► socket? ──► register token ──► release
//!              │                   │                              │
//!              ▼                   ▼                              ▼
//!          Delivered      ResourceUnavailable          wait (no claim held)
//!                                                       │          │
//!                                          cancelled ◄──┘          └──► readable
//!                                          Interrupted                    │
//!                                                      claim ◄────────────┘
//!                                                        │
//!                                             consume_input ──► drain ...
//! ```
//!
//! The token is registered before the claim is released. While the claim is
//! held nothing can close the session, so the descriptor being registered is
//! the session's own and not a recycled number.
//!
//! # Example
//!
//! ```ignore
//! use pgwire_notify::{ConnectConfig, Connection};
//! use tokio_util::sync::CancellationToken;
//!
//! let conn = Connection::connect(&ConnectConfig::default()).await?;
//! conn.listen("orders").await?;
//!
//! let cancel = CancellationToken::new();
//! let n = conn.get_notification(&cancel).await?;
//! println!("{} from pid {}: {}", n.channel_lossy(), n.process_id, n.payload_lossy());
//! ```

mod claim;

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{PgNotifyError, Result};
use crate::protocol::NotificationResponse;
use crate::wait::{DefaultWaiter, Interest, ReadinessWaiter, Socket, WaitToken};

pub use claim::Claim;

const GET_NOTIFICATION: &str = "get_notification";
const GET_NOTIFICATION_NONBLOCKING: &str = "get_notification_nonblocking";

/// A notification delivered by the server for a channel this session listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notification {
    /// Backend process that sent the notification.
    pub process_id: i32,
    /// Channel name as sent by the server, not necessarily UTF-8.
    pub channel: Bytes,
    /// Payload given to `NOTIFY`; empty when none was given.
    pub payload: Bytes,
}

impl Notification {
    pub fn channel_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.channel)
    }

    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<NotificationResponse> for Notification {
    fn from(n: NotificationResponse) -> Self {
        Self {
            process_id: n.process_id,
            channel: n.channel,
            payload: n.payload,
        }
    }
}

/// The protocol session the notification loop drives.
///
/// Every method is non-blocking. They are only ever called with the
/// connection's claim held.
pub trait RawConnection: Send {
    /// Pop one notification already decoded and queued by the session.
    fn next_notice(&mut self) -> Option<NotificationResponse>;

    /// The socket to wait on, or `None` if the session is closed.
    fn socket(&self) -> Option<Socket<'_>>;

    /// Read whatever bytes are available right now and decode them.
    fn consume_input(&mut self) -> Result<()>;

    /// Backend process id reported at startup.
    fn backend_pid(&self) -> i32;

    /// Tear the session down. Afterwards `socket()` returns `None`.
    fn close(&mut self);
}

struct Shared<C, W> {
    raw: Mutex<C>,
    /// Serializes request/response exchanges. Never held by retrieval.
    exchange: Mutex<()>,
    waiter: W,
    closed: CancellationToken,
}

/// Shared handle to a session. Clones refer to the same session.
pub struct Connection<C, W = DefaultWaiter> {
    shared: Arc<Shared<C, W>>,
}

impl<C, W> Clone for Connection<C, W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Woken {
    Ready,
    Closed,
}

impl<C: RawConnection, W: ReadinessWaiter> Connection<C, W> {
    pub fn new(raw: C, waiter: W) -> Self {
        Self {
            shared: Arc::new(Shared {
                raw: Mutex::new(raw),
                exchange: Mutex::new(()),
                waiter,
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Take exclusive access to the session.
    pub async fn claim(&self) -> Claim<'_, C> {
        Claim::new(self.shared.raw.lock().await)
    }

    /// Whether some caller currently holds the claim.
    pub fn is_claimed(&self) -> bool {
        self.shared.raw.try_lock().is_err()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub(crate) fn waiter(&self) -> &W {
        &self.shared.waiter
    }

    /// Exclusive right to run one request/response exchange. Unlike the
    /// claim it is held across waits; retrieval does not take it.
    pub(crate) async fn exchange(&self) -> MutexGuard<'_, ()> {
        self.shared.exchange.lock().await
    }

    /// Await a token with no claim held. Also returns once the connection
    /// is closed, since closing does not make a duplicated descriptor ready.
    pub(crate) async fn await_ready(&self, token: W::Token) -> std::io::Result<()> {
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Ok(()),
            res = token.wait() => res,
        }
    }

    async fn claim_or_cancel(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
    ) -> Result<Claim<'_, C>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PgNotifyError::Interrupted { op }),
            claim = self.claim() => Ok(claim),
        }
    }

    /// Wait for the next notification.
    ///
    /// Returns immediately if one is already queued. Otherwise blocks until
    /// the server sends one, `cancel` fires (`Interrupted`), the connection is
    /// closed (`ResourceUnavailable`) or reading fails. `cancel` also cuts
    /// short waiting for the claim. There is no built-in timeout: cancel the
    /// token from a timer, or drop the future, which is equally clean since
    /// no claim is held while waiting.
    pub async fn get_notification(&self, cancel: &CancellationToken) -> Result<Notification> {
        let mut claim = self.claim_or_cancel(cancel, GET_NOTIFICATION).await?;
        loop {
            if let Some(notice) = claim.next_notice() {
                claim.release();
                return Ok(notice.into());
            }

            let Some(socket) = claim.socket() else {
                claim.release();
                return Err(PgNotifyError::ResourceUnavailable {
                    op: GET_NOTIFICATION,
                });
            };
            let token = match self.shared.waiter.register(socket, Interest::Readable) {
                Ok(token) => token,
                Err(e) => {
                    claim.release();
                    return Err(PgNotifyError::from(e).in_op(GET_NOTIFICATION));
                }
            };
            claim.release();

            let woken = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PgNotifyError::Interrupted { op: GET_NOTIFICATION });
                }
                _ = self.shared.closed.cancelled() => Woken::Closed,
                res = token.wait() => {
                    res.map_err(|e| PgNotifyError::from(e).in_op(GET_NOTIFICATION))?;
                    Woken::Ready
                }
            };

            claim = self.claim_or_cancel(cancel, GET_NOTIFICATION).await?;
            match woken {
                // back to the drain; a closed session has no socket left
                Woken::Closed => tracing::debug!("connection closed during wait"),
                // closed between the wake-up and the re-claim
                Woken::Ready if claim.socket().is_none() => {
                    tracing::debug!("connection closed before ingest")
                }
                Woken::Ready => {
                    tracing::debug!("socket readable, consuming input");
                    if let Err(e) = claim.consume_input() {
                        claim.release();
                        return Err(e.in_op(GET_NOTIFICATION));
                    }
                }
            }
        }
    }

    /// Return a queued notification, reading once from the socket if none is
    /// queued yet. Never waits for the server.
    pub async fn get_notification_nonblocking(&self) -> Result<Option<Notification>> {
        let mut claim = self.claim().await;
        if let Some(notice) = claim.next_notice() {
            claim.release();
            return Ok(Some(notice.into()));
        }
        if let Err(e) = claim.consume_input() {
            claim.release();
            return Err(e.in_op(GET_NOTIFICATION_NONBLOCKING));
        }
        let notice = claim.next_notice();
        claim.release();
        Ok(notice.map(Notification::from))
    }

    /// Backend process id of this session, for matching notifications that
    /// originate from it.
    pub async fn backend_pid(&self) -> i32 {
        let claim = self.claim().await;
        let pid = claim.backend_pid();
        claim.release();
        pid
    }

    /// Close the session and wake every caller blocked in
    /// [`get_notification`](Self::get_notification). Idempotent.
    pub async fn close(&self) {
        let mut claim = self.claim().await;
        claim.close();
        claim.release();
        self.shared.closed.cancel();
    }
}
