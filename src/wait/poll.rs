use std::io;
use std::time::Duration;

use super::{Interest, ReadinessWaiter, Socket, WaitToken};

/// Sleeps for a fixed interval instead of watching the socket.
///
/// Every token resolves after `interval` whether or not data arrived; the
/// caller's non-blocking re-check decides. Registers nothing with the OS.
#[derive(Debug, Clone, Copy)]
pub struct PollWaiter {
    interval: Duration,
}

impl PollWaiter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollWaiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl ReadinessWaiter for PollWaiter {
    type Token = PollToken;

    fn register(&self, _socket: Socket<'_>, _interest: Interest) -> io::Result<PollToken> {
        Ok(PollToken {
            interval: self.interval,
        })
    }
}

#[derive(Debug)]
pub struct PollToken {
    interval: Duration,
}

impl WaitToken for PollToken {
    async fn wait(self) -> io::Result<()> {
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}
