use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

use tokio::io::unix::AsyncFd;

use super::{Interest, ReadinessWaiter, WaitToken};

/// Waits on the tokio reactor.
///
/// Each registration duplicates the descriptor and registers the duplicate.
/// The token owns that duplicate, so the socket it watches cannot be closed
/// and its number handed to an unrelated file while the token is pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct FdWaiter;

impl ReadinessWaiter for FdWaiter {
    type Token = FdToken;

    fn register(&self, socket: BorrowedFd<'_>, interest: Interest) -> io::Result<FdToken> {
        let dup = socket.try_clone_to_owned()?;
        let fd = AsyncFd::with_interest(dup, interest.into())?;
        tracing::trace!(
            fd = socket.as_raw_fd(),
            dup = fd.get_ref().as_raw_fd(),
            ?interest,
            "registered readiness interest"
        );
        Ok(FdToken { fd, interest })
    }
}

impl From<Interest> for tokio::io::Interest {
    fn from(i: Interest) -> Self {
        match i {
            Interest::Readable => tokio::io::Interest::READABLE,
            Interest::Writable => tokio::io::Interest::WRITABLE,
        }
    }
}

#[derive(Debug)]
pub struct FdToken {
    fd: AsyncFd<OwnedFd>,
    interest: Interest,
}

impl WaitToken for FdToken {
    async fn wait(self) -> io::Result<()> {
        // The guard is dropped without clearing readiness: the registration
        // itself goes away with the token.
        match self.interest {
            Interest::Readable => drop(self.fd.readable().await?),
            Interest::Writable => drop(self.fd.writable().await?),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn readable_token_fires_on_data() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();

        let token = FdWaiter.register(a.as_fd(), Interest::Readable).unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), async {
            // registered on a fresh token so the first one stays unconsumed
            FdWaiter
                .register(a.as_fd(), Interest::Readable)
                .unwrap()
                .wait()
                .await
        })
        .await;
        assert!(pending.is_err(), "nothing written yet");

        b.write_all(b"x").unwrap();
        tokio::time::timeout(Duration::from_secs(5), token.wait())
            .await
            .expect("readiness not reported")
            .unwrap();
    }

    #[tokio::test]
    async fn registration_sees_data_that_arrived_before_it() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.write_all(b"early").unwrap();

        let token = FdWaiter.register(a.as_fd(), Interest::Readable).unwrap();
        tokio::time::timeout(Duration::from_secs(5), token.wait())
            .await
            .expect("pending data not reported")
            .unwrap();
    }

    #[tokio::test]
    async fn token_outlives_the_original_descriptor() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();

        let token = FdWaiter.register(a.as_fd(), Interest::Readable).unwrap();
        drop(a);
        // the duplicate keeps the socket alive, so the peer can still reach it
        b.write_all(b"x").unwrap();
        tokio::time::timeout(Duration::from_secs(5), token.wait())
            .await
            .expect("readiness not reported")
            .unwrap();
    }
}
