//! Simple-query execution and the LISTEN/UNLISTEN/NOTIFY helpers built on it.
//!
//! A query follows the same discipline as retrieval: register a token while
//! claimed, release, wait, re-claim. Only one query is outstanding at a
//! time. Notifications that arrive during the exchange are queued for the
//! next retrieval, and responses read by a concurrent retrieval are queued
//! for the query.

use crate::config::ConnectConfig;
use crate::error::{PgNotifyError, Result};
use crate::notify::{Connection, RawConnection};
use crate::protocol::messages::{parse_command_complete, parse_error_response};
use crate::wait::{DefaultWaiter, Interest, ReadinessWaiter};

use super::PgConnection;

const EXECUTE: &str = "execute";

impl Connection<PgConnection> {
    /// Connect with the platform's default readiness waiter.
    pub async fn connect(cfg: &ConnectConfig) -> Result<Self> {
        Self::connect_with_waiter(cfg, DefaultWaiter::default()).await
    }
}

impl<W: ReadinessWaiter> Connection<PgConnection, W> {
    pub async fn connect_with_waiter(cfg: &ConnectConfig, waiter: W) -> Result<Self> {
        Ok(Self::new(PgConnection::connect(cfg).await?, waiter))
    }

    /// Run a simple query and return its command tags.
    ///
    /// Rows are discarded. If the server reports an error it is returned
    /// once the session is back at ReadyForQuery. Queries run one at a time;
    /// the claim is only held between waits, so retrieval keeps working
    /// while a query is outstanding.
    ///
    /// Dropping the returned future mid-exchange leaves the session out of
    /// step with the server; later queries then fail until reconnecting.
    pub async fn execute(&self, sql: &str) -> Result<Vec<String>> {
        if sql.contains('\0') {
            return Err(PgNotifyError::Protocol("query contains a NUL byte".into()));
        }
        let _exchange = self.exchange().await;
        self.run_simple_query(sql)
            .await
            .map_err(|e| e.in_op(EXECUTE))
    }

    pub async fn listen(&self, channel: &str) -> Result<()> {
        self.execute(&format!("LISTEN {}", quote_identifier(channel)?))
            .await
            .map(drop)
    }

    pub async fn unlisten(&self, channel: &str) -> Result<()> {
        self.execute(&format!("UNLISTEN {}", quote_identifier(channel)?))
            .await
            .map(drop)
    }

    pub async fn unlisten_all(&self) -> Result<()> {
        self.execute("UNLISTEN *").await.map(drop)
    }

    pub async fn notify(&self, channel: &str, payload: &str) -> Result<()> {
        self.execute(&format!(
            "NOTIFY {}, {}",
            quote_identifier(channel)?,
            quote_literal(payload)?
        ))
        .await
        .map(drop)
    }

    /// Latest value of a server parameter, e.g. `server_version`.
    pub async fn parameter(&self, name: &str) -> Option<String> {
        let claim = self.claim().await;
        let value = claim.parameter(name).map(str::to_owned);
        claim.release();
        value
    }

    async fn run_simple_query(&self, sql: &str) -> Result<Vec<String>> {
        let mut claim = self.claim().await;
        if claim.query_in_flight {
            claim.release();
            return Err(PgNotifyError::Protocol(
                "an earlier query was abandoned mid-flight; reconnect".into(),
            ));
        }
        claim.query_in_flight = true;
        claim.send_query(sql);
        claim.release();

        let res = self.drive_query().await;
        if res.is_err() {
            // Server errors already ended at ReadyForQuery. Anything else
            // leaves nothing worth matching to a later query.
            let mut claim = self.claim().await;
            claim.reset_query();
            claim.release();
        }
        res
    }

    /// Flush the queued query and collect responses up to ReadyForQuery.
    async fn drive_query(&self) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut error = None;
        let mut claim = self.claim().await;
        loop {
            if claim.is_closed() {
                claim.release();
                return Err(PgNotifyError::ResourceUnavailable { op: EXECUTE });
            }
            let flushed = claim.flush()?;

            while let Some(msg) = claim.next_response() {
                match msg.tag {
                    b'C' => tags.push(parse_command_complete(&msg.payload)),
                    b'E' => {
                        error = Some(PgNotifyError::Server(parse_error_response(&msg.payload)));
                    }
                    b'Z' => {
                        claim.query_in_flight = false;
                        claim.release();
                        return match error {
                            Some(e) => Err(e),
                            None => Ok(tags),
                        };
                    }
                    // RowDescription, DataRow, EmptyQueryResponse
                    b'T' | b'D' | b'I' => {}
                    other => tracing::trace!(tag = %(other as char), "ignoring message in query"),
                }
            }

            let interest = if flushed {
                Interest::Readable
            } else {
                Interest::Writable
            };
            let socket = claim
                .socket()
                .ok_or(PgNotifyError::ResourceUnavailable { op: EXECUTE })?;
            let token = self.waiter().register(socket, interest)?;
            claim.release();

            self.await_ready(token).await?;

            claim = self.claim().await;
            if interest == Interest::Readable && !claim.is_closed() {
                claim.consume_input()?;
            }
        }
    }
}

fn reject_nul(s: &str, what: &str) -> Result<()> {
    if s.contains('\0') {
        return Err(PgNotifyError::Protocol(format!("{what} contains a NUL byte")));
    }
    Ok(())
}

/// Quote a channel name as an SQL identifier, keeping its exact case.
pub fn quote_identifier(name: &str) -> Result<String> {
    reject_nul(name, "identifier")?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a string literal. Backslashes switch to the `E'...'` form so the
/// result does not depend on `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> Result<String> {
    reject_nul(value, "literal")?;
    let quoted = value.replace('\'', "''");
    if quoted.contains('\\') {
        Ok(format!("E'{}'", quoted.replace('\\', "\\\\")))
    } else {
        Ok(format!("'{quoted}'"))
    }
}
