//! LISTEN on a channel and print every notification until Ctrl-C.
//!
//! ```text
//! PGHOST=127.0.0.1 PGPORT=5432 PGUSER=postgres PGPASSWORD=postgres \
//!   cargo run --example listen --features examples -- orders
//! ```
//!
//! Then, from psql: `NOTIFY orders, 'hello';`

use anyhow::Context;
use pgwire_notify::{CancellationToken, ConnectConfig, Connection, SslMode, TlsConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn config_from_env() -> anyhow::Result<ConnectConfig> {
    let mode = match env_or("PGSSLMODE", "disable").as_str() {
        "disable" => SslMode::Disable,
        "prefer" => SslMode::Prefer,
        "require" => SslMode::Require,
        "verify-ca" => SslMode::VerifyCa,
        "verify-full" => SslMode::VerifyFull,
        other => anyhow::bail!("unknown PGSSLMODE: {other}"),
    };
    Ok(ConnectConfig {
        host: env_or("PGHOST", "127.0.0.1"),
        port: env_or("PGPORT", "5432").parse().context("PGPORT")?,
        user: env_or("PGUSER", "postgres"),
        password: env_or("PGPASSWORD", "postgres"),
        database: env_or("PGDATABASE", "postgres"),
        tls: TlsConfig {
            mode,
            ..TlsConfig::disabled()
        },
        ..ConnectConfig::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let channel = std::env::args().nth(1).unwrap_or_else(|| "events".into());
    let cfg = config_from_env()?;

    let conn = Connection::connect(&cfg).await.context("connect")?;
    conn.listen(&channel).await.context("listen")?;
    let own_pid = conn.backend_pid().await;
    tracing::info!(%channel, backend_pid = own_pid, "listening; Ctrl-C to stop");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        }
    });

    loop {
        match conn.get_notification(&cancel).await {
            Ok(n) => {
                let origin = if n.process_id == own_pid { " (self)" } else { "" };
                println!(
                    "{} pid={}{origin}: {}",
                    n.channel_lossy(),
                    n.process_id,
                    n.payload_lossy()
                );
            }
            Err(e) if e.is_interrupted() => break,
            Err(e) => return Err(e).context("get_notification"),
        }
    }

    conn.unlisten_all().await.context("unlisten")?;
    conn.close().await;
    tracing::info!("bye");
    Ok(())
}
