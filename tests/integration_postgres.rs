#![cfg(feature = "integration-tests")]

use anyhow::{Context, Result};
use pgwire_notify::{CancellationToken, ConnectConfig, Connection, PgConnection};
use std::time::{Duration, Instant};
use testcontainers::ContainerRequest;
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt, core::IntoContainerPort, core::WaitFor};
use tokio::io::AsyncBufReadExt;
use tokio::task;
use tokio_postgres::NoTls;
use tracing::{info, warn};

fn init_tracing() {
    // RUST_LOG=info,pgwire_notify=debug cargo test --features integration-tests ...
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn postgres_image(host_port: u16) -> ContainerRequest<GenericImage> {
    GenericImage::new("postgres", "16-alpine")
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .with_mapped_port(host_port, 5432.tcp())
}

async fn follow_container_logs(container: &testcontainers::ContainerAsync<GenericImage>) {
    let mut err = container.stderr(true);
    task::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match err.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let l = line.trim_end();
                    if !l.is_empty() {
                        info!(target: "container:stderr", "{l}");
                    }
                }
                Err(e) => {
                    warn!(target: "container:stderr", "stderr follower error: {e}");
                    break;
                }
            }
        }
    });
}

async fn connect_pg(port: u16) -> Result<tokio_postgres::Client> {
    let dsn = format!("host=127.0.0.1 port={port} user=postgres password=postgres dbname=postgres");
    let (client, conn) = tokio_postgres::connect(&dsn, NoTls)
        .await
        .context("connect control-plane postgres")?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("control-plane connection error: {e}");
        }
    });

    Ok(client)
}

async fn wait_for_pg_ready(port: u16, timeout: Duration) -> Result<tokio_postgres::Client> {
    let start = Instant::now();
    loop {
        match connect_pg(port).await {
            Ok(c) => return Ok(c),
            Err(e) => {
                if start.elapsed() > timeout {
                    return Err(e).context("postgres did not become ready in time");
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

async fn listener(port: u16) -> Result<Connection<PgConnection>> {
    let cfg = ConnectConfig {
        port,
        ..ConnectConfig::default()
    };
    Connection::connect(&cfg)
        .await
        .context("connect listening session")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn postgres_listen_notify_e2e() -> Result<()> {
    init_tracing();

    let host_port: u16 = std::env::var("PG_ITEST_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(55433);

    info!("starting postgres container on host port {host_port}");
    let container = postgres_image(host_port)
        .start()
        .await
        .expect("start postgres");
    info!("container id={}", container.id());
    follow_container_logs(&container).await;

    let client = wait_for_pg_ready(host_port, Duration::from_secs(30)).await?;
    let conn = listener(host_port).await?;
    conn.listen("orders").await?;

    // 1) pid reported at startup matches what the server says
    let row = client
        .query_one(
            "SELECT pid FROM pg_stat_activity WHERE application_name = 'pgwire-notify'",
            &[],
        )
        .await
        .context("look up listener pid")?;
    let server_pid: i32 = row.get(0);
    assert_eq!(conn.backend_pid().await, server_pid);

    // 2) nothing pending
    assert!(conn.get_notification_nonblocking().await?.is_none());

    // 3) a notification from another session wakes a blocked waiter
    let waiter = tokio::spawn({
        let conn = conn.clone();
        async move { conn.get_notification(&CancellationToken::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    let notifier_pid: i32 = client
        .query_one("SELECT pg_backend_pid()", &[])
        .await?
        .get(0);
    client
        .batch_execute("NOTIFY orders, 'created:17'")
        .await
        .context("notify from control plane")?;

    let n = tokio::time::timeout(Duration::from_secs(10), waiter)
        .await
        .context("waiter not woken")??
        .context("get_notification")?;
    info!(channel = %n.channel_lossy(), payload = %n.payload_lossy(), "received");
    assert_eq!(n.channel_lossy(), "orders");
    assert_eq!(n.payload_lossy(), "created:17");
    assert_eq!(n.process_id, notifier_pid);

    // 4) several notifications in one transaction arrive in order
    client
        .batch_execute(
            "BEGIN; NOTIFY orders, 'a'; NOTIFY orders, 'b'; NOTIFY orders, 'c'; COMMIT;",
        )
        .await?;
    let cancel = CancellationToken::new();
    let mut got = Vec::new();
    for _ in 0..3 {
        let n = tokio::time::timeout(Duration::from_secs(10), conn.get_notification(&cancel))
            .await
            .context("ordered notification")??;
        got.push(n.payload_lossy().into_owned());
    }
    assert_eq!(got, ["a", "b", "c"]);

    // 5) self-notification carries our own pid; payload quoting survives
    conn.notify("orders", r"it's C:\tmp").await?;
    let n = tokio::time::timeout(Duration::from_secs(10), conn.get_notification(&cancel))
        .await
        .context("self notification")??;
    assert_eq!(n.process_id, conn.backend_pid().await);
    assert_eq!(n.payload_lossy(), r"it's C:\tmp");

    // 6) a server error surfaces and the session stays usable
    let err = conn.execute("SELECT * FROM no_such_table").await.unwrap_err();
    assert!(err.is_server());
    assert_eq!(err.op(), Some("execute"));
    assert_eq!(conn.execute("SELECT 1").await?, ["SELECT 1"]);

    // 7) unlisten stops delivery
    conn.unlisten("orders").await?;
    client.batch_execute("NOTIFY orders, 'dropped'").await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(conn.get_notification_nonblocking().await?.is_none());

    // 8) close wakes a waiter
    let waiter = tokio::spawn({
        let conn = conn.clone();
        async move { conn.get_notification(&CancellationToken::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    conn.close().await;
    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .context("close did not wake waiter")??
        .unwrap_err();
    assert!(err.is_resource_unavailable());

    Ok(())
}
