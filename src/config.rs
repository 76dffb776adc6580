use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub mode: SslMode,
    pub ca_pem_path: Option<PathBuf>,
    pub sni_hostname: Option<String>,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            mode: SslMode::Disable,
            ca_pem_path: None,
            sni_hostname: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub password: String,
    pub database: String,

    /// Reported to the server; visible in `pg_stat_activity`.
    pub application_name: String,

    pub tls: TlsConfig,

    /// Upper bound for TCP connect, TLS upgrade and authentication together.
    pub connect_timeout: Duration,
}

impl ConnectConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            database: "postgres".into(),
            application_name: "pgwire-notify".into(),
            tls: TlsConfig::disabled(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
