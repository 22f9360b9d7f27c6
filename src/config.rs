use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Server settings, read once from `MOTORPOOL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    pub scheduler_interval: Duration,
    pub store_deadline: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "motorpool".into(),
            max_connections: 256,
            compact_threshold: 1000,
            scheduler_interval: Duration::from_secs(30),
            store_deadline: Duration::from_secs(5),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Tls(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Tls(msg) => write!(f, "TLS setup: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but unparsable ones are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parsed::<u64>(&lookup, var)?.map_or(default, Duration::from_millis))
        };

        let config = Config {
            port: parsed(&lookup, "MOTORPOOL_PORT")?.unwrap_or(defaults.port),
            bind: lookup("MOTORPOOL_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("MOTORPOOL_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("MOTORPOOL_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "MOTORPOOL_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "MOTORPOOL_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            scheduler_interval: millis("MOTORPOOL_SCHEDULER_INTERVAL_MS", defaults.scheduler_interval)?,
            store_deadline: millis("MOTORPOOL_STORE_DEADLINE_MS", defaults.store_deadline)?,
            metrics_port: parsed(&lookup, "MOTORPOOL_METRICS_PORT")?,
            tls_cert: lookup("MOTORPOOL_TLS_CERT"),
            tls_key: lookup("MOTORPOOL_TLS_KEY"),
        };

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "MOTORPOOL_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        if config.scheduler_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "MOTORPOOL_SCHEDULER_INTERVAL_MS",
                value: "0".into(),
            });
        }
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::Tls(
                "both MOTORPOOL_TLS_CERT and MOTORPOOL_TLS_KEY must be set, or neither".into(),
            ));
        }
        Ok(config)
    }

    /// Load the TLS acceptor if a certificate and key are configured.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        server.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(server))))
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
