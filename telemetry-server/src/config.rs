use std::{path::PathBuf, time::Duration};

use getopts::Options;
use ipnet::IpNet;
use serde::Deserialize;
use telemetry_core::config::{apply, apply_bool, apply_path, read_file, ConfigError};

/// Server configuration.
///
/// Resolved from, in increasing order of precedence: defaults, the JSON file named by `-c` or
/// `CONFIG`, command-line flags, and environment variables.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to serve HTTP on, as `host:port`.
    pub address: String,

    /// Seconds between two snapshots of the metrics file. Zero writes a snapshot after every
    /// update.
    pub store_interval: u64,

    /// Path of the metrics file. Empty keeps metrics in memory only.
    #[serde(rename = "store_file")]
    pub file_storage_path: String,

    /// Load the metrics file on startup.
    pub restore: bool,

    /// Path of the SQLite database. Takes precedence over the metrics file when set.
    pub database_dsn: String,

    /// Shared secret used to check report signatures. Empty disables the check.
    pub key: String,

    /// Private key used to decrypt reports.
    pub crypto_key: Option<PathBuf>,

    /// Only accept reports whose `X-Real-IP` is within this CIDR. Empty accepts any sender.
    pub trusted_subnet: String,

    /// Also serve RPC.
    pub use_grpc: bool,

    /// Address to serve RPC on, as `host:port`.
    pub grpc_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: "localhost:8080".to_owned(),
            store_interval: 300,
            file_storage_path: "metrics-store.json".to_owned(),
            restore: false,
            database_dsn: String::new(),
            key: String::new(),
            crypto_key: None,
            trusted_subnet: String::new(),
            use_grpc: false,
            grpc_address: "localhost:3200".to_owned(),
        }
    }
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "path to a JSON configuration file", "PATH");
    opts.optopt("a", "address", "address to serve HTTP on (default: localhost:8080)", "HOST:PORT");
    opts.optopt("i", "store-interval", "seconds between file snapshots (default: 300)", "SECONDS");
    opts.optopt("f", "file-storage-path", "path of the metrics file", "PATH");
    opts.optflag("r", "restore", "load the metrics file on startup");
    opts.optopt("d", "database-dsn", "path of the SQLite database", "PATH");
    opts.optopt("k", "key", "shared secret used to check report signatures", "KEY");
    opts.optopt("", "crypto-key", "path to the private key", "PATH");
    opts.optopt("t", "trusted-subnet", "only accept reports from this subnet", "CIDR");
    opts.optflag("g", "grpc", "also serve RPC");
    opts.optopt(
        "",
        "grpc-address",
        "address to serve RPC on (default: localhost:3200)",
        "HOST:PORT",
    );
    opts.optflag("h", "help", "print this help menu");
    opts
}

impl ServerConfig {
    /// Loads the configuration from command-line arguments (without the program name) and the
    /// environment, as looked up through `env`.
    ///
    /// # Errors
    ///
    /// Fails if the arguments cannot be parsed, help was requested, the configuration file
    /// cannot be loaded, or a setting is invalid.
    pub fn load<F>(program: &str, args: &[String], env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let opts = options();
        let usage = opts.usage(&format!("Usage: {program} [options]"));
        let usage_error = |message: String| ConfigError::Usage(format!("{message}\n\n{usage}"));

        let matches = opts.parse(args).map_err(|e| usage_error(e.to_string()))?;
        if matches.opt_present("help") {
            return Err(ConfigError::Usage(usage.clone()));
        }
        if !matches.free.is_empty() {
            return Err(usage_error(format!("unexpected arguments: {}", matches.free.join(" "))));
        }

        let file = matches.opt_str("config").or_else(|| env("CONFIG")).filter(|p| !p.is_empty());
        let mut config = match file {
            Some(path) => read_file(path.as_ref())?,
            None => ServerConfig::default(),
        };

        // Flags.
        apply(&mut config.address, "-a", matches.opt_str("address"))?;
        apply(&mut config.store_interval, "-i", matches.opt_str("store-interval"))?;
        apply(&mut config.file_storage_path, "-f", matches.opt_str("file-storage-path"))?;
        if matches.opt_present("restore") {
            config.restore = true;
        }
        apply(&mut config.database_dsn, "-d", matches.opt_str("database-dsn"))?;
        apply(&mut config.key, "-k", matches.opt_str("key"))?;
        apply_path(&mut config.crypto_key, matches.opt_str("crypto-key"));
        apply(&mut config.trusted_subnet, "-t", matches.opt_str("trusted-subnet"))?;
        if matches.opt_present("grpc") {
            config.use_grpc = true;
        }
        apply(&mut config.grpc_address, "--grpc-address", matches.opt_str("grpc-address"))?;

        // Environment.
        apply(&mut config.address, "ADDRESS", env("ADDRESS"))?;
        apply(&mut config.store_interval, "STORE_INTERVAL", env("STORE_INTERVAL"))?;
        apply(&mut config.file_storage_path, "FILE_STORAGE_PATH", env("FILE_STORAGE_PATH"))?;
        apply_bool(&mut config.restore, "RESTORE", env("RESTORE"))?;
        apply(&mut config.database_dsn, "DATABASE_DSN", env("DATABASE_DSN"))?;
        apply(&mut config.key, "KEY", env("KEY"))?;
        apply_path(&mut config.crypto_key, env("CRYPTO_KEY"));
        apply(&mut config.trusted_subnet, "TRUSTED_SUBNET", env("TRUSTED_SUBNET"))?;
        apply_bool(&mut config.use_grpc, "USE_GRPC", env("USE_GRPC"))?;
        apply(&mut config.grpc_address, "GRPC_ADDRESS", env("GRPC_ADDRESS"))?;

        config.trusted_subnet()?;
        Ok(config)
    }

    /// Returns the file snapshot interval.
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval)
    }

    /// Returns the trusted subnet, if one is configured.
    ///
    /// # Errors
    ///
    /// Fails if the subnet is not a valid CIDR.
    pub fn trusted_subnet(&self) -> Result<Option<IpNet>, ConfigError> {
        let raw = self.trusted_subnet.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<IpNet>().map(Some).map_err(|e| ConfigError::Invalid {
            name: "trusted subnet".to_owned(),
            value: raw.to_owned(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write as _, path::PathBuf, time::Duration};

    use telemetry_core::config::ConfigError;

    use super::ServerConfig;

    fn load(args: &[&str], env: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        let env: HashMap<String, String> =
            env.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        ServerConfig::load("telemetry-server", &args, |name| env.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[], &[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert_eq!(config.trusted_subnet().unwrap(), None);
    }

    #[test]
    fn test_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address": "file:1", "store_interval": 60, "store_file": "/tmp/m.json",
                "restore": true, "trusted_subnet": "10.0.0.0/8"}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = load(
            &["-c", path, "-a", "flag:2", "-i", "0", "-g", "--crypto-key", "/keys/private.pem"],
            &[("ADDRESS", "env:3"), ("DATABASE_DSN", "metrics.db"), ("RESTORE", "false")],
        )
        .unwrap();

        assert_eq!(config.address, "env:3");
        assert_eq!(config.store_interval, 0);
        assert_eq!(config.file_storage_path, "/tmp/m.json");
        assert!(!config.restore);
        assert_eq!(config.database_dsn, "metrics.db");
        assert_eq!(config.crypto_key, Some(PathBuf::from("/keys/private.pem")));
        assert!(config.use_grpc);
        assert_eq!(config.trusted_subnet().unwrap(), Some("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(load(&["-t", "10.0.0.0"], &[]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(
            load(&[], &[("TRUSTED_SUBNET", "not a subnet")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(load(&["-i", "soon"], &[]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&["-r", "yes"], &[]), Err(ConfigError::Usage(_))));
        assert!(matches!(load(&["--help"], &[]), Err(ConfigError::Usage(_))));
    }
}
