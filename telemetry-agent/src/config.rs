use std::{path::PathBuf, time::Duration};

use getopts::Options;
use serde::Deserialize;
use telemetry_core::config::{apply, apply_bool, apply_path, read_file, ConfigError};

/// Agent configuration.
///
/// Resolved from, in increasing order of precedence: defaults, the JSON file named by `-c` or
/// `CONFIG`, command-line flags, and environment variables.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address of the server's HTTP interface, as `host:port`.
    pub address: String,

    /// Seconds between two samples.
    pub poll_interval: u64,

    /// Seconds between two reports.
    pub report_interval: u64,

    /// Shared secret used to sign reports. Empty disables signing.
    pub key: String,

    /// Number of reports that may be in flight at once.
    pub rate_limit: usize,

    /// Server's public key, used to encrypt reports.
    pub crypto_key: Option<PathBuf>,

    /// Report over RPC instead of HTTP.
    pub use_grpc: bool,

    /// Address of the server's RPC interface, as `host:port`.
    pub grpc_address: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            address: "localhost:8080".to_owned(),
            poll_interval: 2,
            report_interval: 10,
            key: String::new(),
            rate_limit: 10,
            crypto_key: None,
            use_grpc: false,
            grpc_address: "localhost:3200".to_owned(),
        }
    }
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "path to a JSON configuration file", "PATH");
    opts.optopt("a", "address", "address of the server (default: localhost:8080)", "HOST:PORT");
    opts.optopt("p", "poll-interval", "seconds between samples (default: 2)", "SECONDS");
    opts.optopt("r", "report-interval", "seconds between reports (default: 10)", "SECONDS");
    opts.optopt("k", "key", "shared secret used to sign reports", "KEY");
    opts.optopt("l", "rate-limit", "reports in flight at once (default: 10)", "COUNT");
    opts.optopt("", "crypto-key", "path to the server's public key", "PATH");
    opts.optflag("g", "grpc", "report over RPC instead of HTTP");
    opts.optopt(
        "",
        "grpc-address",
        "address of the RPC server (default: localhost:3200)",
        "HOST:PORT",
    );
    opts.optflag("h", "help", "print this help menu");
    opts
}

impl AgentConfig {
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
            None => AgentConfig::default(),
        };

        // Flags.
        apply(&mut config.address, "-a", matches.opt_str("address"))?;
        apply(&mut config.poll_interval, "-p", matches.opt_str("poll-interval"))?;
        apply(&mut config.report_interval, "-r", matches.opt_str("report-interval"))?;
        apply(&mut config.key, "-k", matches.opt_str("key"))?;
        apply(&mut config.rate_limit, "-l", matches.opt_str("rate-limit"))?;
        apply_path(&mut config.crypto_key, matches.opt_str("crypto-key"));
        if matches.opt_present("grpc") {
            config.use_grpc = true;
        }
        apply(&mut config.grpc_address, "--grpc-address", matches.opt_str("grpc-address"))?;

        // Environment.
        apply(&mut config.address, "ADDRESS", env("ADDRESS"))?;
        apply(&mut config.poll_interval, "POLL_INTERVAL", env("POLL_INTERVAL"))?;
        apply(&mut config.report_interval, "REPORT_INTERVAL", env("REPORT_INTERVAL"))?;
        apply(&mut config.key, "KEY", env("KEY"))?;
        apply(&mut config.rate_limit, "RATE_LIMIT", env("RATE_LIMIT"))?;
        apply_path(&mut config.crypto_key, env("CRYPTO_KEY"));
        apply_bool(&mut config.use_grpc, "USE_GRPC", env("USE_GRPC"))?;
        apply(&mut config.grpc_address, "GRPC_ADDRESS", env("GRPC_ADDRESS"))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let settings = [
            ("poll interval", self.poll_interval),
            ("report interval", self.report_interval),
            ("rate limit", self.rate_limit as u64),
        ];
        match settings.into_iter().find(|(_, value)| *value == 0) {
            Some((name, value)) => Err(ConfigError::Invalid {
                name: name.to_owned(),
                value: value.to_string(),
                reason: "must be greater than zero".to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Returns the report interval.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write as _, path::PathBuf};

    use telemetry_core::config::ConfigError;

    use super::AgentConfig;

    fn load(args: &[&str], env: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        let env: HashMap<String, String> =
            env.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        AgentConfig::load("telemetry-agent", &args, |name| env.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(load(&[], &[]).unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address": "file:1", "poll_interval": 5, "report_interval": 20, "rate_limit": 3}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = load(
            &["-c", path, "-a", "flag:2", "-p", "7", "--crypto-key", "/keys/public.pem"],
            &[("ADDRESS", "env:3"), ("KEY", "secret"), ("USE_GRPC", "true")],
        )
        .unwrap();

        assert_eq!(config.address, "env:3");
        assert_eq!(config.poll_interval, 7);
        assert_eq!(config.report_interval, 20);
        assert_eq!(config.rate_limit, 3);
        assert_eq!(config.key, "secret");
        assert_eq!(config.crypto_key, Some(PathBuf::from("/keys/public.pem")));
        assert!(config.use_grpc);
        assert_eq!(config.grpc_address, "localhost:3200");
    }

    #[test]
    fn test_config_file_from_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rate_limit": 4}}"#).unwrap();
        let path = file.path().to_str().unwrap();

        assert_eq!(load(&[], &[("CONFIG", path)]).unwrap().rate_limit, 4);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(load(&["-p", "soon"], &[]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&["-l", "0"], &[]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&[], &[("RATE_LIMIT", "-1")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&["--bogus"], &[]), Err(ConfigError::Usage(_))));
        assert!(matches!(load(&["extra"], &[]), Err(ConfigError::Usage(_))));
        assert!(matches!(load(&["-h"], &[]), Err(ConfigError::Usage(_))));
    }
}
