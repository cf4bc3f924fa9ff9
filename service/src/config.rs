use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default backend base URL used when `BASE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:4000";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the analytics backend serving `/auth/*` and `/events/stream`.
    #[arg(short, long, env, default_value = DEFAULT_BASE_URL)]
    base_url: Url,

    /// Directory holding the session, gate token and device fingerprint files.
    #[arg(long, env, default_value = ".pulse")]
    pub state_dir: PathBuf,

    /// Timeout in seconds applied to every login, refresh, logout and API call
    #[arg(long, env, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout_secs: u64,

    /// Retries for transient (5xx, network) HTTP failures. Never applied to 401s.
    #[arg(long, env, default_value_t = 1)]
    pub http_max_retries: u32,

    /// Seconds between two expiry checks of the current token
    #[arg(long, env, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub expiry_poll_interval_secs: u64,

    /// Seconds before token expiry at which the renewal prompt is raised
    #[arg(long, env, default_value_t = 300)]
    pub expiry_warning_window_secs: u64,

    /// Timeout in seconds for the event stream handshake
    #[arg(long, env, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub stream_handshake_timeout_secs: u64,

    /// Consecutive reconnect attempts before live updates are reported unavailable
    #[arg(long, env, default_value_t = 10)]
    pub stream_max_retries: u32,

    /// First reconnect delay in seconds; doubles on every consecutive failure
    #[arg(long, env, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub stream_initial_backoff_secs: u64,

    /// Upper bound in seconds for the reconnect delay
    #[arg(long, env, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub stream_max_backoff_secs: u64,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Config {
    /// Loads a `.env` file into the process environment so the `env`
    /// fallbacks above can see it. Call before parsing the command line.
    pub fn load_dotenv() {
        dotenv().ok();
    }

    /// Base URL without a trailing slash, ready for `format!("{}/auth/login", ..)`.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_poll_interval_secs)
    }

    pub fn expiry_warning_window(&self) -> Duration {
        Duration::from_secs(self.expiry_warning_window_secs)
    }

    pub fn stream_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_handshake_timeout_secs)
    }

    pub fn stream_initial_backoff(&self) -> Duration {
        Duration::from_secs(self.stream_initial_backoff_secs)
    }

    pub fn stream_max_backoff(&self) -> Duration {
        Duration::from_secs(self.stream_max_backoff_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["pulse"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_recommended_values() {
        let config = parse(&[]);

        assert_eq!(config.expiry_poll_interval(), Duration::from_secs(30));
        assert_eq!(config.expiry_warning_window(), Duration::from_secs(300));
        assert_eq!(config.stream_max_retries, 10);
        assert_eq!(config.stream_initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.stream_max_backoff(), Duration::from_secs(300));
        assert_eq!(config.runtime_env(), RustEnv::Development);
    }

    #[test]
    fn test_base_url_has_no_trailing_slash() {
        let config = parse(&["--base-url", "https://api.example.com/"]);
        assert_eq!(config.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = Config::try_parse_from(["pulse", "--base-url", "not a url"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_runtime_env_parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert_eq!("staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
    }

    #[test]
    fn test_zero_second_intervals_are_rejected() {
        for flag in [
            "--request-timeout-secs",
            "--expiry-poll-interval-secs",
            "--stream-handshake-timeout-secs",
            "--stream-initial-backoff-secs",
            "--stream-max-backoff-secs",
        ] {
            let result = Config::try_parse_from(["pulse", flag, "0"]);
            assert!(result.is_err(), "{flag} accepted 0");
        }

        let config = parse(&["--expiry-poll-interval-secs", "1"]);
        assert_eq!(config.expiry_poll_interval(), Duration::from_secs(1));
    }
}
