//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via P4RPC_CONFIG)
//! 3. Environment variables (`P4PORT`, `P4USER`, `P4CLIENT`, `P4HOST`,
//!    `P4CHARSET` and the `P4RPC_*` family)

use crate::address::ServerAddress;
use crate::error::ClientError;
use p4rpc_protocol::{CharsetContext, CharsetError, LineEnding};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default socket send buffer size.
pub const DEFAULT_SNDBUF: usize = 40960;

/// Default socket receive buffer size.
pub const DEFAULT_RCVBUF: usize = 10240;

/// Default client protocol level sent in the `protocol` packet.
pub const DEFAULT_CLIENT_LEVEL: u32 = 79;

/// Default api level; the server picks the highest it supports.
pub const DEFAULT_API_LEVEL: u32 = 99999;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server connection settings.
    pub server: ServerConfig,
    /// Text transcoding settings.
    pub charset: CharsetConfig,
    /// Protocol handshake and command settings.
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("P4RPC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.server.apply_overrides(&var);
        self.charset.apply_overrides(&var);
        self.protocol.apply_overrides(&var);
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks that the address and charset names resolve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .address()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.charset
            .context()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server address in `[ssl:]host:port` form.
    pub port: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds (0 = wait forever).
    pub so_timeout_ms: u64,
    /// Send buffer size advertised to the server.
    pub sndbuf: usize,
    /// Receive buffer size advertised to the server.
    pub rcvbuf: usize,
    /// Disable Nagle's algorithm.
    pub tcp_no_delay: bool,
    /// TLS settings, used when the address has an `ssl:` prefix.
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: "perforce:1666".to_string(),
            connect_timeout_ms: 10_000,
            so_timeout_ms: 30_000,
            sndbuf: DEFAULT_SNDBUF,
            rcvbuf: DEFAULT_RCVBUF,
            tcp_no_delay: true,
            tls: TlsConfig::default(),
        }
    }
}

impl ServerConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("P4PORT") {
            self.port = port;
        }

        if let Some(timeout) = var("P4RPC_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Some(timeout) = var("P4RPC_SO_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.so_timeout_ms = ms;
            }
        }

        if let Some(size) = var("P4RPC_SNDBUF") {
            if let Ok(n) = size.parse() {
                self.sndbuf = n;
            }
        }

        if let Some(size) = var("P4RPC_RCVBUF") {
            if let Ok(n) = size.parse() {
                self.rcvbuf = n;
            }
        }

        if let Some(nodelay) = var("P4RPC_TCP_NODELAY") {
            self.tcp_no_delay = parse_bool(&nodelay);
        }

        self.tls.apply_overrides(var);
    }

    /// Parses the configured address.
    pub fn address(&self) -> Result<ServerAddress, ClientError> {
        self.port.parse()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the read timeout, or `None` to wait forever.
    pub fn so_timeout(&self) -> Option<Duration> {
        (self.so_timeout_ms > 0).then(|| Duration::from_millis(self.so_timeout_ms))
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Accept any server certificate. Perforce servers commonly run with
    /// self-signed certificates, so this is the default unless a
    /// fingerprint or CA is given.
    pub trust_all: bool,
    /// Expected SHA-256 fingerprint of the server certificate, as hex
    /// with optional `:` separators.
    pub fingerprint: Option<String>,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    pub ca_cert_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the host from the address).
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust_all: true,
            fingerprint: None,
            ca_cert_path: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(trust) = var("P4RPC_TLS_TRUST_ALL") {
            self.trust_all = parse_bool(&trust);
        }
        if let Some(fingerprint) = var("P4RPC_TLS_FINGERPRINT") {
            self.fingerprint = Some(fingerprint);
        }
        if let Some(path) = var("P4RPC_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(name) = var("P4RPC_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }
}

/// Local line-ending choice for text content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEndingConfig {
    #[default]
    Local,
    Lf,
    Cr,
    Crlf,
    Lfcrlf,
}

impl LineEndingConfig {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" | "share" => Some(Self::Local),
            "unix" | "lf" => Some(Self::Lf),
            "mac" | "cr" => Some(Self::Cr),
            "win" | "crlf" => Some(Self::Crlf),
            "lfcrlf" => Some(Self::Lfcrlf),
            _ => None,
        }
    }

    pub fn line_ending(&self) -> LineEnding {
        match self {
            Self::Local => LineEnding::LOCAL,
            Self::Lf => LineEnding::LF,
            Self::Cr => LineEnding::CR,
            Self::Crlf => LineEnding::CRLF,
            Self::Lfcrlf => LineEnding::LFCRLF,
        }
    }
}

/// Charset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharsetConfig {
    /// Charset of text on the wire; `none` talks to a non-unicode server.
    pub wire: String,
    /// Charset of local files and command arguments.
    pub local: String,
    /// Apply the Shift-JIS wave-dash remap.
    pub shiftjis_remap: bool,
    /// Line endings of local text files.
    pub line_ending: LineEndingConfig,
}

impl Default for CharsetConfig {
    fn default() -> Self {
        Self {
            wire: "none".to_string(),
            local: "none".to_string(),
            shiftjis_remap: false,
            line_ending: LineEndingConfig::Local,
        }
    }
}

impl CharsetConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(charset) = var("P4CHARSET") {
            self.local = charset;
        }
        if let Some(charset) = var("P4RPC_WIRE_CHARSET") {
            self.wire = charset;
        }
        if let Some(remap) = var("P4RPC_SHIFTJIS_REMAP") {
            self.shiftjis_remap = parse_bool(&remap);
        }
        if let Some(le) = var("P4RPC_LINE_ENDING") {
            if let Some(parsed) = LineEndingConfig::parse(&le) {
                self.line_ending = parsed;
            }
        }
    }

    /// Builds the charset context for a connection.
    pub fn context(&self) -> Result<CharsetContext, CharsetError> {
        CharsetContext::from_names(
            &self.wire,
            &self.local,
            self.shiftjis_remap,
            self.line_ending.line_ending(),
        )
    }
}

/// Protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Accept command names outside the known catalog.
    pub relaxed_command_names: bool,
    /// Client protocol level.
    pub client_level: u32,
    /// Requested api level.
    pub api_level: u32,
    /// Ask the server to report stream specs.
    pub enable_streams: bool,
    /// Ask the server for progress packets.
    pub enable_progress: bool,
    /// Request tagged output.
    pub tagged: bool,
    /// Optional application name reported to the server.
    pub application_name: Option<String>,
    /// Program name reported to the server.
    pub program_name: String,
    /// Program version reported to the server.
    pub program_version: String,
    pub user: Option<String>,
    pub client: Option<String>,
    pub host: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            relaxed_command_names: false,
            client_level: DEFAULT_CLIENT_LEVEL,
            api_level: DEFAULT_API_LEVEL,
            enable_streams: true,
            enable_progress: false,
            tagged: true,
            application_name: None,
            program_name: env!("CARGO_PKG_NAME").to_string(),
            program_version: env!("CARGO_PKG_VERSION").to_string(),
            user: None,
            client: None,
            host: None,
            cwd: None,
        }
    }
}

impl ProtocolConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(user) = var("P4USER") {
            self.user = Some(user);
        }
        if let Some(client) = var("P4CLIENT") {
            self.client = Some(client);
        }
        if let Some(host) = var("P4HOST") {
            self.host = Some(host);
        }
        if let Some(relaxed) = var("P4RPC_RELAXED") {
            self.relaxed_command_names = parse_bool(&relaxed);
        }
        if let Some(level) = var("P4RPC_CLIENT_LEVEL") {
            if let Ok(n) = level.parse() {
                self.client_level = n;
            }
        }
        if let Some(name) = var("P4RPC_APP_NAME") {
            self.application_name = Some(name);
        }
        if let Some(progress) = var("P4RPC_PROGRESS") {
            self.enable_progress = parse_bool(&progress);
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.sndbuf, 40960);
        assert_eq!(config.server.rcvbuf, 10240);
        assert!(config.server.tcp_no_delay);
        assert_eq!(config.server.so_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.address().unwrap().port, 1666);
        assert_eq!(config.protocol.client_level, DEFAULT_CLIENT_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("P4PORT", "ssl:1667"),
            ("P4USER", "bruno"),
            ("P4CHARSET", "shiftjis"),
            ("P4RPC_SHIFTJIS_REMAP", "true"),
            ("P4RPC_SO_TIMEOUT_MS", "0"),
            ("P4RPC_LINE_ENDING", "win"),
            ("P4RPC_SNDBUF", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        let addr = config.server.address().unwrap();
        assert!(addr.tls);
        assert_eq!(addr.host, "localhost");
        assert_eq!(config.protocol.user.as_deref(), Some("bruno"));
        assert_eq!(config.charset.local, "shiftjis");
        assert!(config.charset.shiftjis_remap);
        assert_eq!(config.charset.line_ending, LineEndingConfig::Crlf);
        assert_eq!(config.server.so_timeout(), None);
        // Unparseable values leave the default in place.
        assert_eq!(config.server.sndbuf, DEFAULT_SNDBUF);
    }

    #[test]
    fn test_validate_rejects_unknown_charset() {
        let mut config = Config::default();
        config.charset.local = "klingon".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.charset.line_ending, config.charset.line_ending);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: Config = serde_yaml::from_str("charset:\n  local: eucjp\n").unwrap();
        assert_eq!(parsed.charset.local, "eucjp");
        assert_eq!(parsed.charset.wire, "none");
        assert_eq!(parsed.server.sndbuf, DEFAULT_SNDBUF);
    }

    #[test]
    fn test_from_file_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p4rpc.yaml");

        let mut config = Config::default();
        config.server.port = "ssl:p4.example.com:1666".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, "ssl:p4.example.com:1666");

        let missing = Config::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(..))));
    }
}
