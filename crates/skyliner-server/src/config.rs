//! Server configuration.

use clap::Parser;

use crate::error::Error;

/// Default address for the HTTP/WebSocket listener.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default per-connection outbound buffer size, in messages.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default number of publishes that may wait for hub dispatch.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Skyliner real-time server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080").
    pub listen_addr: String,

    /// Outbound buffer size per connection. A subscriber whose buffer is
    /// full at publish time is disconnected.
    pub outbound_capacity: usize,

    /// Publishes that may wait for hub dispatch. Publishes beyond it are
    /// dropped; control commands are never limited.
    pub command_capacity: usize,

    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Create a configuration listening on the given address.
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            cors_origins: Vec::new(),
        }
    }

    /// Set the per-connection outbound buffer size.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the hub publish budget.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Add an allowed CORS origin.
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// Check the configuration for values the hub cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.listen_addr.trim().is_empty() {
            return Err(Error::Config("listen address must not be empty".to_string()));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::Config("outbound capacity must be at least 1".to_string()));
        }
        if self.command_capacity == 0 {
            return Err(Error::Config("command capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDR)
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "skyliner-server")]
#[command(version, about = "Skyliner real-time event hub", long_about = None)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, env = "SKYLINER_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Port to listen on; overrides the port of --listen.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Outbound buffer size per connection, in messages.
    #[arg(long, env = "SKYLINER_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Publishes that may wait for hub dispatch.
    #[arg(long, env = "SKYLINER_COMMAND_CAPACITY", default_value_t = DEFAULT_COMMAND_CAPACITY)]
    pub command_capacity: usize,

    /// Allowed CORS origins (comma separated). Empty allows any origin.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        let listen_addr = match self.port {
            Some(port) => {
                let host = self
                    .listen
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or(self.listen.as_str());
                format!("{host}:{port}")
            }
            None => self.listen,
        };

        ServerConfig {
            listen_addr,
            outbound_capacity: self.outbound_capacity,
            command_capacity: self.command_capacity,
            cors_origins: self
                .cors_origins
                .into_iter()
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        }
    }
}
