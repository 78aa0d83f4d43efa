//! Server configuration.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

/// Default capacity of each watcher's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default time a broadcast waits on a full queue, in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 250;

/// Default change feed poll interval in milliseconds.
pub const DEFAULT_FEED_POLL_MS: u64 = 2000;

/// Default bcrypt cost.
pub const DEFAULT_PASSWORD_COST: u32 = 12;

/// userdb server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub listen_address: SocketAddr,

    /// Path to the database storage directory.
    pub data_path: PathBuf,

    /// Capacity of each watcher's event queue.
    pub queue_capacity: usize,

    /// How long a broadcast waits on a full queue before evicting it.
    pub send_timeout: Duration,

    /// How often the change feed checks whether it is still wanted.
    pub feed_poll_interval: Duration,

    /// bcrypt cost for password hashes.
    pub password_cost: u32,
}

impl ServerConfig {
    /// Create a new server configuration with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_path: data_path.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            feed_poll_interval: Duration::from_millis(DEFAULT_FEED_POLL_MS),
            password_cost: DEFAULT_PASSWORD_COST,
        }
    }

    /// Set the listen address.
    pub fn with_listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    /// Set the queue capacity. Zero is raised to one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the broadcast send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the change feed poll interval.
    pub fn with_feed_poll_interval(mut self, interval: Duration) -> Self {
        self.feed_poll_interval = interval;
        self
    }

    /// Set the bcrypt cost.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "userdb-server")]
#[command(version, about = "userdb user service", long_about = None)]
pub struct Args {
    /// Path to the database storage directory.
    #[arg(short, long, env = "USERDB_DATA_PATH", default_value = "./data")]
    pub data_path: PathBuf,

    /// Address to listen on.
    #[arg(short, long, env = "USERDB_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: SocketAddr,

    /// Events buffered per watcher before backpressure applies.
    #[arg(long, env = "USERDB_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Milliseconds a broadcast waits on a full watcher before dropping it.
    #[arg(long, env = "USERDB_SEND_TIMEOUT_MS", default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,

    /// Change feed poll interval in milliseconds.
    #[arg(long, env = "USERDB_FEED_POLL_MS", default_value_t = DEFAULT_FEED_POLL_MS)]
    pub feed_poll_ms: u64,

    /// bcrypt cost for password hashes.
    #[arg(long, env = "USERDB_PASSWORD_COST", default_value_t = DEFAULT_PASSWORD_COST)]
    pub password_cost: u32,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig::new(self.data_path)
            .with_listen_address(self.listen)
            .with_queue_capacity(self.queue_capacity)
            .with_send_timeout(Duration::from_millis(self.send_timeout_ms))
            .with_feed_poll_interval(Duration::from_millis(self.feed_poll_ms))
            .with_password_cost(self.password_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(
            config.listen_address,
            DEFAULT_LISTEN_ADDRESS.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.data_path, PathBuf::from("./data"));
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.feed_poll_interval, Duration::from_secs(2));
        assert_eq!(config.password_cost, 12);
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("/var/lib/userdb")
            .with_listen_address("127.0.0.1:9090".parse().unwrap())
            .with_queue_capacity(0)
            .with_send_timeout(Duration::from_millis(10));

        assert_eq!(config.listen_address.port(), 9090);
        assert_eq!(config.data_path, PathBuf::from("/var/lib/userdb"));
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.send_timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_args_defaults_match_config() {
        let args = Args::try_parse_from(["userdb-server"]).unwrap();
        let config = args.into_config();
        let defaults = ServerConfig::default();

        assert_eq!(config.listen_address, defaults.listen_address);
        assert_eq!(config.queue_capacity, defaults.queue_capacity);
        assert_eq!(config.send_timeout, defaults.send_timeout);
        assert_eq!(config.password_cost, defaults.password_cost);
    }

    #[test]
    fn test_args_parse_flags() {
        let args = Args::try_parse_from([
            "userdb-server",
            "--data-path",
            "/tmp/u",
            "--listen",
            "127.0.0.1:3000",
            "--queue-capacity",
            "64",
            "--send-timeout-ms",
            "50",
        ])
        .unwrap();
        let config = args.into_config();

        assert_eq!(config.data_path, PathBuf::from("/tmp/u"));
        assert_eq!(config.listen_address.port(), 3000);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.send_timeout, Duration::from_millis(50));
    }
}
