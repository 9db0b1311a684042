/// Broker core: channels, message queues, parked listeners, arena.
pub mod broker;
/// Server configuration loading and command-line arguments.
pub mod config;
/// Common error types.
pub mod error;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Network stack: line protocol and Tokio-based server.
pub mod network;
/// Shutdown signal shared by the server, connections and the sweeper.
pub mod shutdown;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broker API.
pub use broker::{
    Broker, BrokerConfig, BrokerStats, ChannelInfo, Cursor, DeliveryPolicy, Message,
    PublishReceipt, PublishRequest, SubscribeOutcome,
};
/// Configuration.
pub use config::{Cli, Settings};
/// Operation errors and result types.
pub use error::{BrokerError, ConfigError, LoggingError, ProtocolError, PushResult};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Network server and protocol.
pub use network::{run_server, ServerConfig};
/// Shutdown signal.
pub use shutdown::{Shutdown, ShutdownSignal};
