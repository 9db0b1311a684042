pub mod arena;
pub mod channel;
pub mod clock;
pub mod engine;
pub mod listener;
pub mod message;
pub mod queue;
pub mod reaper;
pub mod registry;

pub use arena::{Arena, ArenaStats, Block};
pub use channel::{Channel, ChannelInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    Broker, BrokerConfig, BrokerStats, DeliveryPolicy, PublishReceipt, PublishRequest,
    SubscribeOutcome, SweepReport, DEFAULT_ARENA_SIZE, DEFAULT_BUFFER_TIMEOUT_SECS,
    DEFAULT_MAX_MESSAGE_QUEUE_SIZE,
};
pub use listener::{Delivery, ListenerId, ListenerQueue, ParkedListener};
pub use message::{Cursor, Message};
pub use queue::{EvictionReport, Lookup, MessageQueue};
pub use reaper::{spawn_sweeper, IdleReaper, NeverReap, ReapPolicy};
pub use registry::ChannelRegistry;
