pub mod api;
pub mod broadcast;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;
pub mod subscription;

pub use broadcast::{Broadcaster, DispatchMode, DEFAULT_WRITE_TIMEOUT};
pub use connection::{Connection, DeliveryError};
pub use registry::{Subscriber, SubscriberId, SubscriberRegistry};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
