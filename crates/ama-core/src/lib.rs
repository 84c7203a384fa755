pub mod events;
pub mod ids;

pub use events::{EventPayload, RoomEvent};
pub use ids::{MessageId, RoomId};
