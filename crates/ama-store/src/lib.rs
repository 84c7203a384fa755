pub mod database;
pub mod error;
pub mod messages;
pub mod rooms;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use messages::{MessageRepo, MessageRow};
pub use rooms::{RoomRepo, RoomRow};
