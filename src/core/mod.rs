pub mod circular_buffer;
pub mod decoder;
pub mod frame;
pub mod health;
pub mod message;
pub mod reconnect;
pub mod types;

pub use circular_buffer::*;
pub use decoder::*;
pub use frame::*;
pub use health::*;
pub use message::{NotificationMessage, fallback_app_name};
pub use reconnect::*;
pub use types::*;
