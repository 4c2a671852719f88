pub mod amount;
pub mod config;
pub mod engine;
pub mod model;
pub mod payment;

pub use amount::Amount;
pub use config::{DeletionPolicy, EngineConfig};
pub use engine::{Checkout, Engine, Reservation};
pub use model::{Booking, BookingId, BookingStatus, Event, EventId, Purchaser};
