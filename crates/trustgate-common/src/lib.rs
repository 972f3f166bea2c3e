//! TrustGate common types
//!
//! Shared foundation for the access-risk engine crates:
//! - Error taxonomy ([`error::EngineError`])
//! - Injectable clock ([`clock::Clock`])
//! - Security event model ([`event::SecurityEvent`])
//! - Persistence traits with in-memory implementations ([`store`])

pub mod clock;
pub mod error;
pub mod event;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EngineError, EngineResult};
pub use event::{EventStatus, LocationMetadata, SecurityEvent, SecurityEventType};
pub use store::{
    DeviceStore, EventStore, InMemoryDeviceStore, InMemoryEventStore, MfaDevice, MfaDeviceType,
    StoreError, StoreResult,
};
