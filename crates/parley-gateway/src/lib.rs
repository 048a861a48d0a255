//! Real-time side of parley: per-room fan-out, the messaging engine that
//! sits between connections and the store, and the WebSocket session loop.

pub mod engine;
pub mod registry;
pub mod session;

pub use engine::{Engine, EngineConfig, EngineError, Membership, TypingIdentity};
pub use registry::RoomRegistry;
