// The ORPAR loop engine
//
// One state machine per loop, driven by a mailbox task. The server-side
// engine is the single writer of phase; everything else observes events.

pub mod manager;
pub mod runner;
pub mod state;

pub use manager::{EngineDeps, LoopManager};
pub use runner::{LoopCommand, LoopSnapshot};
pub use state::{EngineState, LoopState};
