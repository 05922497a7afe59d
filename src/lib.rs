//! KOOV board command layer.
//!
//! Turns front-end actions into pin operations and vendor sysex frames
//! for the KOOV robot controller, one action at a time.  The transport
//! and the generic pin protocol are collaborators behind the traits in
//! [`rpc::transport`] and [`app::ports`].

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod pins;
pub mod rpc;
pub mod session;

pub use app::actions::Action;
pub use app::events::{ActionOutput, BoardEvent, FirmwareInfo};
pub use config::SessionConfig;
pub use error::{ActionError, ActionResult, ErrorKind};
pub use session::{DeviceSession, SessionState};
