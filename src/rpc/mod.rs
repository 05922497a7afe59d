//! Board command layer: framing, reply correlation, action dispatch.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌────────────┐   ┌──────────┐   ┌──────────────────────┐  │
//! │  │ Dispatcher │──▶│ Handler  │──▶│ Codec  (vendor sysex)│  │
//! │  │ (FIFO, 1×) │   │ (app)    │   │ → Transport.write    │  │
//! │  └────────────┘   └──────────┘   └──────────────────────┘  │
//! │        ▲               ▲ PendingReply                      │
//! │        │          ┌────┴──────┐   ┌──────────────────────┐ │
//! │     finish(id)    │ReplySlots │◀──│ EventInbox (replies, │ │
//! │                   └───────────┘   │ disconnect, error)   │ │
//! │                                   └──────────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod dispatcher;
pub mod flash;
pub mod transport;
