//! Compile-time configuration.
//!
//! `trouble-hci` keeps every table it owns at a fixed capacity that is set at compile time.
//!
//! The values are set via environment variables at build time: set the variable named
//! `TROUBLE_HCI_<value>`. For example `TROUBLE_HCI_MAX_CONNECTIONS=8 cargo build`. You can also
//! set them in the `[env]` section of `.cargo/config.toml`. Any value can be set.
//!
//! ## Memory usage
//!
//! Every connection carries its own ACL reassembly buffer of `ACL_PAYLOAD_SIZE + 4` bytes, so
//! raising `MAX_CONNECTIONS` or `ACL_PAYLOAD_SIZE` grows the size of [`Hci`](crate::Hci) accordingly.

mod raw {
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// Maximum number of concurrent connections
///
/// This covers ACL, SCO and LE connections together, including pending outgoing
/// and incoming ones.
///
/// Default: 4.
pub const MAX_CONNECTIONS: usize = raw::MAX_CONNECTIONS;

/// ACL payload size
///
/// Largest ACL payload accepted from the controller and the size of every per-connection
/// reassembly buffer (a 4 byte ACL header is added on top).
///
/// Default: 1021.
pub const ACL_PAYLOAD_SIZE: usize = raw::ACL_PAYLOAD_SIZE;

/// Incoming packet buffer size
///
/// Largest packet (header plus payload, without the H4 type byte) the H4 framing layer accepts.
/// Must hold at least an event with 255 parameter bytes.
///
/// Default: 1025.
pub const INCOMING_PACKET_BUFFER_SIZE: usize = if raw::INCOMING_PACKET_BUFFER_SIZE < 2 + 255 {
    2 + 255
} else {
    raw::INCOMING_PACKET_BUFFER_SIZE
};

/// Outgoing packet buffer size
///
/// Derived from the ACL payload size, large enough for a command with 255 parameter bytes.
pub const OUTGOING_PACKET_BUFFER_SIZE: usize = if 4 + ACL_PAYLOAD_SIZE > 3 + 255 {
    4 + ACL_PAYLOAD_SIZE
} else {
    3 + 255
};

/// Maximum number of registered event handlers
///
/// Default: 4.
pub const MAX_EVENT_HANDLERS: usize = raw::MAX_EVENT_HANDLERS;

/// LE whitelist size
///
/// Number of host-side whitelist entries tracked for auto connections.
///
/// Default: 4.
pub const WHITELIST_SIZE: usize = raw::WHITELIST_SIZE;

/// Pending actions per connection
///
/// Each connection queues commands it still has to send (link key replies, encryption,
/// parameter updates). Duplicates are merged, so this only bounds distinct action kinds.
///
/// Default: 8.
pub const MAX_PENDING_ACTIONS: usize = raw::MAX_PENDING_ACTIONS;

/// Timer list size
///
/// Number of timers the bundled [`TimerList`](crate::run_loop::TimerList) can hold at once.
///
/// Default: 8.
pub const TIMER_LIST_SIZE: usize = raw::TIMER_LIST_SIZE;
