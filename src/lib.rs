//! eventbee: relays structured host events to an MQTT broker.
//!
//! The host hands records to a [`Producer`](core::Producer) on its own
//! threads; a single dispatcher task drains them, routes each one to
//! `base_topic/<event label>` and publishes it through the connection
//! manager from `eventbee_mqtt`. Broker outages never block the host.
//!
//! ## Modules
//!
//! * `config`: TOML configuration (`[logger]`, `[relay]`, `[transport]`),
//!   validation via `validator`, and the `print_*` macros used before
//!   logging is up.
//! * `core`: event records, the queue, producer, dispatcher and the
//!   [`Relay`](core::Relay) lifecycle.
//! * `logger`: `tracing` subscriber setup with console and journald
//!   outputs.

pub mod config;
pub mod core;
pub mod logger;

pub use eventbee_mqtt as mqtt;
