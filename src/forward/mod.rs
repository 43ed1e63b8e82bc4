//! Forwarding process supervision.
//!
//! One external forwarder process (gost or rathole) per tunnel, started,
//! probed, restarted and stopped by a [`Supervisor`] parameterised over a
//! [`ForwardEngine`].

pub mod binary;
pub mod command;
pub mod engine;
pub mod error;
pub mod gost;
pub mod log_sink;
pub mod probe;
pub mod rathole;
pub mod supervisor;
pub mod sweep;
pub mod watchdog;

pub use binary::BinaryLocator;
pub use command::{gost_args, Invocation, TunnelKind};
pub use engine::ForwardEngine;
pub use error::{ForwardError, ForwardResult};
pub use gost::{GostConfig, GostEngine, GostSupervisor, DEFAULT_GOST_PATH};
pub use log_sink::DIAGNOSTIC_TAIL_CHARS;
pub use probe::PortProber;
pub use rathole::{RatholeConfig, RatholeEngine, RatholeSupervisor, DEFAULT_RATHOLE_PATH};
pub use supervisor::{Supervisor, SupervisorTimings};
pub use watchdog::{check_once, spawn_watchdog, WatchdogPass, DEFAULT_WATCHDOG_INTERVAL};
