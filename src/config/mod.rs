//! # Configuration Management
//!
//! The declarative split configuration (file source, watcher, and the handoff
//! to the control loop) and the process settings.

pub mod handoff;
pub mod settings;
pub mod source;
pub mod watcher;

pub use handoff::{HandoffClosed, HandoffReceiver, HandoffSender, Reply};
pub use settings::{normalize_bind_address, ListenerPorts, Settings};
pub use source::{
    ConfigSource, DesiredState, InterfaceResolver, SplitConfig, StaticInterfaces, SystemInterfaces,
};
pub use watcher::ConfigWatcher;
