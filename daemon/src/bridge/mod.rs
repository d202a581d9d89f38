//! Hardware trigger bridge
//!
//! Turns recognized serial lines into trigger frames and fans them out to
//! every attached listener.

mod forwarder;
mod registry;

pub use forwarder::{TriggerBridge, TriggerRule, TriggerSet};
pub use registry::ListenerRegistry;
