// Sensor node library: connectivity, pub/sub bridge, dashboard push and OTA
// lifecycle, driven by one cooperative loop. Platform access goes through
// the traits in `platform` so everything above it runs on the host too.

pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod node;
pub mod ota;
pub mod platform;
pub mod sensors;
pub mod timer;

pub use config::NodeConfig;
pub use node::{Collaborators, Node};
