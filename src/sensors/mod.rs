// Sensor state shared across the node

pub mod readings;

pub use readings::{Readings, SharedReadings};
