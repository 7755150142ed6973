pub mod compression;
pub mod connectivity;
pub mod credentials;
pub mod dashboard;
pub mod pubsub;
pub mod transport;

pub use connectivity::{ConnectivityConfig, ConnectivityManager, ConnectivityState, InitOutcome};
pub use credentials::Credentials;
pub use dashboard::{DashboardPusher, EventSink, ServerEvent, SseHub};
pub use pubsub::PubSubBridge;
