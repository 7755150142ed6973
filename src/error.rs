use thiserror::Error;

/// Failures of the persistent credential store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },
    #[error("failed to clear namespace '{0}'")]
    Clear(String),
}

/// Failures reported by a pub/sub transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session is not open")]
    NotRunning,
    #[error("failed to open session on {locator}: {reason}")]
    Open { locator: String, reason: String },
    #[error("invalid locator: {0}")]
    Locator(#[from] LocatorError),
    #[error("unsupported mode '{0}'")]
    Mode(String),
    #[error("key expression '{0}' is too long")]
    KeyTooLong(String),
    #[error("frame of {len} bytes exceeds the {max} byte datagram limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("publish failed: {0}")]
    Publish(#[source] std::io::Error),
    #[error("subscribe to '{0}' rejected")]
    Subscribe(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("missing protocol prefix in '{0}'")]
    MissingProtocol(String),
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),
    #[error("bad socket address '{0}'")]
    BadAddress(String),
}

/// Failures while running the provisioning access point
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("access point failed to start: {0}")]
    AccessPoint(String),
    #[error("provisioning portal failed: {0}")]
    Portal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
