// OTA lifecycle - observes the platform updater and reports through the log

use log::{error, info, warn};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Receiving,
    Finished,
    Errored,
}

/// Why an update attempt was abandoned; none are recoverable on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OtaErrorKind {
    #[error("Auth Failed")]
    Auth,
    #[error("Begin Failed")]
    Begin,
    #[error("Connect Failed")]
    Connect,
    #[error("Receive Failed")]
    Receive,
    #[error("End Failed")]
    End,
}

impl OtaErrorKind {
    /// Numeric code reported alongside the message
    pub fn code(&self) -> u8 {
        match self {
            OtaErrorKind::Auth => 0,
            OtaErrorKind::Begin => 1,
            OtaErrorKind::Connect => 2,
            OtaErrorKind::Receive => 3,
            OtaErrorKind::End => 4,
        }
    }
}

/// What the incoming image replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Firmware,
    Filesystem,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Firmware => "sketch",
            UpdateKind::Filesystem => "filesystem",
        }
    }

    /// Parse an `X-Update-Kind` style header value; anything unknown is firmware
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "filesystem" || v == "fs" || v == "spiffs" => UpdateKind::Filesystem,
            _ => UpdateKind::Firmware,
        }
    }
}

/// One lifecycle callback, queued by updaters that run off the loop thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Start(UpdateKind),
    Progress { done: u64, total: u64 },
    End { sha256: Option<String> },
    Error(OtaErrorKind),
}

impl UpdateEvent {
    pub fn dispatch(&self, observer: &mut dyn UpdateObserver) {
        match self {
            UpdateEvent::Start(kind) => observer.on_start(*kind),
            UpdateEvent::Progress { done, total } => observer.on_progress(*done, *total),
            UpdateEvent::End { sha256 } => observer.on_end(sha256.as_deref()),
            UpdateEvent::Error(kind) => observer.on_error(*kind),
        }
    }
}

pub trait UpdateObserver {
    fn on_start(&mut self, kind: UpdateKind);
    fn on_progress(&mut self, done: u64, total: u64);
    fn on_end(&mut self, sha256: Option<&str>);
    fn on_error(&mut self, kind: OtaErrorKind);
}

/// Percent complete, `None` while the total size is unknown
pub fn progress_percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = (done.min(total) as u128 * 100) / total as u128;
    Some(percent as u8)
}

/// State of the update in flight (or the last one)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaSession {
    pub phase: OtaPhase,
    pub kind: Option<UpdateKind>,
    pub error: Option<OtaErrorKind>,
    pub percent: Option<u8>,
}

impl Default for OtaSession {
    fn default() -> Self {
        Self {
            phase: OtaPhase::Idle,
            kind: None,
            error: None,
            percent: None,
        }
    }
}

/// Logging observer that also tracks the session phase
#[derive(Debug, Default)]
pub struct OtaLifecycle {
    session: OtaSession,
}

impl OtaLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &OtaSession {
        &self.session
    }

    pub fn phase(&self) -> OtaPhase {
        self.session.phase
    }
}

impl UpdateObserver for OtaLifecycle {
    fn on_start(&mut self, kind: UpdateKind) {
        if self.session.phase == OtaPhase::Receiving {
            warn!("OTA restarted while a transfer was in progress");
        }
        self.session = OtaSession {
            phase: OtaPhase::Receiving,
            kind: Some(kind),
            error: None,
            percent: None,
        };
        info!("Start updating {}", kind.as_str());
    }

    fn on_progress(&mut self, done: u64, total: u64) {
        if self.session.phase != OtaPhase::Receiving {
            warn!("OTA progress outside of a transfer ({} / {})", done, total);
            return;
        }
        // Log each percent once; the updater reports per chunk
        match progress_percent(done, total) {
            Some(percent) if self.session.percent != Some(percent) => {
                self.session.percent = Some(percent);
                info!("Progress: {}%", percent);
            }
            Some(_) => {}
            None => info!("Progress: {} bytes", done),
        }
    }

    fn on_end(&mut self, sha256: Option<&str>) {
        self.session.phase = OtaPhase::Finished;
        info!("OTA end");
        if let Some(digest) = sha256 {
            info!("Image SHA-256: {}", digest);
        }
    }

    fn on_error(&mut self, kind: OtaErrorKind) {
        self.session.phase = OtaPhase::Errored;
        self.session.error = Some(kind);
        error!("OTA Error[{}]: {}", kind.code(), kind);
    }
}

/// Running SHA-256 over the received image
#[derive(Clone, Default)]
pub struct ImageDigest {
    hasher: Sha256,
    len: u64,
}

impl ImageDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowercase hex digest
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl UpdateObserver for Recorder {
        fn on_start(&mut self, kind: UpdateKind) {
            self.calls.push(format!("start:{}", kind.as_str()));
        }
        fn on_progress(&mut self, done: u64, total: u64) {
            self.calls.push(format!("progress:{}/{}", done, total));
        }
        fn on_end(&mut self, sha256: Option<&str>) {
            self.calls.push(format!("end:{}", sha256.unwrap_or("-")));
        }
        fn on_error(&mut self, kind: OtaErrorKind) {
            self.calls.push(format!("error:{}", kind));
        }
    }

    #[test]
    fn test_dispatch_calls_one_method_per_event() {
        let mut recorder = Recorder::default();
        for event in [
            UpdateEvent::Start(UpdateKind::Filesystem),
            UpdateEvent::Progress { done: 10, total: 20 },
            UpdateEvent::End { sha256: None },
            UpdateEvent::Error(OtaErrorKind::Receive),
        ] {
            event.dispatch(&mut recorder);
        }
        assert_eq!(
            recorder.calls,
            vec![
                "start:filesystem",
                "progress:10/20",
                "end:-",
                "error:Receive Failed"
            ]
        );
    }

    #[test]
    fn test_error_messages_are_distinct() {
        let kinds = [
            OtaErrorKind::Auth,
            OtaErrorKind::Begin,
            OtaErrorKind::Connect,
            OtaErrorKind::Receive,
            OtaErrorKind::End,
        ];
        let messages: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            messages,
            ["Auth Failed", "Begin Failed", "Connect Failed", "Receive Failed", "End Failed"]
        );
        let codes: Vec<u8> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_progress_percent_guards_zero_total() {
        assert_eq!(progress_percent(0, 0), None);
        assert_eq!(progress_percent(50, 99), Some(50));
        assert_eq!(progress_percent(1, 3), Some(33));
        assert_eq!(progress_percent(300, 200), Some(100));
        assert_eq!(progress_percent(u64::MAX, u64::MAX), Some(100));
    }

    #[test]
    fn test_lifecycle_phases() {
        let mut ota = OtaLifecycle::new();
        assert_eq!(ota.phase(), OtaPhase::Idle);

        // Progress before start is ignored
        ota.on_progress(5, 10);
        assert_eq!(ota.session().percent, None);

        ota.on_start(UpdateKind::Firmware);
        assert_eq!(ota.phase(), OtaPhase::Receiving);
        ota.on_progress(512, 1024);
        assert_eq!(ota.session().percent, Some(50));
        ota.on_end(Some("abc"));
        assert_eq!(ota.phase(), OtaPhase::Finished);

        ota.on_start(UpdateKind::Filesystem);
        assert_eq!(ota.session().kind, Some(UpdateKind::Filesystem));
        assert_eq!(ota.session().percent, None);
        ota.on_error(OtaErrorKind::Connect);
        assert_eq!(ota.phase(), OtaPhase::Errored);
        assert_eq!(ota.session().error, Some(OtaErrorKind::Connect));
    }

    #[test]
    fn test_update_kind_from_header() {
        assert_eq!(UpdateKind::from_header(None), UpdateKind::Firmware);
        assert_eq!(UpdateKind::from_header(Some("Filesystem")), UpdateKind::Filesystem);
        assert_eq!(UpdateKind::from_header(Some("sketch")), UpdateKind::Firmware);
    }

    #[test]
    fn test_image_digest() {
        let mut digest = ImageDigest::new();
        assert!(digest.is_empty());
        digest.update(b"ab");
        digest.update(b"c");
        assert_eq!(digest.len(), 3);
        assert_eq!(
            digest.finalize_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
