use log::{Level, LevelFilter, Metadata, Record};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::OnceLock;
use std::time::Instant;

static SYSLOG: OnceLock<SyslogForwarder> = OnceLock::new();
static BOOT_TIME: OnceLock<Instant> = OnceLock::new();

/// Log target of the print-only tier, see [`node_print!`](crate::node_print)
pub const PRINT_TARGET: &str = "print";

// RFC 3164 facility "user-level messages"
const FACILITY_USER: u8 = 1;

#[allow(dead_code)]
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Syslog severities used by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 3,
    Warning = 4,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Error => Severity::Error,
            Level::Warn => Severity::Warning,
            Level::Info => Severity::Info,
            Level::Debug | Level::Trace => Severity::Debug,
        }
    }

    /// `<PRI>` value for the user facility
    pub fn priority(self) -> u8 {
        FACILITY_USER * 8 + self as u8
    }
}

/// One syslog datagram: `<PRI>app: [module] message`
pub fn format_syslog(app: &str, severity: Severity, module: &str, message: &str) -> String {
    format!("<{}>{}: [{}] {}", severity.priority(), app, module, message)
}

/// Fire-and-forget UDP sender to the remote collector
#[derive(Debug)]
pub struct SyslogForwarder {
    socket: UdpSocket,
    server: SocketAddr,
    app: String,
    print_severity: Severity,
}

impl SyslogForwarder {
    pub fn new(app: &str, server: SocketAddr, print_severity: Severity) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        // Never stall the loop on a full socket buffer
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            server,
            app: app.to_string(),
            print_severity,
        })
    }

    pub fn send(&self, severity: Severity, module: &str, message: &str) {
        let line = format_syslog(&self.app, severity, module, message);
        let _ = self.socket.send_to(line.as_bytes(), self.server);
    }

    pub fn print_severity(&self) -> Severity {
        self.print_severity
    }
}

/// Console logger with a compact timestamp that also forwards to syslog
struct NodeLogger;

impl log::Log for NodeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let boot_time = BOOT_TIME.get_or_init(Instant::now);
        let elapsed = boot_time.elapsed();
        let seconds = elapsed.as_secs();
        let millis = elapsed.subsec_millis();
        let ts_compact = if seconds < 60 {
            format!("{:>3}.{:03}s", seconds, millis)
        } else if seconds < 3600 {
            format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
        } else {
            format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
        };

        let module = record
            .module_path()
            .unwrap_or("unknown")
            .split("::")
            .last()
            .unwrap_or("unknown");
        let message = format!("{}", record.args());
        let print_only = record.target() == PRINT_TARGET;

        if print_only {
            println!("{} {}", ts_compact, message);
        } else {
            let (color, level_char) = match record.level() {
                Level::Error => (colors::BRIGHT_RED, 'E'),
                Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
                Level::Info => (colors::BRIGHT_GREEN, 'I'),
                Level::Debug => (colors::BRIGHT_BLUE, 'D'),
                Level::Trace => (colors::GRAY, 'T'),
            };
            let module_display = if module.len() > 12 { &module[..12] } else { module };
            println!(
                "{}{} [{}] {:>12} | {}{}",
                color, ts_compact, level_char, module_display, message, colors::RESET
            );
        }

        if let Some(syslog) = SYSLOG.get() {
            let severity = if print_only {
                syslog.print_severity()
            } else {
                Severity::from_level(record.level())
            };
            syslog.send(severity, module, &message);
        }
    }

    fn flush(&self) {}
}

static LOGGER: NodeLogger = NodeLogger;

/// Install the logger; call once, first thing in `main`
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(Instant::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Debug);

    println!("{}┌───────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!(
        "{}│   sensor-node {:<16}│{}",
        colors::BRIGHT_GREEN,
        env!("CARGO_PKG_VERSION"),
        colors::RESET
    );
    println!("{}└───────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

/// Start forwarding every record to the remote collector
///
/// Returns false if a forwarder was already attached.
pub fn attach_syslog(forwarder: SyslogForwarder) -> bool {
    let server = forwarder.server;
    let attached = SYSLOG.set(forwarder).is_ok();
    if attached {
        log::info!("Forwarding logs to syslog at {}", server);
    }
    attached
}

/// Parse and set log level from a string; returns true if applied
pub fn set_max_level_from_str(level: &str) -> bool {
    let lf = match level.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" | "information" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return false,
    };
    log::set_max_level(lf);
    true
}

/// Print-only tier: plain console line, forwarded at the default severity
#[macro_export]
macro_rules! node_print {
    ($($arg:tt)*) => { log::info!(target: $crate::logging::PRINT_TARGET, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::from_level(Level::Error), Severity::Error);
        assert_eq!(Severity::from_level(Level::Warn), Severity::Warning);
        assert_eq!(Severity::from_level(Level::Info), Severity::Info);
        assert_eq!(Severity::from_level(Level::Trace), Severity::Debug);
        assert_eq!(Severity::Error.priority(), 11);
        assert_eq!(Severity::Debug.priority(), 15);
    }

    #[test]
    fn test_format_syslog() {
        assert_eq!(
            format_syslog("base", Severity::Info, "pubsub", "Declaring subscriber"),
            "<14>base: [pubsub] Declaring subscriber"
        );
    }

    #[test]
    fn test_forwarder_sends_datagram() {
        let collector = UdpSocket::bind("127.0.0.1:0").unwrap();
        collector
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let server = collector.local_addr().unwrap();

        let forwarder = SyslogForwarder::new("base", server, Severity::Debug).unwrap();
        forwarder.send(Severity::Error, "ota", "OTA Error[1]: Begin Failed");

        let mut buf = [0u8; 256];
        let (len, _) = collector.recv_from(&mut buf).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "<11>base: [ota] OTA Error[1]: Begin Failed"
        );
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        assert!(!set_max_level_from_str("verbose"));
    }
}
