//! Structured logging utilities for OOFS components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use oofs_config::log_worker_info;
//!
//! log_worker_info!("Login confirmed", login = "bob");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const WORKER: &'static str = "WORKER";
    pub const CONN: &'static str = "CONN";
    pub const IDENTITY: &'static str = "IDENTITY";
    pub const ACL: &'static str = "ACL";
    pub const WIRE: &'static str = "WIRE";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count onto a level, starting at `Warn`.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

// === WORKER logging macros ===

#[macro_export]
macro_rules! log_worker_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "WORKER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_worker_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "WORKER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_worker_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "WORKER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_worker_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "WORKER", $($key = $value,)* $msg)
    };
}

// === CONN logging macros ===

#[macro_export]
macro_rules! log_conn_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CONN", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_conn_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CONN", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_conn_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CONN", $($key = $value,)* $msg)
    };
}

// === IDENTITY logging macros ===

#[macro_export]
macro_rules! log_identity_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "IDENTITY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_identity_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "IDENTITY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_identity_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "IDENTITY", $($key = $value,)* $msg)
    };
}

// === ACL logging macros ===

#[macro_export]
macro_rules! log_acl_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "ACL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_acl_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "ACL", $($key = $value,)* $msg)
    };
}

// === WIRE logging macros ===

#[macro_export]
macro_rules! log_wire_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "WIRE", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::WORKER, "WORKER");
        assert_eq!(Component::IDENTITY, "IDENTITY");
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_macros_tag_component_and_fields() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let reason = "bob may not write /db/top.txt";
            crate::log_worker_warn!(
                "Request denied",
                login = "bob",
                reason = tracing::field::display(&reason)
            );
            crate::log_identity_debug!("Reclaim guard left behind", attempt = 3);
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("Request denied"), "{}", out);
        assert!(out.contains("component=\"WORKER\""), "{}", out);
        assert!(out.contains("login=\"bob\""), "{}", out);
        assert!(out.contains("reason=bob may not write /db/top.txt"), "{}", out);
        assert!(out.contains("component=\"IDENTITY\""), "{}", out);
        assert!(out.contains("attempt=3"), "{}", out);
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }
}
