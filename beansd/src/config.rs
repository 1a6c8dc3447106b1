use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Server settings. Defaults match the classic daemon.
#[derive(Clone)]
pub struct Settings {
    /// TCP port to listen on.
    pub port: u16,
    /// Interface to bind.
    pub interface: IpAddr,
    /// Maximum simultaneous connections (drives the fd rlimit raise).
    pub max_conns: u32,
    /// Number of worker threads, each owning a reactor.
    pub num_threads: usize,
    /// Item buffer size reported by `stats`.
    pub item_buf_size: usize,
    /// Commands slower than this count as slow.
    pub slow_cmd: Duration,
    /// Flush period handed to the store, in seconds.
    pub flush_period: u32,
    /// Flush limit handed to the store, in KiB.
    pub flush_limit: u32,
    /// Largest value a `set`/`append` will buffer. Oversized values are
    /// rejected and swallowed so the protocol stream stays aligned.
    pub max_item_size: usize,
    /// Hard cap on per-connection read buffer growth.
    pub max_read_buffer: usize,
    /// Initial verbosity level (the `verbosity` command changes it at runtime).
    pub verbosity: u32,
    /// Whether the `stopme` command is honored.
    pub stop_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 7900,
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_conns: 1024,
            num_threads: 16,
            item_buf_size: 4096,
            slow_cmd: Duration::from_millis(100),
            flush_period: 600,
            flush_limit: 1024,
            max_item_size: 50 * 1024 * 1024,
            max_read_buffer: 8 * 1024 * 1024,
            verbosity: 0,
            stop_enabled: false,
        }
    }
}

impl Settings {
    /// Validate settings. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.num_threads == 0 {
            return Err(crate::error::Error::Config(
                "number of threads must be greater than 0".into(),
            ));
        }
        if self.max_conns == 0 {
            return Err(crate::error::Error::Config(
                "max_conns must be greater than 0".into(),
            ));
        }
        if self.item_buf_size < 512 {
            return Err(crate::error::Error::Config(
                "item buffer size must be at least 512 bytes".into(),
            ));
        }
        if self.max_item_size == 0 || self.max_read_buffer == 0 {
            return Err(crate::error::Error::Config(
                "buffer caps must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Settings`] with `build()` validation.
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    pub fn interface(mut self, addr: IpAddr) -> Self {
        self.settings.interface = addr;
        self
    }

    pub fn max_conns(mut self, n: u32) -> Self {
        self.settings.max_conns = n;
        self
    }

    pub fn threads(mut self, n: usize) -> Self {
        self.settings.num_threads = n;
        self
    }

    pub fn item_buf_size(mut self, n: usize) -> Self {
        self.settings.item_buf_size = n;
        self
    }

    pub fn slow_cmd(mut self, d: Duration) -> Self {
        self.settings.slow_cmd = d;
        self
    }

    pub fn flush(mut self, period_secs: u32, limit_kb: u32) -> Self {
        self.settings.flush_period = period_secs;
        self.settings.flush_limit = limit_kb;
        self
    }

    pub fn max_item_size(mut self, n: usize) -> Self {
        self.settings.max_item_size = n;
        self
    }

    pub fn max_read_buffer(mut self, n: usize) -> Self {
        self.settings.max_read_buffer = n;
        self
    }

    pub fn verbosity(mut self, level: u32) -> Self {
        self.settings.verbosity = level;
        self
    }

    pub fn stop_enabled(mut self, enable: bool) -> Self {
        self.settings.stop_enabled = enable;
        self
    }

    /// Validate and build the final [`Settings`].
    pub fn build(self) -> Result<Settings, crate::error::Error> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_threads_rejected() {
        let err = SettingsBuilder::new().threads(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn small_item_buf_rejected() {
        let err = SettingsBuilder::new().item_buf_size(100).build();
        assert!(err.is_err());
    }
}
