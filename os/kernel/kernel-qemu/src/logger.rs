use crate::pl011::Pl011;
use core::fmt::Write;
use kernel_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: SyncOnceCell<QemuLogger> = SyncOnceCell::new();

pub struct QemuLogger {
    max_level: LevelFilter,
    uart: Pl011,
}

impl QemuLogger {
    /// Logger writing to the `virt` machine's UART.
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self::with_uart(max_level, Pl011::virt())
    }

    #[must_use]
    pub const fn with_uart(max_level: LevelFilter, uart: Pl011) -> Self {
        Self { max_level, uart }
    }

    /// Install as the global logger. Call once during early init; later calls
    /// fail with [`SetLoggerError`].
    ///
    /// # Errors
    /// Returns an error if a logger was already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        let logger: &'static Self = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best effort: nothing to report a failed debug write to.
        let mut uart = self.uart;
        let _ = writeln!(
            uart,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(all(test, feature = "enabled"))]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_level_and_writes_line() {
        let mut reg = Box::new(0u32);
        let uart = unsafe { Pl011::new((&raw mut *reg).addr()) };
        let logger = QemuLogger::with_uart(LevelFilter::Info, uart);

        let debug = Metadata::builder().level(Level::Debug).build();
        let warn = Metadata::builder().level(Level::Warn).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&warn));

        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("vmem")
                .args(format_args!("demoted"))
                .build(),
        );
        assert_eq!(*reg, u32::from(b'\n'));
    }

    #[test]
    fn filtered_record_is_not_written() {
        let mut reg = Box::new(0u32);
        let uart = unsafe { Pl011::new((&raw mut *reg).addr()) };
        let logger = QemuLogger::with_uart(LevelFilter::Error, uart);

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .args(format_args!("quiet"))
                .build(),
        );
        assert_eq!(*reg, 0);
    }
}
