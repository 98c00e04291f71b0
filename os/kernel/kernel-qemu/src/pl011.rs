use core::fmt::{self, Write};

/// Base address of the first PL011 UART on QEMU's ARM `virt` machine.
pub const VIRT_UART_BASE: usize = 0x0900_0000;

/// Transmit-only view of a PL011 UART.
///
/// Only the data register (`UARTDR`, offset 0) is written; QEMU never
/// back-pressures the transmitter, so the FIFO-full flag is not polled.
#[derive(Copy, Clone, Debug)]
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// # Safety
    /// `base` must address a PL011 register block (or, in tests, a writable
    /// `u32`) that stays valid for every use of the returned value.
    #[must_use]
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// The UART of the `virt` machine.
    #[must_use]
    pub const fn virt() -> Self {
        // SAFETY: fixed device address on the `virt` board, mapped by the guest's I/O sections.
        unsafe { Self::new(VIRT_UART_BASE) }
    }

    /// Write a single byte to the data register.
    #[inline]
    pub fn putc(&self, c: u8) {
        #[cfg(feature = "enabled")]
        {
            let dr = self.base as *mut u32;
            // SAFETY: guaranteed by the constructor contract.
            unsafe { dr.write_volatile(u32::from(c)) }
        }
        #[cfg(not(feature = "enabled"))]
        {
            let _ = (self.base, c);
        }
    }
}

impl Write for Pl011 {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.putc(b'\r');
            }
            self.putc(b);
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "enabled"))]
mod tests {
    use super::*;

    #[test]
    fn writes_land_in_data_register() {
        let mut reg = Box::new(0u32);
        let base = (&raw mut *reg).addr();
        let mut uart = unsafe { Pl011::new(base) };

        uart.write_str("ok").unwrap();
        assert_eq!(*reg, u32::from(b'k'));

        uart.write_str("\n").unwrap();
        assert_eq!(*reg, u32::from(b'\n'));
    }
}
