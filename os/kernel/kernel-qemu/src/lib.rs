//! # QEMU Development and Debug Support
//!
//! Logging for guests running on QEMU's ARM `virt` machine (or a hypervisor
//! exposing the same board), routed to the PL011 UART.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)
//!     ↓
//! QemuLogger (log::Log)
//!     ↓
//! Pl011 (fmt::Write)
//!     ↓
//! UARTDR @ 0x0900_0000
//!     ↓
//! QEMU -serial stdio
//! ```
//!
//! ## Feature System
//!
//! ### `enabled` Feature (default)
//! When disabled, every UART write becomes a no-op, so the logger can stay
//! installed in builds that must not touch the device.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::new(LevelFilter::Debug).init().expect("logger initialization");
//! info!("translation layer online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod pl011;

pub use logger::QemuLogger;
pub use pl011::{Pl011, VIRT_UART_BASE};
