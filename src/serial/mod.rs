//! Serial port communication module
//!
//! This module provides functionality for:
//! - Listing available serial ports (USB-to-serial adapters, Pico CDC)
//! - Line-oriented reads from the dump firmware

pub mod port;

pub use port::{PortConfig, SerialConnection};
