//! An embedded KNX twisted-pair stack.
//!
//! Implements the connection-oriented transport layer of the *KNX Specification v2.1*
//! (volume 3/3/4) on top of a TP1 data-link layer, in both the *Style 1 Rationalised* and
//! *Style 3* conformance profiles.
//!
//! # Using the stack
//!
//! Konnex is runtime and hardware-agnostic: It does not need an RTOS (although you can certainly
//! use one if you want) and provides hardware interfaces that need to be implemented once for
//! every supported bus coupler. The transport layer itself is pure logic driven from the device's
//! main loop; only [`Transport::finished_sending`] may be invoked from interrupt context.
//!
//! You have to provide a few platform-specific services:
//! * A millisecond-precision [`Timer`].
//! * A [`Bus`] giving access to the TP1 link layer (received-telegram buffer and a transmit
//!   primitive).
//! * An [`ApplicationLayer`] that interprets APCI commands and produces responses.
//!
//! All of these are bundled in a [`Config`] trait implemented by the application.
//!
//! [`Timer`]: time/trait.Timer.html
//! [`Bus`]: bus/trait.Bus.html
//! [`ApplicationLayer`]: apci/trait.ApplicationLayer.html
//! [`Config`]: config/trait.Config.html
//! [`Transport::finished_sending`]: transport/struct.Transport.html#method.finished_sending

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;
pub mod address;
pub mod apci;
pub mod bus;
pub mod bytes;
pub mod config;
mod error;
pub mod time;
pub mod transport;

pub use self::error::Error;
