//! Stack configuration trait.

use crate::{apci::ApplicationLayer, bus::Bus, time::Timer, transport::style::Style};

/// Trait for konnex stack configurations.
///
/// This trait defines a number of types to be used throughout the layers of the KNX stack, which
/// define capabilities, hardware interface types, and the transport-layer conformance profile.
///
/// Every application must define a type implementing this trait and supply it to the stack.
pub trait Config {
    /// A time source with millisecond resolution.
    type Timer: Timer;

    /// The TP1 link-layer driver.
    type Bus: Bus;

    /// The application layer receiving group, broadcast and connection-oriented upcalls.
    type App: ApplicationLayer;

    /// The transport-layer conformance profile (Style 1 Rationalised or Style 3).
    type Style: Style;
}
