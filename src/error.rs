use core::fmt;

/// Errors returned by the KNX stack.
///
/// Note that protocol violations on an open connection (wrong sequence numbers, unexpected
/// acknowledgements, traffic from a foreign partner) are *not* errors: the transport layer
/// handles them in-band via its state table. `Error` only covers malformed data.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Telegram specified an invalid length value or was too short.
    ///
    /// Standard frames are 8 to 23 octets long; anything shorter cannot carry a complete
    /// TPCI and must be dropped.
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when the application tries to fit too much data into a
    /// telegram or other fixed-size buffer, and also when reaching EOF prematurely
    /// while reading data from a buffer.
    Eof,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid length value specified",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
        })
    }
}
