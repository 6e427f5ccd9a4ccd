//! Log macro shims.
//!
//! When the `log` feature is enabled these forward to the `log` crate; otherwise they expand to
//! a `format_args!` no-op so that format strings are type-checked in either configuration.
//!
//! One generating macro stamps out the shim pair for every level. The `$d` parameter smuggles a
//! `$` token into the generated `macro_rules!` bodies, which cannot contain a literal `$` of
//! their own.

macro_rules! define_log_shims {
    ($d:tt $($name:ident),*) => {
        $(
            #[cfg(feature = "log")]
            macro_rules! $name {
                ($d($d t:tt)*) => {{ log::$name!($d($d t)*); }};
            }

            #[cfg(not(feature = "log"))]
            macro_rules! $name {
                ($d($d t:tt)*) => {{ format_args!($d($d t)*); }};
            }
        )*
    };
}

define_log_shims!($ error, warn, info, debug, trace);
