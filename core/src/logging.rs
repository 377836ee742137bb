//! Logging abstraction
//!
//! - Firmware (`defmt` feature): forwards to `defmt`
//! - Host tests: prints to stdout
//! - Host non-test: no-op that still type-checks the arguments
//!
//! Format strings must stay within what both `defmt` and `core::fmt` accept:
//! plain `{}` for primitives and `&str`, `{:?}` for crate enums.

macro_rules! log_emit {
    ($defmt:ident, $tag:literal, $($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(test)))]
        ::defmt::$defmt!($($arg)*);

        #[cfg(test)]
        ::std::println!("[{}] {}", $tag, ::core::format_args!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => { log_emit!(debug, "DEBUG", $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { log_emit!(info, "INFO", $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { log_emit!(warn, "WARN", $($arg)*) };
}

macro_rules! log_error {
    ($($arg:tt)*) => { log_emit!(error, "ERROR", $($arg)*) };
}
