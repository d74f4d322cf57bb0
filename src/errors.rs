//! Error taxonomy shared by every component of the IPv6 bring-up core.
//!
//! No allocator and no unwinding: every fallible operation returns
//! `Result<T, StackError>` and callers propagate with `?`.

use ufmt::derive::uDebug;

/// Tagged error value returned by the core. Mirrors the small hand-rolled
/// enums elsewhere in this crate (no `thiserror`: this crate has no_std
/// support to maintain and no dependency on it).
#[derive(uDebug, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// Malformed input: too-short buffer, bad checksum, bad option length,
    /// version mismatch, DUID mismatch.
    Invalid,
    /// No matching neighbour, no prefix in a Router Advertisement, no route.
    NotFound,
    /// Unsupported next-header or ICMPv6 type.
    NotSupported,
    /// A fixed-capacity table or arena is full.
    NoMemory,
    /// A retry timer reached its deadline without success.
    TimedOut,
    /// The operation was cancelled via job control.
    Canceled,
    /// No route exists for the destination.
    NetUnreachable,
}

impl ufmt::uDisplay for StackError {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        let s = match self {
            StackError::Invalid => "invalid",
            StackError::NotFound => "not found",
            StackError::NotSupported => "not supported",
            StackError::NoMemory => "no memory",
            StackError::TimedOut => "timed out",
            StackError::Canceled => "canceled",
            StackError::NetUnreachable => "network unreachable",
        };
        f.write_str(s)
    }
}

/// Shorthand used throughout the core.
pub type StackResult<T> = core::result::Result<T, StackError>;
