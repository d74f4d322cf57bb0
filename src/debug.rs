//! Diagnostic tracing, gated by the `log-debug` feature.
//!
//! Mirrors gPXE's `DBG()` macro: compiled out entirely unless the feature
//! is enabled, and formatted via [`ufmt`] rather than a heap-backed
//! `core::fmt` so it stays usable on a bare-metal target.

use ufmt::uWrite;

/// A place diagnostic text can go. `()` is the silent sink used everywhere
/// a caller has not wired up anything else.
pub trait DebugSink {
    /// Append a line of diagnostic text.
    fn debug_line(&mut self, s: &str);
}

impl DebugSink for () {
    fn debug_line(&mut self, _s: &str) {}
}

/// Adapter letting any [`uWrite`] sink double as a [`DebugSink`].
pub struct UfmtSink<'a, W: uWrite + ?Sized>(pub &'a mut W);

impl<'a, W: uWrite + ?Sized> DebugSink for UfmtSink<'a, W> {
    fn debug_line(&mut self, s: &str) {
        let _ = self.0.write_str(s);
    }
}

/// Emit a diagnostic line through `$sink` when the `log-debug` feature is
/// enabled; otherwise this expands to nothing and the arguments are not
/// evaluated.
#[macro_export]
macro_rules! debug_log {
    ($sink:expr, $msg:expr) => {
        #[cfg(feature = "log-debug")]
        {
            $crate::debug::DebugSink::debug_line($sink, $msg);
        }
        #[cfg(not(feature = "log-debug"))]
        {
            let _ = &$sink;
        }
    };
}
