// Configuration module
// Runtime tuning knobs for the coordination core

use std::time::Duration;

/// Runtime configuration for the coordination core.
///
/// All values have working defaults; embedders override fields as needed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Quiet period after the last qualifying edit before a completion
    /// request is issued. Restarted on every edit.
    pub debounce: Duration,
    /// Minimum document length (bytes) before completion requests are
    /// issued at all. Very short buffers produce useless completions.
    pub completion_min_context: usize,
    /// Maximum number of bytes of context sent before and after the
    /// cursor in a completion request.
    pub completion_max_context: usize,
    /// Minimum cursor travel (bytes) since the last surfaced completion
    /// before another request is issued. Damps request storms while the
    /// user types through a completion site.
    pub completion_min_cursor_travel: usize,
    /// Maximum number of conversational submissions queued behind an
    /// in-flight request. Further submissions are refused.
    pub conversation_queue_limit: usize,
    /// Maximum retained user-visible notifications. Oldest are dropped.
    pub notification_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            completion_min_context: 16,
            completion_max_context: 2048,
            completion_min_cursor_travel: 5,
            conversation_queue_limit: 16,
            notification_limit: 64,
        }
    }
}
