//! Conversation service configuration.

/// Limits applied by [`ConversationService`](crate::ConversationService).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationConfig {
    /// History page size when the caller doesn't pick one
    pub default_page_size: usize,
    /// Upper bound on a requested history page size
    pub max_page_size: usize,
    /// Messages examined by a single `receive_pending` call
    pub receive_batch_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { default_page_size: 50, max_page_size: 200, receive_batch_limit: 500 }
    }
}

impl ConversationConfig {
    /// Page size to use for a history request, clamped to `[1, max_page_size]`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_page_size).clamp(1, self.max_page_size.max(1))
    }
}
