//! Type-state markers for IMAP client connection states.

/// Marker type for the not-authenticated state.
///
/// In this state, only STARTTLS and authentication commands are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker type for the authenticated state.
///
/// Mailbox and message commands are valid; whether a mailbox is selected
/// is tracked at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn state_markers_are_send_sync() {
        _assert_send_sync::<NotAuthenticated>();
        _assert_send_sync::<Authenticated>();
    }
}
