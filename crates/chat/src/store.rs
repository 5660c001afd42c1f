use std::sync::Arc;

use tokio::sync::watch;

use crate::state::{ChatAction, ChatState};

/// Process-wide holder of the current [`ChatState`].
///
/// Every dispatch reduces into a brand new snapshot and publishes it, so
/// subscribers observe each transition as a distinct value.
#[derive(Debug, Clone)]
pub struct ChatStore {
    state: Arc<watch::Sender<Arc<ChatState>>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(ChatState::initial())
    }
}

impl ChatStore {
    pub fn new(initial: ChatState) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn dispatch(&self, action: ChatAction) {
        tracing::trace!(action = ?action, "dispatching chat action");
        self.state.send_modify(|current| {
            let next = current.reduce(action);
            *current = Arc::new(next);
        });
    }

    pub fn snapshot(&self) -> Arc<ChatState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatState>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::state::ApiStatus;

    #[test]
    fn dispatch_publishes_new_snapshot_and_keeps_old_one_intact() {
        let store = ChatStore::default();
        let before = store.snapshot();

        store.dispatch(ChatAction::AddMessage(Message::user("hello")));
        let after = store.snapshot();

        assert_eq!(before.messages.len(), 1);
        assert_eq!(after.messages.len(), 2);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn subscribers_see_every_dispatch() {
        let store = ChatStore::default();
        let mut receiver = store.subscribe();
        assert!(!receiver.has_changed().unwrap());

        store.dispatch(ChatAction::SetApiStatus(ApiStatus::Connected));

        assert!(receiver.has_changed().unwrap());
        assert_eq!(
            receiver.borrow_and_update().api_status,
            ApiStatus::Connected
        );
        assert!(!receiver.has_changed().unwrap());
    }

    #[test]
    fn clones_share_the_same_state() {
        let store = ChatStore::default();
        let other = store.clone();

        other.dispatch(ChatAction::SetLoading(true));

        assert!(store.snapshot().is_loading);
    }
}
