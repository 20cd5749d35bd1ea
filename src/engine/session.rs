//! Always-current session state for long-lived handlers.
//!
//! Subscription callbacks outlive changes to "can this user receive
//! notifications" and the allowed-category set. Handlers capture this cell
//! once and read the latest value at decision time; updates never require a
//! resubscribe.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub user_id: Uuid,
    pub can_notify: bool,
    /// Empty list means every category is allowed.
    pub allowed_categories: Vec<String>,
}

#[derive(Clone)]
pub struct SessionCell {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionCell {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.read().user_id
    }

    pub fn can_notify(&self) -> bool {
        self.inner.read().can_notify
    }

    pub fn set_can_notify(&self, can_notify: bool) {
        self.inner.write().can_notify = can_notify;
    }

    pub fn set_allowed_categories(&self, categories: Vec<String>) {
        self.inner.write().allowed_categories = categories;
    }

    pub fn category_allowed(&self, category: &str) -> bool {
        let state = self.inner.read();
        state.allowed_categories.is_empty()
            || state.allowed_categories.iter().any(|c| c == category)
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.read().clone()
    }
}
