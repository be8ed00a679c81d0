use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::model::{SessionId, UserId};

/// Tracks the one live session each user may have.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    by_user: DashMap<UserId, SessionId>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the user's slot for `session`. Fails when another session holds it.
    pub fn claim(&self, user: &UserId, session: SessionId) -> bool {
        match self.by_user.entry(user.clone()) {
            Entry::Occupied(held) => {
                let ok = *held.get() == session;
                if !ok {
                    warn!(%user, held = %held.get(), requested = %session, "session slot already taken");
                }
                ok
            }
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Frees the slot, but only if `session` is the one holding it.
    pub fn release(&self, user: &UserId, session: SessionId) {
        self.by_user.remove_if(user, |_, held| *held == session);
    }

    pub fn is_active(&self, user: &UserId) -> bool {
        self.by_user.contains_key(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_session_per_user() {
        let reg = ActiveSessions::new();
        let user = UserId::new("alex");
        let first = SessionId::new();

        assert!(reg.claim(&user, first));
        assert!(reg.claim(&user, first));
        assert!(!reg.claim(&user, SessionId::new()));
        assert!(reg.is_active(&user));
    }

    #[test]
    fn release_ignores_sessions_that_do_not_hold_the_slot() {
        let reg = ActiveSessions::new();
        let user = UserId::new("alex");
        let first = SessionId::new();
        reg.claim(&user, first);

        reg.release(&user, SessionId::new());
        assert!(reg.is_active(&user));

        reg.release(&user, first);
        assert!(!reg.is_active(&user));
    }

    #[test]
    fn users_do_not_share_slots() {
        let reg = ActiveSessions::new();
        assert!(reg.claim(&UserId::new("a"), SessionId::new()));
        assert!(reg.claim(&UserId::new("b"), SessionId::new()));
    }
}
