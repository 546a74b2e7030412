//! Per-client session context.

use uuid::Uuid;

/// Which side of the broadcast this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Controls the station and owns the shared record.
    Admin,
    /// Follows the shared record; never writes it.
    Listener,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Mutable per-session flags with an explicit lifecycle.
///
/// Everything here is reset by [`SessionContext::reset_for_role`] on role
/// change or reconnect, so two client instances in one process (tests
/// included) never share hidden state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub role: Role,
    pub session_id: String,
    /// The user has interacted with the client; audio may start with sound.
    pub has_interacted: bool,
    /// The listener has explicitly joined the live broadcast at least once.
    pub has_started_listening: bool,
    /// Monotonic guard: snapshots at or below this timestamp are stale.
    pub last_applied_timestamp: i64,
    /// Set after the first remote fetch; an admin only seeds local state
    /// from remote on that first fetch.
    pub bootstrapped: bool,
    /// One-shot guard for the "tap to join live broadcast" prompt.
    pub join_prompt_shown: bool,
    /// Hour (0-23) of the last top-of-hour bulletin, so a schedule tick
    /// landing twice in the same hour triggers only once.
    pub last_hourly_trigger: Option<u32>,
}

impl SessionContext {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self::with_id(role, Uuid::new_v4().to_string())
    }

    /// Build with a caller-chosen session id. The id participates in the
    /// admin-conflict policy (lowest id keeps the role), so tests and
    /// embedders may need it deterministic.
    #[must_use]
    pub fn with_id(role: Role, session_id: String) -> Self {
        Self {
            role,
            session_id,
            has_interacted: false,
            has_started_listening: false,
            last_applied_timestamp: 0,
            bootstrapped: false,
            join_prompt_shown: false,
            last_hourly_trigger: None,
        }
    }

    /// Reset all lifecycle flags for a role change or reconnect, keeping
    /// the session identity.
    pub fn reset_for_role(&mut self, role: Role) {
        let id = std::mem::take(&mut self.session_id);
        *self = Self::with_id(role, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_ids_are_unique() {
        let a = SessionContext::new(Role::Listener);
        let b = SessionContext::new(Role::Listener);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_reset_for_role_clears_flags_keeps_id() {
        let mut session = SessionContext::with_id(Role::Admin, "s-1".to_string());
        session.has_interacted = true;
        session.bootstrapped = true;
        session.last_applied_timestamp = 42;
        session.last_hourly_trigger = Some(9);

        session.reset_for_role(Role::Listener);

        assert_eq!(session.session_id, "s-1");
        assert_eq!(session.role, Role::Listener);
        assert!(!session.has_interacted);
        assert!(!session.bootstrapped);
        assert_eq!(session.last_applied_timestamp, 0);
        assert!(session.last_hourly_trigger.is_none());
    }
}
