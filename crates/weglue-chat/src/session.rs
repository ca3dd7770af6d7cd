//! User session provider
//!
//! Supplies the current user's identity to the dispatcher (the `sender_id`
//! of every outbound send) and tracks the admin-mode toggle for club
//! leaders. Logout is the documented trigger for tearing down the process
//! connection; the session itself holds no transport state.
//!
//! Nothing here persists across restarts; profile storage is outside the
//! messaging core.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use weglue_core::{Result, UserId, WeglueError};

/// Role of a campus participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    /// Regular student account.
    Student,
    /// Club leader; may enable admin mode.
    Leader,
    /// Campus administrator; may enable admin mode.
    Admin,
}

impl UserRole {
    /// Whether this role may toggle admin mode on.
    pub fn can_administer(&self) -> bool {
        matches!(self, UserRole::Leader | UserRole::Admin)
    }
}

/// Profile of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user identifier; used as `sender_id` on outbound sends.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Campus role.
    pub role: UserRole,
}

#[derive(Default)]
struct SessionInner {
    profile: Option<UserProfile>,
    admin_mode: bool,
}

/// Process-wide authentication state.
#[derive(Default)]
pub struct UserSession {
    inner: RwLock<SessionInner>,
}

impl UserSession {
    /// Create a logged-out session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session already logged in as `profile`.
    pub fn logged_in(profile: UserProfile) -> Self {
        let session = Self::new();
        session.set_user(profile);
        session
    }

    /// Record a successful login.
    pub fn set_user(&self, profile: UserProfile) {
        let mut inner = self.inner.write();
        inner.profile = Some(profile);
    }

    /// The authenticated user's profile, if logged in.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.read().profile.clone()
    }

    /// The authenticated user's id, for outbound sends.
    pub fn user_id(&self) -> Result<UserId> {
        self.inner
            .read()
            .profile
            .as_ref()
            .map(|p| p.id)
            .ok_or_else(|| WeglueError::invalid("no authenticated user"))
    }

    /// Whether a user is logged in.
    pub fn is_logged_in(&self) -> bool {
        self.inner.read().profile.is_some()
    }

    /// Toggle admin mode. Only leaders and admins may enable it.
    pub fn set_admin_mode(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if enabled {
            let allowed = inner
                .profile
                .as_ref()
                .map(|p| p.role.can_administer())
                .unwrap_or(false);
            if !allowed {
                return Err(WeglueError::permission_denied(
                    "admin mode requires a leader or admin role",
                ));
            }
        }
        inner.admin_mode = enabled;
        Ok(())
    }

    /// Whether admin mode is currently on.
    pub fn is_admin_mode(&self) -> bool {
        self.inner.read().admin_mode
    }

    /// Clear the session. The caller is responsible for disconnecting the
    /// connection manager alongside this.
    pub fn logout(&self) {
        let mut inner = self.inner.write();
        inner.profile = None;
        inner.admin_mode = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn student() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            name: "Sam Student".to_string(),
            role: UserRole::Student,
        }
    }

    fn leader() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            name: "Lee Leader".to_string(),
            role: UserRole::Leader,
        }
    }

    #[test]
    fn test_user_id_requires_login() {
        let session = UserSession::new();
        assert_matches!(session.user_id(), Err(WeglueError::Invalid { .. }));

        let profile = student();
        session.set_user(profile.clone());
        assert_eq!(session.user_id().unwrap(), profile.id);
    }

    #[test]
    fn test_admin_mode_is_role_gated() {
        let session = UserSession::logged_in(student());
        assert_matches!(
            session.set_admin_mode(true),
            Err(WeglueError::PermissionDenied { .. })
        );
        assert!(!session.is_admin_mode());

        let session = UserSession::logged_in(leader());
        session.set_admin_mode(true).unwrap();
        assert!(session.is_admin_mode());
        session.set_admin_mode(false).unwrap();
        assert!(!session.is_admin_mode());
    }

    #[test]
    fn test_logout_clears_everything() {
        let session = UserSession::logged_in(leader());
        session.set_admin_mode(true).unwrap();

        session.logout();
        assert!(!session.is_logged_in());
        assert!(!session.is_admin_mode());
    }
}
