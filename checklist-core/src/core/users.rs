//! The shared users document and per-user checklist access index.

use crate::{ChecklistError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How much a user may do with a checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Read,
    Write,
    Admin,
}

/// One entry of a user's checklist index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistAccess {
    /// Blob path of the checklist.
    pub id: String,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub default_access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_method: Option<String>,
    #[serde(default)]
    pub checklists: Vec<ChecklistAccess>,
}

fn default_role() -> String {
    "user".to_string()
}

impl User {
    /// A new user with a fresh id and no checklist access.
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            password_hash: password_hash.into(),
            token: None,
            role: default_role(),
            default_access_level: AccessLevel::Read,
            two_factor_method: None,
            checklists: Vec::new(),
        }
    }
}

/// The `users.json` document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub users: Vec<User>,
}

impl UsersConfig {
    #[must_use]
    pub fn find(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    fn find_mut(&mut self, user_id: &str) -> Result<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ChecklistError::UserNotFound(user_id.to_string()))
    }

    /// Usernames in document order, used as the `collaborators` source.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.users.iter().map(|u| u.username.clone()).collect()
    }

    /// Records that `user_id` opened or saved `checklist_id` at `now`,
    /// adding an index entry at the user's default access level if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::UserNotFound`] for an unknown user.
    pub fn touch_last_accessed(
        &mut self,
        user_id: &str,
        checklist_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let user = self.find_mut(user_id)?;
        let level = user.default_access_level;
        match user.checklists.iter_mut().find(|c| c.id == checklist_id) {
            Some(entry) => entry.last_accessed = Some(now),
            None => user.checklists.push(ChecklistAccess {
                id: checklist_id.to_string(),
                access_level: level,
                last_accessed: Some(now),
            }),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ChecklistError::DuplicateUser`] if the username is taken.
    pub fn add_user(&mut self, user: User) -> Result<()> {
        if self.users.iter().any(|u| u.username.eq_ignore_ascii_case(&user.username)) {
            return Err(ChecklistError::DuplicateUser(user.username));
        }
        self.users.push(user);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ChecklistError::UserNotFound`] for an unknown user.
    pub fn remove_user(&mut self, user_id: &str) -> Result<User> {
        let pos = self
            .users
            .iter()
            .position(|u| u.id == user_id)
            .ok_or_else(|| ChecklistError::UserNotFound(user_id.to_string()))?;
        Ok(self.users.remove(pos))
    }

    /// # Errors
    ///
    /// Returns [`ChecklistError::UserNotFound`] for an unknown user.
    pub fn set_role(&mut self, user_id: &str, role: impl Into<String>) -> Result<()> {
        self.find_mut(user_id)?.role = role.into();
        Ok(())
    }

    /// Grants or changes a user's access to a checklist.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::UserNotFound`] for an unknown user.
    pub fn grant_access(&mut self, user_id: &str, checklist_id: &str, level: AccessLevel) -> Result<()> {
        let user = self.find_mut(user_id)?;
        match user.checklists.iter_mut().find(|c| c.id == checklist_id) {
            Some(entry) => entry.access_level = level,
            None => user.checklists.push(ChecklistAccess {
                id: checklist_id.to_string(),
                access_level: level,
                last_accessed: None,
            }),
        }
        Ok(())
    }

    /// Removes a checklist from a user's index. Returns whether it was there.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::UserNotFound`] for an unknown user.
    pub fn revoke_access(&mut self, user_id: &str, checklist_id: &str) -> Result<bool> {
        let user = self.find_mut(user_id)?;
        let before = user.checklists.len();
        user.checklists.retain(|c| c.id != checklist_id);
        Ok(user.checklists.len() != before)
    }

    #[must_use]
    pub fn access_level_for(&self, user_id: &str, checklist_id: &str) -> Option<AccessLevel> {
        self.find(user_id)?
            .checklists
            .iter()
            .find(|c| c.id == checklist_id)
            .map(|c| c.access_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn config() -> (UsersConfig, String) {
        let mut cfg = UsersConfig::default();
        let alice = User::new("alice", "hash");
        let id = alice.id.clone();
        cfg.add_user(alice).unwrap();
        (cfg, id)
    }

    #[test]
    fn test_wire_format() {
        let v = json!({"users": [{
            "id": "u1",
            "username": "bob",
            "passwordHash": "x",
            "role": "admin",
            "defaultAccessLevel": "write",
            "twoFactorMethod": "totp",
            "checklists": [{"id": "checklists/a.json", "accessLevel": "admin", "lastAccessed": "2024-05-01T10:00:00Z"}]
        }]});
        let cfg: UsersConfig = serde_json::from_value(v).unwrap();
        let bob = &cfg.users[0];
        assert_eq!(bob.default_access_level, AccessLevel::Write);
        assert_eq!(bob.two_factor_method.as_deref(), Some("totp"));
        assert_eq!(cfg.access_level_for("u1", "checklists/a.json"), Some(AccessLevel::Admin));
    }

    #[test]
    fn test_touch_last_accessed_adds_then_updates() {
        let (mut cfg, id) = config();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap();
        cfg.touch_last_accessed(&id, "checklists/a.json", t1).unwrap();
        cfg.touch_last_accessed(&id, "checklists/a.json", t2).unwrap();
        let entries = &cfg.find(&id).unwrap().checklists;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_accessed, Some(t2));
        assert!(matches!(
            cfg.touch_last_accessed("nobody", "x", t1),
            Err(ChecklistError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_admin_crud() {
        let (mut cfg, id) = config();
        assert!(matches!(
            cfg.add_user(User::new("Alice", "h")),
            Err(ChecklistError::DuplicateUser(_))
        ));
        cfg.set_role(&id, "admin").unwrap();
        cfg.grant_access(&id, "c.json", AccessLevel::Write).unwrap();
        assert_eq!(cfg.access_level_for(&id, "c.json"), Some(AccessLevel::Write));
        assert!(cfg.revoke_access(&id, "c.json").unwrap());
        assert!(!cfg.revoke_access(&id, "c.json").unwrap());
        assert_eq!(cfg.usernames(), vec!["alice".to_string()]);
        let removed = cfg.remove_user(&id).unwrap();
        assert_eq!(removed.role, "admin");
        assert!(cfg.users.is_empty());
    }
}
