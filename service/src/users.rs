//! User accounts.
//!
//! [`UserStore`] keeps the service's users in memory, in creation order.
//! Ids are assigned by the store on [`UserStore::add`]; any id carried in
//! the submitted body is ignored.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// A user as exchanged over the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id (nil in request bodies)
    #[serde(rename = "Id", default)]
    pub id: Uuid,
    /// Contact address
    #[serde(rename = "Email", default)]
    pub email: String,
    /// Given name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Family name
    #[serde(rename = "Surname", default)]
    pub surname: String,
}

/// In-memory user table.
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<Vec<User>>,
}

impl UserStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The user with `id`, if any.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|user| user.id == id)
            .cloned()
    }

    /// Every user, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store `user` under a fresh id and return that id.
    pub fn add(&self, mut user: User) -> Uuid {
        user.id = Uuid::new_v4();
        let id = user.id;
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user);
        tracing::info!(user_id = %id, "User added");
        id
    }

    /// Replace the stored user with the same id.
    ///
    /// Returns `false`, storing nothing, if no such user exists.
    pub fn update(&self, user: User) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = users.iter_mut().find(|stored| stored.id == user.id) else {
            return false;
        };
        *stored = user;
        tracing::info!(user_id = %stored.id, "User updated");
        true
    }

    /// Remove the user with `id`. Returns `false` if there was none.
    pub fn delete(&self, id: Uuid) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let before = users.len();
        users.retain(|user| user.id != id);
        let removed = users.len() != before;
        if removed {
            tracing::info!(user_id = %id, "User deleted");
        }
        removed
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
