//! Demo account directory.
//!
//! Fixed in-memory accounts used by the login route and by refresh (a refresh
//! credential whose identity is no longer in the directory is rejected).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub department: String,
    password: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("department", &self.department)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    pub fn new(users: impl IntoIterator<Item = (String, String, Role, String, String)>) -> Self {
        let users = users
            .into_iter()
            .map(|(email, name, role, department, password)| {
                (
                    email.clone(),
                    User {
                        email,
                        name,
                        role,
                        department,
                        password,
                    },
                )
            })
            .collect();
        Self { users }
    }

    /// The three built-in demo accounts.
    pub fn demo() -> Self {
        Self::new([
            (
                "user1@company.com".to_string(),
                "Jamie Park".to_string(),
                Role::Employee,
                "Engineering".to_string(),
                "password123".to_string(),
            ),
            (
                "user2@company.com".to_string(),
                "Morgan Lee".to_string(),
                Role::Manager,
                "HR".to_string(),
                "password123".to_string(),
            ),
            (
                "admin@company.com".to_string(),
                "Administrator".to_string(),
                Role::Admin,
                "Management".to_string(),
                "admin123".to_string(),
            ),
        ])
    }

    pub fn get(&self, email: &str) -> Option<&User> {
        self.users.get(email)
    }

    /// Look up `email` and compare the password in constant time.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<&User> {
        let user = self.users.get(email)?;
        let matches: bool = user
            .password
            .as_bytes()
            .ct_eq(password.as_bytes())
            .into();
        matches.then_some(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
