//! Role gating for the reporting functions. Authentication happens
//! upstream; this module only decides what an already-identified user
//! may see and change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(Error::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    /// Whether this user's labor counts toward monthly job costs.
    pub job_cost_employee: bool,
}

/// The identity a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewer {
    pub user_id: String,
    pub name: String,
    pub role: Role,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for Viewer {
    fn from(u: User) -> Self {
        Self {
            user_id: u.id,
            name: u.name,
            role: u.role,
        }
    }
}

/// Which users a KPI report covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "user_id")]
pub enum UserFilter {
    All,
    User(String),
}

impl UserFilter {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            UserFilter::All => None,
            UserFilter::User(id) => Some(id),
        }
    }
}

impl FromStr for UserFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("empty user filter".into()));
        }
        if s.eq_ignore_ascii_case("all") {
            Ok(UserFilter::All)
        } else {
            Ok(UserFilter::User(s.to_string()))
        }
    }
}

impl fmt::Display for UserFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserFilter::All => f.write_str("all"),
            UserFilter::User(id) => f.write_str(id),
        }
    }
}

/// Admins see what they ask for; everyone else only sees themselves.
pub fn scope_user_filter(viewer: &Viewer, requested: &UserFilter) -> UserFilter {
    if viewer.is_admin() {
        return requested.clone();
    }
    if requested != &UserFilter::User(viewer.user_id.clone()) {
        log::debug!(
            "Restricting {} to own entries (requested {requested})",
            viewer.user_id
        );
    }
    UserFilter::User(viewer.user_id.clone())
}

pub fn require_admin(viewer: &Viewer, action: &str) -> Result<()> {
    if viewer.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "{} is not an administrator and cannot {action}",
            viewer.user_id
        )))
    }
}

pub fn require_self_or_admin(viewer: &Viewer, target_user_id: &str) -> Result<()> {
    if viewer.is_admin() || viewer.user_id == target_user_id {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "{} cannot edit entries of {target_user_id}",
            viewer.user_id
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn admin() -> Viewer {
        Viewer {
            user_id: "admin".into(),
            name: "Admin".into(),
            role: Role::Admin,
        }
    }

    pub(crate) fn member(id: &str) -> Viewer {
        Viewer {
            user_id: id.into(),
            name: id.to_uppercase(),
            role: Role::User,
        }
    }

    #[test]
    fn test_user_filter_parse() {
        assert_eq!("all".parse::<UserFilter>().unwrap(), UserFilter::All);
        assert_eq!("ALL".parse::<UserFilter>().unwrap(), UserFilter::All);
        assert_eq!(
            "u1".parse::<UserFilter>().unwrap(),
            UserFilter::User("u1".into())
        );
        assert!("  ".parse::<UserFilter>().is_err());
    }

    #[test]
    fn test_scope_admin_keeps_request() {
        assert_eq!(scope_user_filter(&admin(), &UserFilter::All), UserFilter::All);
        assert_eq!(
            scope_user_filter(&admin(), &UserFilter::User("u2".into())),
            UserFilter::User("u2".into())
        );
    }

    #[test]
    fn test_scope_member_forced_to_self() {
        let v = member("u1");
        assert_eq!(scope_user_filter(&v, &UserFilter::All), UserFilter::User("u1".into()));
        assert_eq!(
            scope_user_filter(&v, &UserFilter::User("u2".into())),
            UserFilter::User("u1".into())
        );
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&admin(), "view job costs").is_ok());
        let err = require_admin(&member("u1"), "view job costs").unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_require_self_or_admin() {
        assert!(require_self_or_admin(&member("u1"), "u1").is_ok());
        assert!(require_self_or_admin(&admin(), "u1").is_ok());
        assert!(require_self_or_admin(&member("u1"), "u2").is_err());
    }
}
