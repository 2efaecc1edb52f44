use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, UserId};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("name cannot be empty")]
    EmptyName,

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("stored password hash is malformed")]
    MalformedHash,

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

//
// ─── PASSWORD HASH ─────────────────────────────────────────────────────────────
//

/// Bcrypt hash in its modular crypt form (`$2b$<cost>$<salt+digest>`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash with a fresh random salt at [`bcrypt::DEFAULT_COST`].
    ///
    /// # Errors
    ///
    /// Returns `UserError::Hashing` if bcrypt rejects the input.
    pub fn generate(password: &str) -> Result<Self, UserError> {
        bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map(Self)
            .map_err(|err| UserError::Hashing(err.to_string()))
    }

    /// Check a candidate password against the stored hash.
    ///
    /// # Errors
    ///
    /// Returns `UserError::MalformedHash` if the stored value cannot be decoded.
    pub fn verify(&self, password: &str) -> Result<bool, UserError> {
        bcrypt::verify(password, &self.0).map_err(|_| UserError::MalformedHash)
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

//
// ─── USER ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: PasswordHash,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub purchased_courses: Vec<CourseId>,
    #[serde(default)]
    pub unlocked_courses: Vec<CourseId>,
    pub created_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the course was bought or unlocked with its access key.
    #[must_use]
    pub fn has_course(&self, course_id: CourseId) -> bool {
        self.purchased_courses.contains(&course_id) || self.unlocked_courses.contains(&course_id)
    }

    pub fn add_purchase(&mut self, course_id: CourseId) {
        if !self.purchased_courses.contains(&course_id) {
            self.purchased_courses.push(course_id);
        }
    }

    pub fn add_unlock(&mut self, course_id: CourseId) {
        if !self.unlocked_courses.contains(&course_id) {
            self.unlocked_courses.push(course_id);
        }
    }

    /// Replace the stored password after validating its strength.
    ///
    /// # Errors
    ///
    /// Returns `UserError::WeakPassword` for short passwords.
    pub fn set_password(&mut self, password: &str) -> Result<(), UserError> {
        validate_password(password)?;
        self.password_hash = PasswordHash::generate(password)?;
        Ok(())
    }
}

/// Unvalidated sign-up input.
#[derive(Debug, Clone, Default)]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl UserDraft {
    /// Validate the draft and hash its password.
    ///
    /// The caller assigns the id and role.
    ///
    /// # Errors
    ///
    /// Returns `UserError` for an empty name, malformed email or weak password.
    pub fn validate(self, id: UserId, role: Role, now: DateTime<Utc>) -> Result<User, UserError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(UserError::EmptyName);
        }
        let email = normalize_email(&self.email)?;
        validate_password(&self.password)?;
        let password_hash = PasswordHash::generate(&self.password)?;

        Ok(User {
            id,
            name,
            email,
            password_hash,
            role,
            purchased_courses: Vec::new(),
            unlocked_courses: Vec::new(),
            created_at: now,
        })
    }
}

/// Trim and lowercase an email, rejecting obviously malformed addresses.
///
/// # Errors
///
/// Returns `UserError::InvalidEmail` when the address has no usable local
/// part or domain.
pub fn normalize_email(raw: &str) -> Result<String, UserError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(UserError::InvalidEmail(raw.trim().to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), UserError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(UserError::WeakPassword);
    }
    Ok(())
}
