//! `spec.md` §3: "Credentials: username (non-empty string) and password
//! (non-empty string). Immutable."

use iproto_errors::{ConfigurationError, Error};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"...")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, Error> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return ConfigurationError {
                message: "username must not be empty".to_string(),
            }
            .fail();
        }
        if password.is_empty() {
            return ConfigurationError {
                message: "password must not be empty".to_string(),
            }
            .fail();
        }
        Ok(Credentials { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}
