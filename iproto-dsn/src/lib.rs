//! Client configuration surface (`spec.md` §3, §6).
//!
//! A [`ConfigBuilder`] collects optional overrides and produces an immutable
//! [`Config`]: a mutable builder handed to callers, converted into an
//! immutable snapshot once built.

use std::sync::Arc;
use std::time::Duration;

use iproto_auth::Credentials;
use iproto_errors::{ConfigurationError, Error};
use iproto_protocol::{ObjectMapper, ValueMapper};

pub use iproto_auth::Credentials as ClientCredentials;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3301;
const DEFAULT_USER: &str = "admin";
const DEFAULT_PASSWORD: &str = "password";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

/// Immutable client configuration (`spec.md` §3: "Client configuration").
#[derive(Clone)]
pub struct Config {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    request_timeout: Duration,
    credentials: Credentials,
    value_mapper: Arc<ValueMapper>,
    object_mapper: Arc<ObjectMapper>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
    pub fn value_mapper(&self) -> &Arc<ValueMapper> {
        &self.value_mapper
    }
    pub fn object_mapper(&self) -> &Arc<ObjectMapper> {
        &self.object_mapper
    }
}

/// Builds a [`Config`], validating and defaulting as `spec.md` §6 requires.
pub struct ConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    username: Option<String>,
    password: Option<String>,
    value_mapper: Option<Arc<ValueMapper>>,
    object_mapper: Option<Arc<ObjectMapper>>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            host: None,
            port: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            request_timeout_ms: None,
            username: None,
            password: None,
            value_mapper: None,
            object_mapper: None,
        }
    }
}

impl ConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = Some(ms);
        self
    }
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
    pub fn value_mapper(mut self, mapper: Arc<ValueMapper>) -> Self {
        self.value_mapper = Some(mapper);
        self
    }
    pub fn object_mapper(mut self, mapper: Arc<ObjectMapper>) -> Self {
        self.object_mapper = Some(mapper);
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        let connect_timeout_ms = self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        let read_timeout_ms = self.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS);
        let request_timeout_ms = self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        for (name, ms) in [
            ("connect_timeout_ms", connect_timeout_ms),
            ("read_timeout_ms", read_timeout_ms),
            ("request_timeout_ms", request_timeout_ms),
        ] {
            if ms == 0 {
                return ConfigurationError {
                    message: format!("{name} must be positive"),
                }
                .fail();
            }
        }

        let credentials = Credentials::new(
            self.username.unwrap_or_else(|| DEFAULT_USER.to_string()),
            self.password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
        )?;

        Ok(Config {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            read_timeout: Duration::from_millis(read_timeout_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            credentials,
            value_mapper: self.value_mapper.unwrap_or_else(|| Arc::new(ValueMapper::default())),
            object_mapper: self.object_mapper.unwrap_or_else(|| Arc::new(ObjectMapper::default())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.host(), "localhost");
        assert_eq!(config.port(), 3301);
        assert_eq!(config.credentials().username(), "admin");
        assert_eq!(config.credentials().password(), "password");
        assert_eq!(config.connect_timeout(), Duration::from_millis(1000));
        assert_eq!(config.read_timeout(), Duration::from_millis(1000));
        assert_eq!(config.request_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::builder().request_timeout_ms(0).build().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let err = Config::builder().credentials("", "x").build().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn overrides_apply() {
        let config = Config::builder()
            .host("db.internal")
            .port(4301)
            .credentials("svc", "s3cr3t")
            .connect_timeout_ms(500)
            .build()
            .unwrap();
        assert_eq!(config.host(), "db.internal");
        assert_eq!(config.port(), 4301);
        assert_eq!(config.credentials().username(), "svc");
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
    }
}
