//! Authentication mechanisms (`spec.md` §4.2).
//!
//! An [`AuthMechanism`] is polymorphic over `{mechanism-name,
//! credential-shape}` (Design Note, `spec.md` §9): selection is by mechanism
//! tag plus a capability check on the credentials, realized here as a tiny
//! trait object registry rather than a runtime class hierarchy.

mod chap_sha1;
mod credentials;

pub use chap_sha1::ChapSha1;
pub use credentials::Credentials;

use iproto_errors::{ConfigurationError, Error};

pub trait AuthMechanism: Send + Sync {
    /// The name the server expects in the auth request's `tuple` field,
    /// e.g. `"chap-sha1"`.
    fn mechanism(&self) -> &'static str;

    /// Whether this mechanism can authenticate with the given credentials.
    fn can_authenticate_with(&self, credentials: &Credentials) -> bool;

    /// Computes the 20-byte scramble to send to the server.
    fn compute_scramble(&self, salt20: &[u8; 20], credentials: &Credentials) -> [u8; 20];
}

/// Selects an authenticator whose `mechanism()` matches `mechanism_name` and
/// whose `can_authenticate_with` accepts `credentials`. Only `chap-sha1`
/// ships today; a future mechanism would be added to this list without
/// touching call sites (`spec.md` §9, Open Question on the `call`/`eval`
/// extension point; this is the analogous extension point for auth).
pub fn select_authenticator(
    mechanism_name: &str,
    credentials: &Credentials,
) -> Result<Box<dyn AuthMechanism>, Error> {
    let candidates: Vec<Box<dyn AuthMechanism>> = vec![Box::new(ChapSha1)];
    for candidate in candidates {
        if candidate.mechanism() == mechanism_name && candidate.can_authenticate_with(credentials)
        {
            return Ok(candidate);
        }
    }
    ConfigurationError {
        message: format!("no authenticator available for mechanism {mechanism_name:?}"),
    }
    .fail()
}
