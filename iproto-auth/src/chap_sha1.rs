//! The `chap-sha1` mechanism (`spec.md` §4.2, Property P1, Scenario S2).
//!
//! ```text
//! step1 = SHA1(password)
//! step2 = SHA1(step1)
//! step3 = SHA1(salt20 ++ step2)
//! scramble[i] = step1[i] XOR step3[i]
//! ```

use sha1::{Digest, Sha1};

use crate::{AuthMechanism, Credentials};

pub const MECHANISM_NAME: &str = "chap-sha1";

#[derive(Debug, Default, Clone, Copy)]
pub struct ChapSha1;

impl AuthMechanism for ChapSha1 {
    fn mechanism(&self) -> &'static str {
        MECHANISM_NAME
    }

    fn can_authenticate_with(&self, _credentials: &Credentials) -> bool {
        // chap-sha1 only needs a username/password pair, which is all a
        // `Credentials` value can ever hold.
        true
    }

    fn compute_scramble(&self, salt20: &[u8; 20], credentials: &Credentials) -> [u8; 20] {
        let step1 = Sha1::digest(credentials.password().as_bytes());

        let step2 = Sha1::digest(step1);

        let mut hasher = Sha1::new();
        hasher.update(salt20);
        hasher.update(step2);
        let step3 = hasher.finalize();

        let mut scramble = [0u8; 20];
        for i in 0..20 {
            scramble[i] = step1[i] ^ step3[i];
        }
        scramble
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S2: password "password", salt20 = twenty 0x00 bytes.
    #[test]
    fn chap_sha1_vector_with_zero_salt() {
        let credentials = Credentials::new("admin", "password").unwrap();
        let salt20 = [0u8; 20];

        let scramble = ChapSha1.compute_scramble(&salt20, &credentials);

        let step1 = Sha1::digest(b"password");
        let step2 = Sha1::digest(step1);
        let mut hasher = Sha1::new();
        hasher.update(salt20);
        hasher.update(step2);
        let step3 = hasher.finalize();

        let mut expected = [0u8; 20];
        for i in 0..20 {
            expected[i] = step1[i] ^ step3[i];
        }

        assert_eq!(scramble, expected);
    }

    /// Property P1: holds for any salt/password pair, not just the all-zero
    /// vector above.
    #[test]
    fn chap_sha1_satisfies_property_p1_for_nonzero_salt() {
        let credentials = Credentials::new("admin", "s3cr3t").unwrap();
        let salt20: [u8; 20] = {
            let mut s = [0u8; 20];
            for (i, b) in s.iter_mut().enumerate() {
                *b = i as u8;
            }
            s
        };

        let scramble = ChapSha1.compute_scramble(&salt20, &credentials);

        let step1 = Sha1::digest(b"s3cr3t");
        let step2 = Sha1::digest(step1);
        let mut hasher = Sha1::new();
        hasher.update(salt20);
        hasher.update(step2);
        let step3 = hasher.finalize();

        for i in 0..20 {
            assert_eq!(scramble[i], step1[i] ^ step3[i]);
        }
    }

    #[test]
    fn mechanism_name_matches_the_wire_protocol_string() {
        assert_eq!(ChapSha1.mechanism(), "chap-sha1");
    }
}
