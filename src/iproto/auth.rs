//! Server greeting and chap-sha1 authentication.
//!
//! The greeting is two 64-byte lines: the server banner, then a base64 salt.
//! The client proves knowledge of the password with
//! `sha1(password) XOR sha1(salt[..20] ++ sha1(sha1(password)))`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

pub const GREETING_SIZE: usize = 128;
const GREETING_LINE: usize = 64;
/// Base64 characters carrying the salt on the second line.
const SALT_BASE64_LEN: usize = 44;
pub const SCRAMBLE_SIZE: usize = 20;

/// Parsed server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Banner line, e.g. `Tarantool 2.11.1 (Binary) <uuid>`.
    pub version: String,
    pub salt: Vec<u8>,
}

impl Greeting {
    pub fn parse(raw: &[u8; GREETING_SIZE]) -> Result<Self> {
        let banner = &raw[..GREETING_LINE];
        if !banner.starts_with(b"Tarantool") {
            return Err(Error::protocol("server greeting is not a Tarantool banner"));
        }
        let version = String::from_utf8_lossy(banner).trim_end().to_string();

        let encoded = &raw[GREETING_LINE..GREETING_LINE + SALT_BASE64_LEN];
        let salt = BASE64
            .decode(encoded)
            .map_err(|e| Error::protocol(format!("invalid greeting salt: {}", e)))?;
        if salt.len() < SCRAMBLE_SIZE {
            return Err(Error::protocol(format!(
                "greeting salt too short: {} bytes",
                salt.len()
            )));
        }

        Ok(Greeting { version, salt })
    }
}

/// chap-sha1 scramble for `password` against the greeting salt.
pub fn scramble(password: &str, salt: &[u8]) -> [u8; SCRAMBLE_SIZE] {
    let step1 = sha1_digest(password.as_bytes());
    let step2 = sha1_digest(&step1);

    let mut hasher = Sha1::new();
    hasher.update(&salt[..SCRAMBLE_SIZE.min(salt.len())]);
    hasher.update(step2);
    let step3: [u8; SCRAMBLE_SIZE] = hasher.finalize().into();

    xor_bytes(&step1, &step3)
}

fn sha1_digest(data: &[u8]) -> [u8; SCRAMBLE_SIZE] {
    Sha1::digest(data).into()
}

fn xor_bytes(a: &[u8; SCRAMBLE_SIZE], b: &[u8; SCRAMBLE_SIZE]) -> [u8; SCRAMBLE_SIZE] {
    let mut result = [0u8; SCRAMBLE_SIZE];
    for (out, (x, y)) in result.iter_mut().zip(a.iter().zip(b)) {
        *out = x ^ y;
    }
    result
}
