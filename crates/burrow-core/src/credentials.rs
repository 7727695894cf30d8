//! Random identifiers and secrets

use rand::distributions::Alphanumeric;
use rand::Rng;

use burrow_protocol::Credentials;

/// Length of generated secrets
pub const SECRET_LENGTH: usize = 30;

/// Generate a random alphanumeric secret
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Generate a random identifier (UUIDv4)
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a username/password pair for a transfer daemon module
pub fn generate_credentials() -> Credentials {
    Credentials {
        username: generate_id(),
        password: generate_secret(),
    }
}
