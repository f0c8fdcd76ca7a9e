//! Challenge secret generation

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use rand::RngExt;
use zeroize::Zeroize;

/// Random bytes per secret (256 bits of entropy).
pub const SECRET_BYTES: usize = 32;

/// Generate a fresh challenge secret.
///
/// 32 CSPRNG bytes, standard base64 encoded: 44 characters including padding.
/// The value is written to the challenge file verbatim and presented back
/// verbatim, so it must stay header-safe (base64 is).
pub fn generate_secret() -> Secret<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    let encoded = STANDARD.encode(bytes);
    bytes.zeroize();
    Secret::new(encoded)
}
