//! Decryption collaborator for values flagged `encrypted`.
//!
//! The algorithm lives outside this crate. Values stay encrypted in sources
//! and in the priority chain and are only decrypted when a property
//! materializes them.

use crate::error::DecryptError;

pub trait Decryptor: Send + Sync {
    fn decrypt(&self, cipher_text: &str) -> Result<String, DecryptError>;
}

impl<F> Decryptor for F
where
    F: Fn(&str) -> Result<String, DecryptError> + Send + Sync,
{
    fn decrypt(&self, cipher_text: &str) -> Result<String, DecryptError> {
        self(cipher_text)
    }
}
