use crate::{Error, Result, fs::write_atomic};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::{fs, io, path::Path};
use tracing::info;

/// Turns a raw identifier into the opaque token used for short-link lookup.
///
/// Implementations must be deterministic for fixed key material: the same
/// identifier always maps to the same token.
pub trait TokenEncoder: Send + Sync {
    fn encode(&self, identifier: &str) -> String;
}

const KEY_LEN: usize = 32;

/// HMAC-SHA256 over the identifier, rendered as URL-safe base64 without
/// padding.
#[derive(Clone)]
pub struct HmacTokenEncoder {
    mac: Hmac<Sha256>,
}

impl HmacTokenEncoder {
    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() < KEY_LEN {
            return Err(Error::invalid(format!(
                "token key must be at least {KEY_LEN} bytes"
            )));
        }
        let mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| Error::invalid(format!("token key: {e}")))?;
        Ok(Self { mac })
    }

    /// Loads the key file at `path`, generating and persisting a fresh random
    /// key if none exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(key) if key.len() >= KEY_LEN => Self::from_key(&key),
            Ok(_) => Err(Error::corrupt(path, "token key is too short")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut key = [0_u8; KEY_LEN];
                rand::rng().fill_bytes(&mut key);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
                }
                write_atomic(path, &key)?;
                info!(path = %path.display(), "generated new token key");
                Self::from_key(&key)
            }
            Err(e) => Err(Error::storage(path, e)),
        }
    }
}

impl TokenEncoder for HmacTokenEncoder {
    fn encode(&self, identifier: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(identifier.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl<T: TokenEncoder + ?Sized> TokenEncoder for std::sync::Arc<T> {
    fn encode(&self, identifier: &str) -> String {
        (**self).encode(identifier)
    }
}
