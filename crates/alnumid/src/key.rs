use crate::{Error, Result, Suffix};
use core::fmt;
use serde::{Deserialize, Serialize};

/// A `(category, color)` pair naming one independent counter stream.
///
/// Each key has its own persisted width and its own batch history. Codes are
/// normalised to upper case on construction so that storage file names are
/// stable regardless of how a request spelled them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationKey {
    category: String,
    color: String,
}

impl AllocationKey {
    pub fn new(category: &str, color: &str) -> Result<Self> {
        Ok(Self {
            category: normalize_code("category", category)?,
            color: normalize_code("color", color)?,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Prefix shared by every storage file of this key, e.g. `AL_RED_`.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}_", self.category, self.color)
    }

    /// Composes `category ++ color ++ special_code ++ suffix`.
    ///
    /// ```
    /// use alnumid::{AllocationKey, Suffix};
    ///
    /// let key = AllocationKey::new("al", "red").unwrap();
    /// let suffix = Suffix::parse("00001A").unwrap();
    /// assert_eq!(key.identifier("", &suffix), "ALRED00001A");
    /// ```
    pub fn identifier(&self, special_code: &str, suffix: &Suffix) -> String {
        let mut id = String::with_capacity(
            self.category.len() + self.color.len() + special_code.len() + suffix.width(),
        );
        id.push_str(&self.category);
        id.push_str(&self.color);
        id.push_str(special_code);
        id.push_str(suffix.as_str());
        id
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category, self.color)
    }
}

/// Trims and upper-cases a short code, rejecting anything that is not ASCII
/// alphanumeric.
pub(crate) fn normalize_code(field: &str, raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(Error::invalid(format!("{field} must not be empty")));
    }
    if !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::invalid(format!(
            "{field} {code:?} must be ASCII alphanumeric"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

/// Like [`normalize_code`] but allows the empty string.
pub(crate) fn normalize_special_code(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Ok(String::new());
    }
    normalize_code("special code", code)
}
