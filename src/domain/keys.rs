//! Derivative key naming.
//!
//! A derivative lives next to its source under a reserved directory:
//! `e5f97749-5d2f-4770-89ce-5d68b1a90f7b/photo.jpg` becomes
//! `e5f97749-5d2f-4770-89ce-5d68b1a90f7b/thumb/photo.jpg`.

/// Reserved path segment used when none is configured.
pub const DEFAULT_MARKER: &str = "thumb";

/// MIME type of the fixed derivative encoding.
pub const DERIVATIVE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeriver {
    marker: String,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl KeyDeriver {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Inserts the marker directly before the final path segment.
    pub fn derive(&self, key: &str) -> String {
        match key.rsplit_once('/') {
            Some((parent, name)) => format!("{}/{}/{}", parent, self.marker, name),
            None => format!("{}/{}", self.marker, key),
        }
    }

    /// True when any directory segment of `key` is the marker.
    pub fn is_derived(&self, key: &str) -> bool {
        match key.rsplit_once('/') {
            Some((parent, _)) => parent.split('/').any(|segment| segment == self.marker),
            None => false,
        }
    }

    /// Content type for a derived key, from its extension.
    pub fn content_type_for(&self, derived_key: &str) -> String {
        mime_guess::from_path(derived_key)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| DERIVATIVE_CONTENT_TYPE.to_string())
    }
}
