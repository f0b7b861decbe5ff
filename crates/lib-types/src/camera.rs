//! Camera address handling.
//!
//! The address format belongs to the vendor library. The only thing this
//! crate knows about it is that credentials travel in the query string, so
//! [`CameraUrl`] keeps them out of log output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Query keys whose values are never printed.
const SECRET_KEYS: &[&str] = &["passwd", "password", "access_code"];

/// A camera address as passed to the vendor Create call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraUrl(String);

impl CameraUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The address exactly as the library will receive it.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address with secret query values replaced by `***`.
    pub fn redacted(&self) -> String {
        let Some((base, query)) = self.0.split_once('?') else {
            return self.0.clone();
        };

        let pairs: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if SECRET_KEYS.contains(&key) => format!("{}=***", key),
                _ => pair.to_string(),
            })
            .collect();

        format!("{}?{}", base, pairs.join("&"))
    }
}

impl From<&str> for CameraUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for CameraUrl {
    fn from(url: String) -> Self {
        Self(url)
    }
}

impl fmt::Display for CameraUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

// Debug goes through the redacted form too; derive would leak the password.
impl fmt::Debug for CameraUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CameraUrl").field(&self.redacted()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str =
        "bambu:///local/192.168.1.20.?port=6000&user=bblp&passwd=12345678&device=01S00A";

    #[test]
    fn test_redacts_password() {
        let url = CameraUrl::from(URL);
        let shown = url.to_string();
        assert!(!shown.contains("12345678"));
        assert!(shown.contains("passwd=***"));
        assert!(shown.contains("user=bblp"));
        assert!(shown.contains("device=01S00A"));
        assert_eq!(url.as_str(), URL);
    }

    #[test]
    fn test_debug_is_redacted() {
        let url = CameraUrl::from(URL);
        assert!(!format!("{:?}", url).contains("12345678"));
    }

    #[test]
    fn test_url_without_query_is_unchanged() {
        let url = CameraUrl::from("rtsp://camera.local/stream");
        assert_eq!(url.redacted(), "rtsp://camera.local/stream");
    }
}
