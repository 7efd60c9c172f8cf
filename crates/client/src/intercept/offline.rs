//! Degraded responses served when neither network nor cache can answer.

use serde_json::json;

pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/svg+xml";
pub const OFFLINE_STATUS: u16 = 503;

/// Neutral image returned for an uncached asset while offline.
pub const PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180">"##,
    r##"<rect width="320" height="180" fill="#e5e7eb"/>"##,
    r##"<text x="160" y="96" font-family="sans-serif" font-size="14" fill="#6b7280" text-anchor="middle">"##,
    "Unavailable offline</text></svg>"
);

/// Page shown for a navigation that cannot be served.
pub const OFFLINE_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
body { font-family: sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; color: #374151; }
main { text-align: center; max-width: 28rem; }
</style>
</head>
<body>
<main>
<h1>You are offline</h1>
<p>Presentations saved on this device are still available. Changes you make are kept and will sync when the connection returns.</p>
</main>
</body>
</html>
"#;

/// Structured error body for an API request with no network and no cache.
pub fn offline_json(url: &str) -> Vec<u8> {
    json!({
        "error": "offline",
        "message": "No network connection and no cached response",
        "url": url,
        "offline": true,
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_json_is_structured() {
        let body: serde_json::Value = serde_json::from_slice(&offline_json("https://app.test/api/themes")).unwrap();
        assert_eq!(body["error"], "offline");
        assert_eq!(body["url"], "https://app.test/api/themes");
    }

    #[test]
    fn test_placeholder_is_svg() {
        assert!(PLACEHOLDER_SVG.starts_with("<svg"));
        assert!(PLACEHOLDER_SVG.ends_with("</svg>"));
    }
}
