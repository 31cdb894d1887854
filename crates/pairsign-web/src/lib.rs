//! Embedded web assets for pairsign
//!
//! The primary and external device pages plus the landing and callback
//! pages, compiled into the binary. The pages read the session id and any
//! OIDC query parameters client-side; the server never templates HTML.

use rust_embed::Embed;

/// Embedded static pages served by the HTTP layer
#[derive(Embed)]
#[folder = "www/"]
pub struct Assets;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_are_embedded() {
        for page in [
            "index.html",
            "authorize.html",
            "authorize-external.html",
            "callback.html",
            "style.css",
        ] {
            assert!(Assets::get(page).is_some(), "missing embedded asset: {}", page);
        }
    }
}
