//! Thin HTTP clients for the services the panel drives.
//!
//! Every client borrows the shared [`reqwest::Client`] built at start-up, so
//! connection pools are reused across calls.

pub mod efi;
pub mod mercado_pago;
pub mod messaging;
pub mod overseerr;
pub mod plex;
pub mod plex_tv;
pub mod tautulli;

/// Cuts long response bodies before they end up in error messages.
pub(crate) fn truncate_body(body: &str) -> &str {
    const MAX: usize = 300;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
