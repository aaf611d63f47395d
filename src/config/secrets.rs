//! Secret values from configuration.
//!
//! The store URL carries credentials. It stays a [`SecretString`] until the
//! moment of connecting; logs only ever see [`redacted_url`].

pub use secrecy::{ExposeSecret, SecretString};

/// The URL with any password in its userinfo replaced by `***`.
///
/// `postgres://informant:hunter2@db:5432/informant` becomes
/// `postgres://informant:***@db:5432/informant`. URLs without a password
/// are returned unchanged.
pub fn redacted_url(url: &SecretString) -> String {
    let raw = url.expose_secret();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return "***".to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return raw.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => raw.to_string(),
    }
}
