use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content locales the guide ships audio and room data for.
pub const SUPPORTED_LOCALES: &[&str] = &["en-GB", "fr", "de", "es", "zh-TW"];

/// Locale used when a request carries no usable locale of its own.
pub const DEFAULT_LOCALE: &str = "en-GB";

#[derive(Error, Debug)]
pub enum LocaleError {
    #[error("Unsupported locale: {0}")]
    Unsupported(String),
}

/// A supported content-language variant.
///
/// Construction goes through `Locale::parse`, so a `Locale` value is always
/// one of `SUPPORTED_LOCALES`. Asset URLs, cache keys, and the metadata
/// record all embed the locale string unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    pub fn parse(s: &str) -> Result<Self, LocaleError> {
        if SUPPORTED_LOCALES.contains(&s) {
            Ok(Self(s.to_string()))
        } else {
            Err(LocaleError::Unsupported(s.to_string()))
        }
    }

    pub fn default_locale() -> Self {
        Self(DEFAULT_LOCALE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Locale {
    type Error = LocaleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Locale::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}
