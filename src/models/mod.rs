//! Data models for the audio guide's content.
//!
//! This module contains the structures the cache engine operates on:
//!
//! - `Locale`: validated content-language identifier
//! - `Room`, `Painting`: the ordered gallery content parsed from a
//!   locale's data file
//! - `Position`: the visitor's current room/painting context

pub mod locale;
pub mod position;
pub mod room;

pub use locale::{Locale, LocaleError, DEFAULT_LOCALE, SUPPORTED_LOCALES};
pub use position::Position;
pub use room::{parse_rooms, Painting, Room};
