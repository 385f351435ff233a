#![doc = include_str!("../README.md")]

mod auth;
mod certificate;
mod error;
mod name_match;

pub use auth::{
    AuthOptions, TrustPrompt, authenticate_certificate, authenticate_repository,
    canonical_repository_name, location_prefix,
};
pub use certificate::{Certificate, abbreviate_fingerprint, parse_certificate};
pub use error::Error;
pub use name_match::match_certificate_name;
