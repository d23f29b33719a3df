//! Fill decoding and validation/sanitisation (§4.6-§4.7, C8/C9).

pub mod decoder;
pub mod validator;

pub use decoder::FillDecoder;
pub use validator::{sanitise, validate, ValidationReport};
