//! Tools Foundations

mod token;

pub use token::*;

pub(crate) use token::declare_public_tokens;
