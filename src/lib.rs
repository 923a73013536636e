//! Prim composition caching and dependency tracking for [OpenUSD](https://github.com/PixarAnimationStudios/OpenUSD) scenes in pure Rust

pub mod ar;
pub mod base;
pub mod pcp;
pub mod sdf;

#[doc(hidden)]
pub use base::*;

pub(crate) use tf::declare_public_tokens;
