//! Backend access
//!
//! - [`Backend`]: the collaborator contract every backend implements
//! - [`RestBackend`]: HTTP implementation (feature `client`)

mod backend;
#[cfg(feature = "client")]
mod rest;

pub use backend::{Backend, Procedure};
#[cfg(feature = "client")]
pub use rest::RestBackend;
