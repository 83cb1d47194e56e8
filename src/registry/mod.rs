//! Registry credential exchange
//!
//! This module decides which registry hosts require cloud-identity
//! authentication and performs the documented token exchange against the
//! registry's `/oauth2/exchange` endpoint to obtain a refresh token.

pub mod acr;
pub mod policy;

pub use acr::{AcrCredentialResolver, AcrCredentialResolverBuilder, MANAGEMENT_SCOPE};
pub use policy::HostPolicy;
