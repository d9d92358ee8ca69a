mod auth_validator_impl;
mod jwt_codec;
mod session_store_impl;
mod token_issuer_impl;

pub use auth_validator_impl::*;
pub use jwt_codec::*;
pub use session_store_impl::*;
pub use token_issuer_impl::*;
