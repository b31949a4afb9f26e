//! Session credentials: token providers and JWT claim reading.

mod jwt;
mod token;

pub use jwt::{unverified_claims, user_id_from_token, Claims};
pub use token::{EnvToken, StaticToken, TokenProvider};
