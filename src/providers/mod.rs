//! Credential provider implementations.

mod ecs_role;
pub(crate) mod exchange;
mod key_pair;
mod role_arn;
mod session_token;
mod static_key;

pub use ecs_role::EcsRoleProvider;
pub use exchange::{ExchangeOptions, parse_expiration};
pub use key_pair::KeyPairProvider;
pub use role_arn::{DEFAULT_ROLE_SESSION_NAME, RoleArnProvider};
pub use session_token::SessionTokenProvider;
pub use static_key::StaticKeyProvider;
