//! Database models split into domain-specific modules.

pub mod invitation;
pub mod organisation;
pub mod revoked_token;
pub mod team_member;
pub mod user;

pub use invitation::*;
pub use organisation::*;
pub use revoked_token::*;
pub use team_member::*;
pub use user::*;
