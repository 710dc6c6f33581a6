//! OAuth 2.0 refresh-token grant as a credential refresher
//!
//! Plugs the token endpoint into `refresh_coordinator`:
//! 1. `token::refresh_token()` performs one `grant_type=refresh_token` exchange
//! 2. `OAuthRefresher` holds the current refresh token, rotates it when the
//!    endpoint issues a new one, and publishes the access token to `AccessToken`
//! 3. `bearer_updater()` writes the refreshed access token into replayed requests

pub mod error;
pub mod refresher;
pub mod token;

pub use error::{Error, Result};
pub use refresher::{AccessToken, OAuthRefresher, bearer_updater};
pub use token::{TokenResponse, refresh_token};
