//! Bearer-token authentication for the HTTP and RPC surfaces.
//!
//! Short-lived access tokens (15 min, stateless) are verified by [`AuthGate`];
//! the axum extractor and the tonic interceptor are thin wrappers around it.
//! Refresh tokens (15 days, database-tracked) travel in cookies or metadata.

mod cookie;
mod extractors;
mod gate;
mod ip;
pub mod rpc;
mod state;

pub use cookie::{
    COOKIE_PATH, REFRESH_COOKIE_NAME, USER_COOKIE_NAME, clear_refresh_cookies, get_cookie,
    refresh_cookies,
};
pub use extractors::Auth;
pub use gate::{AuthGate, AuthenticatedUser, bearer_token};
pub use ip::{FORWARDED_FOR_HEADER, HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthGate;
