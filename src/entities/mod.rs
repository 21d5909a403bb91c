pub mod mint_count;
pub mod mint_request;
pub mod prelude;
pub mod rate_window;
