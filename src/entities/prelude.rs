#![allow(unused_imports)]

pub use super::mint_count::Entity as MintCount;
pub use super::mint_request::Entity as MintRequest;
pub use super::rate_window::Entity as RateWindow;
