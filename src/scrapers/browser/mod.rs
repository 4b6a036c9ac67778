//! Browser automation for sites that only render in a real browser.
//!
//! Jobs talk to a [`PageDriver`]; [`ChromiumFactory`] opens real Chrome tabs
//! over CDP with stealth evasion applied.

mod bounded;
mod chromium;
mod config;
mod driver;
mod session;
mod stealth;

pub use bounded::BoundedDriver;
pub use chromium::{ChromiumDriver, ChromiumFactory};
pub use session::BrowserSession;
pub use config::{BrowserEngineConfig, BrowserEngineType, CookieSpec};
pub use driver::{
    DriverError, DriverFactory, NavigationOutcome, PageDriver, SessionOptions, WaitPolicy,
};
