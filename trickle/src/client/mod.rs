//! client-side (_downloader_) main loop and supporting structures

mod locator;
pub use locator::{Locator, LocatorError};

mod options;
pub use options::Parameters;

mod main_loop;
pub(crate) mod progress;

#[allow(clippy::module_name_repetitions)]
pub(crate) use main_loop::client_main;

pub use progress::MAX_UPDATE_FPS;
