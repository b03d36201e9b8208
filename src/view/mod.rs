pub mod controller;
pub mod render;
pub mod store;

pub use controller::{ControllerSettings, Notice, NoticeLevel, ViewCommand, ViewController, ViewSnapshot};
pub use store::{DisplayMode, ProjectedPage, ViewQuery, ViewStore};
