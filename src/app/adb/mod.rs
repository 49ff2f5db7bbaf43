pub mod apk;
pub mod connector;
pub mod locator;
pub mod package;
pub mod parse;
pub mod runner;
