pub mod assets;
pub mod config_loader;
pub mod exec;
pub mod images;
pub mod init;
pub mod precompress;
pub mod preview;
pub mod verify;
pub mod walk;
