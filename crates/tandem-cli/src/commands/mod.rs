pub mod apply;
pub mod common;
pub mod history;
pub mod init;
pub mod show;
pub mod verify;
