pub mod dispatch;
pub mod init;
pub mod notifications;
pub mod senders;
pub mod tracking;
