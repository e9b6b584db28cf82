pub mod protocol;
pub mod splash;

/// Name of the script message handler registered on every shell web view.
pub const MESSAGE_HANDLER: &str = "tau5";
