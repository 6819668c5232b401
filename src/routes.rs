mod execute;
mod status;

pub use execute::execute_handler;
pub use status::status_handler;
