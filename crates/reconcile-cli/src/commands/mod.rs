pub mod configure;
pub mod executors;
pub mod plan;
pub mod status;

pub use configure::run as configure;
pub use executors::run as executors;
pub use plan::run as plan;
pub use status::run as status;
