pub mod health;
pub mod upload;

pub use health::health_check;
pub use upload::upload_files;
