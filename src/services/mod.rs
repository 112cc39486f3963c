pub mod events;
pub mod post_processing;
pub mod storage;
pub mod upload_service;
