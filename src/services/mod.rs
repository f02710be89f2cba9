pub mod artifact_store;
pub mod filename;
pub mod session_store;
pub mod sqlite_session_store;
pub mod sweeper;
pub mod upload_service;
