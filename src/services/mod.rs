pub mod job_service;
pub mod processor;
pub mod retention;
pub mod storage;
pub mod upload_service;
pub mod worker;
