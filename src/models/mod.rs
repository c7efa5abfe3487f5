pub mod job;
pub mod responses;
