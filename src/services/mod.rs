pub mod broker;
pub mod ingestion;
pub mod ocr;
pub mod pdf;
pub mod segmentation;
pub mod status_store;
pub mod storage;
pub mod translation;
