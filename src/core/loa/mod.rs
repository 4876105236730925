pub mod loa_service;

pub use loa_service::{parse_loa_duration, LoaRequest, LoaService, LoaStatus, LoaStore, NewLoaRequest};
