//! File-based transport: chat events come in as CSV rows and outbound
//! notices and published claims go out as CSV rows.

pub mod claim_writer;
pub mod event_reader;
pub mod notice_writer;
