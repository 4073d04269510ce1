//! Contract ABI parsing

pub mod json_parser;
