pub mod dto;
pub mod pg_row;
