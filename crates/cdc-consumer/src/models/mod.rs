pub mod cdc;
pub mod message;
pub mod record;
