//! Types shared between the database and API representations.

pub mod match_id;
pub mod phone;
pub mod role;
pub mod status;
