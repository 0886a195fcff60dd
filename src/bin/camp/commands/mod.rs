pub mod admin;
pub mod balance;
pub mod bugs;
pub mod poll;
pub mod rewards;
