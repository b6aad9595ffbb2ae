pub mod accounts;
pub mod health;
pub mod plans;
pub mod quota;
