pub mod direct;
pub mod history;
pub mod presence;
