pub mod intent;
pub mod merchant;
pub mod offline_entry;
pub mod rail;
pub mod rate;
pub mod transaction;
