pub mod merchants;
pub mod payments;
pub mod wallet;
