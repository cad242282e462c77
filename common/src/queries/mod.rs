pub mod errors;
pub mod mining;
pub mod transactions;
