// Tipwatch common library - main library exports

pub mod consensus;
pub mod crypto;
pub mod encoding;
pub mod genesis;
pub mod hash;
pub mod messages;
pub mod pow;
pub mod queries;
pub mod types;
pub mod validation;

// Flattened re-exports
pub use self::hash::{BlockHash, Hash, TxHash};
pub use self::pow::ChainWork;
pub use self::types::*;
