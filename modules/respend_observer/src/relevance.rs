//! Which observed transactions have their respends recorded.

use std::collections::HashSet;

use tipwatch_common::Transaction;

/// Filter selecting primary transactions
#[derive(Debug, Clone, Default)]
pub enum Relevance {
    /// Every observed transaction
    #[default]
    TrackAll,

    /// Transactions paying to one of these output scripts
    WatchedScripts(HashSet<Vec<u8>>),
}

impl Relevance {
    /// Watch `scripts`, or everything if there are none
    pub fn from_scripts(scripts: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let scripts: HashSet<Vec<u8>> = scripts.into_iter().collect();
        if scripts.is_empty() {
            Relevance::TrackAll
        } else {
            Relevance::WatchedScripts(scripts)
        }
    }

    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        match self {
            Relevance::TrackAll => true,
            Relevance::WatchedScripts(scripts) => {
                tx.outputs.iter().any(|o| scripts.contains(&o.script_pubkey))
            }
        }
    }
}
