//! Shared, lock-guarded access to the chain tree.

use std::sync::Arc;
use std::time::Instant;

use tipwatch_common::{
    queries::mining::{BlockTemplate, ChainTipInfo},
    Block, BlockHash, BlockHeader,
};
use tokio::sync::{Mutex, RwLock};

use crate::chain_tree::{BlockStage, ChainTree, SubmitOutcome, TemplateMode};
use crate::tree_error::ChainTrackerError;
use crate::validator::ChainValidator;

/// Single writer, many readers over one [`ChainTree`].
///
/// Mutations queue on `writer`. Block validation runs while holding only
/// `writer`, so template queries keep being answered while a body is
/// checked, and always see either the state before or after the verdict.
pub struct ChainTracker {
    tree: RwLock<ChainTree>,
    writer: Mutex<()>,
    validator: Arc<dyn ChainValidator>,
}

impl ChainTracker {
    pub fn new(tree: ChainTree) -> Self {
        let validator = tree.validator().clone();
        Self {
            tree: RwLock::new(tree),
            writer: Mutex::new(()),
            validator,
        }
    }

    pub async fn submit_header(
        &self,
        header: BlockHeader,
    ) -> Result<SubmitOutcome, ChainTrackerError> {
        let _writer = self.writer.lock().await;
        self.tree.write().await.submit_header(header, Instant::now())
    }

    pub async fn submit_block(&self, block: Block) -> Result<(), ChainTrackerError> {
        let _writer = self.writer.lock().await;
        self.submit_block_locked(block).await
    }

    async fn submit_block_locked(&self, block: Block) -> Result<(), ChainTrackerError> {
        let stage = self.tree.write().await.stage_block(&block, Instant::now())?;
        if stage == BlockStage::AlreadyValid {
            return Ok(());
        }

        // Validation may be slow; keep it off the async workers
        let hash = block.hash();
        let validator = self.validator.clone();
        let (block, status) = tokio::task::spawn_blocking(move || {
            let status = validator.validate_block(&block);
            (block, status)
        })
        .await
        .map_err(|e| ChainTrackerError::ValidationAborted {
            hash,
            reason: e.to_string(),
        })?;
        self.tree.write().await.apply_validation(block, status)
    }

    /// Out-of-band invalid-block notice; see
    /// [`ChainTree::report_external_invalid`].
    pub async fn report_external_invalid(
        &self,
        hash: BlockHash,
        block: Block,
    ) -> Result<(), ChainTrackerError> {
        let _writer = self.writer.lock().await;
        self.tree.read().await.check_advisory(&hash, &block)?;
        self.submit_block_locked(block).await
    }

    pub async fn mining_template(&self, mode: TemplateMode) -> BlockTemplate {
        self.tree.read().await.mining_template(mode, Instant::now())
    }

    pub async fn best_block(&self) -> (BlockHash, u64) {
        let tree = self.tree.read().await;
        (tree.best_validated(), tree.best_height())
    }

    pub async fn chain_tips(&self) -> Vec<ChainTipInfo> {
        self.tree.read().await.chain_tips()
    }

    pub async fn prune(&self) -> usize {
        let _writer = self.writer.lock().await;
        self.tree.write().await.prune()
    }
}
