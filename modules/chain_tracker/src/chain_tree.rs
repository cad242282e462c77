//! Chain tree tracking validated and header-only tips.
//!
//! Every header with valid proof of work and a known parent becomes a
//! [`CandidateTip`] in a hash-keyed arena. Two tips are selected from it
//! after every change:
//!
//! * the *best validated* tip: most work among tips whose whole chain has
//!   validated bodies. This is the node's best block.
//! * the *active mining* tip: most work among tips with no invalid body on
//!   their chain, header-only tips included.
//!
//! Ties go to the tip whose header arrived first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tipwatch_common::{
    queries::mining::{BlockTemplate, ChainTipInfo, ChainTipStatus},
    validation::ValidationStatus,
    Block, BlockHash, BlockHeader,
};
use tracing::{debug, info};

use crate::candidate_tip::{CandidateTip, TipStatus};
use crate::tree_error::ChainTrackerError;
use crate::tree_observer::ChainTreeObserver;
use crate::validator::ChainValidator;

/// Result of offering a header to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AlreadyKnown,
}

/// What a staged block still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    /// Body must be run through the validator.
    Validate,
    /// Already validated; nothing to do.
    AlreadyValid,
}

/// Which tips a mining template may build on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMode {
    /// Best validated tip only.
    Validated,
    /// Active mining tip, header-only candidates included. With a window,
    /// header-only tips older than the window are not built on.
    HeadFirst { window: Option<Duration> },
}

impl TemplateMode {
    /// Map the `headfirst` query argument: absent means validated only,
    /// zero means no window.
    pub fn from_headfirst(headfirst: Option<u64>) -> Self {
        match headfirst {
            None => TemplateMode::Validated,
            Some(0) => TemplateMode::HeadFirst { window: None },
            Some(secs) => TemplateMode::HeadFirst {
                window: Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// The top-level data structure managing all tracked tips.
///
/// Operations are single-threaded; [`ChainTracker`](crate::tracker::ChainTracker)
/// handles concurrency.
pub struct ChainTree {
    /// All tips keyed by hash.
    tips: HashMap<BlockHash, CandidateTip>,
    /// Oldest retained block; always connected.
    root: BlockHash,
    best_validated: BlockHash,
    active_tip: BlockHash,
    next_seq: u64,
    /// Blocks kept behind the best validated tip when pruning.
    retention_depth: u64,
    validator: Arc<dyn ChainValidator>,
    observer: Box<dyn ChainTreeObserver + Send + Sync>,
}

impl ChainTree {
    /// Create a tree rooted at a trusted, already validated header.
    pub fn new(
        root: BlockHeader,
        root_height: u64,
        retention_depth: u64,
        validator: Arc<dyn ChainValidator>,
        observer: Box<dyn ChainTreeObserver + Send + Sync>,
    ) -> Self {
        let work = validator.work(&root);
        let mut tip = CandidateTip::new(root, root_height, work, 0, Instant::now());
        tip.parent = None;
        tip.status = TipStatus::BodyValid;
        tip.connected = true;

        let hash = tip.hash;
        Self {
            tips: HashMap::from([(hash, tip)]),
            root: hash,
            best_validated: hash,
            active_tip: hash,
            next_seq: 1,
            retention_depth,
            validator,
            observer,
        }
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&CandidateTip> {
        self.tips.get(hash)
    }

    pub fn root(&self) -> BlockHash {
        self.root
    }

    /// The node's best block.
    pub fn best_validated(&self) -> BlockHash {
        self.best_validated
    }

    pub fn best_height(&self) -> u64 {
        self.tips.get(&self.best_validated).map_or(0, |t| t.height)
    }

    pub fn active_tip(&self) -> BlockHash {
        self.active_tip
    }

    pub fn validator(&self) -> &Arc<dyn ChainValidator> {
        &self.validator
    }

    pub fn retention_depth(&self) -> u64 {
        self.retention_depth
    }

    pub fn len(&self) -> usize {
        self.tips.len()
    }

    /// Never true: the root is always present.
    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }

    // ── Headers ───────────────────────────────────────────────────

    /// Accept a header with valid proof of work whose parent is known.
    ///
    /// New tips start `HeaderOnly`, are announced to peers, have their body
    /// requested and take part in mining tip selection straight away.
    /// Rejected headers leave the tree untouched.
    pub fn submit_header(
        &mut self,
        header: BlockHeader,
        now: Instant,
    ) -> Result<SubmitOutcome, ChainTrackerError> {
        let outcome = self.insert_header(&header, now)?;
        if outcome == SubmitOutcome::Accepted {
            self.observer.block_wanted(header.hash());
            self.reselect();
        }
        Ok(outcome)
    }

    fn insert_header(
        &mut self,
        header: &BlockHeader,
        now: Instant,
    ) -> Result<SubmitOutcome, ChainTrackerError> {
        let hash = header.hash();
        if self.tips.contains_key(&hash) {
            return Ok(SubmitOutcome::AlreadyKnown);
        }

        if !self.validator.is_valid_header(header) {
            return Err(ChainTrackerError::InvalidProofOfWork { hash });
        }

        let parent = header.prev_block_hash;
        let Some(parent_tip) = self.tips.get(&parent) else {
            return Err(ChainTrackerError::UnknownParent { hash, parent });
        };

        let height = parent_tip.height + 1;
        let chain_work = parent_tip.chain_work.plus(&self.validator.work(header));
        let tip = CandidateTip::new(header.clone(), height, chain_work, self.next_seq, now);
        self.next_seq += 1;
        self.tips.insert(hash, tip);
        if let Some(parent_tip) = self.tips.get_mut(&parent) {
            parent_tip.children.push(hash);
        }

        debug!(%hash, height, "Header accepted");
        self.observer.header_accepted(header);
        Ok(SubmitOutcome::Accepted)
    }

    // ── Blocks ────────────────────────────────────────────────────

    /// Make sure a block's tip exists and report whether it needs
    /// validating.
    ///
    /// A body that does not reproduce its header is refused before anything
    /// is touched: it says nothing about the block the header names. A tip
    /// that already failed returns its recorded failure.
    pub fn stage_block(
        &mut self,
        block: &Block,
        now: Instant,
    ) -> Result<BlockStage, ChainTrackerError> {
        let hash = block.hash();
        if !block.body_matches_header() {
            return Err(ChainTrackerError::MutatedBody { hash });
        }

        if self.insert_header(&block.header, now)? == SubmitOutcome::Accepted {
            self.reselect();
        }

        let tip = self.tips.get(&hash).ok_or(ChainTrackerError::BlockNotInTree { hash })?;
        match tip.status {
            TipStatus::HeaderOnly => Ok(BlockStage::Validate),
            TipStatus::BodyValid => Ok(BlockStage::AlreadyValid),
            TipStatus::BodyInvalid => Err(ChainTrackerError::ValidationFailure {
                hash,
                reason: tip.rejection.clone().unwrap_or_default(),
            }),
        }
    }

    /// Record a validator verdict for a staged block.
    ///
    /// Only a `HeaderOnly` tip changes; a tip settled in the meantime keeps
    /// its status and that status is reported.
    pub fn apply_validation(
        &mut self,
        block: Block,
        status: ValidationStatus,
    ) -> Result<(), ChainTrackerError> {
        let hash = block.hash();
        let tip = self.tips.get_mut(&hash).ok_or(ChainTrackerError::BlockNotInTree { hash })?;

        match tip.status {
            TipStatus::BodyValid => return Ok(()),
            TipStatus::BodyInvalid => {
                return Err(ChainTrackerError::ValidationFailure {
                    hash,
                    reason: tip.rejection.clone().unwrap_or_default(),
                })
            }
            TipStatus::HeaderOnly => {}
        }

        match status {
            ValidationStatus::Go => {
                tip.status = TipStatus::BodyValid;
                tip.body = Some(block);
                debug!(%hash, height = tip.height, "Block valid");
                self.connect_from(hash);
                self.reselect();
                Ok(())
            }
            ValidationStatus::NoGo(err) => {
                let reason = err.to_string();
                info!(%hash, height = tip.height, "Block invalid: {reason}");
                tip.status = TipStatus::BodyInvalid;
                tip.rejection = Some(reason.clone());
                self.observer.block_rejected(hash, &block);
                tip.body = Some(block);
                self.reselect();
                Err(ChainTrackerError::ValidationFailure { hash, reason })
            }
        }
    }

    /// Stage, validate and apply a block in one step.
    pub fn submit_block(&mut self, block: Block, now: Instant) -> Result<(), ChainTrackerError> {
        match self.stage_block(&block, now)? {
            BlockStage::AlreadyValid => Ok(()),
            BlockStage::Validate => {
                let status = self.validator.validate_block(&block);
                self.apply_validation(block, status)
            }
        }
    }

    /// Check that an invalid-block notice carries the body of the block it
    /// names. Only such a notice may be acted on, and then only by
    /// validating the body ourselves.
    pub fn check_advisory(&self, hash: &BlockHash, block: &Block) -> Result<(), ChainTrackerError> {
        let claimed = block.hash();
        if claimed != *hash {
            return Err(ChainTrackerError::UntrustedAdvisory {
                hash: *hash,
                reason: format!("attached body is for {claimed}"),
            });
        }
        if !block.body_matches_header() {
            return Err(ChainTrackerError::UntrustedAdvisory {
                hash: *hash,
                reason: "attached body does not reproduce the header".to_string(),
            });
        }
        Ok(())
    }

    /// Handle an out-of-band claim that `hash` is invalid.
    ///
    /// The claim itself never changes a tip. A notice whose body reproduces
    /// the named block is processed as an ordinary block submission.
    pub fn report_external_invalid(
        &mut self,
        hash: BlockHash,
        block: Block,
        now: Instant,
    ) -> Result<(), ChainTrackerError> {
        self.check_advisory(&hash, &block)?;
        self.submit_block(block, now)
    }

    /// Mark `hash` and its validated descendants connected, if its parent
    /// is connected.
    fn connect_from(&mut self, hash: BlockHash) {
        let parent_connected = self
            .tips
            .get(&hash)
            .and_then(|t| t.parent)
            .and_then(|p| self.tips.get(&p))
            .is_some_and(|p| p.connected);
        if !parent_connected {
            return;
        }

        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(tip) = self.tips.get_mut(&h) {
                if tip.status == TipStatus::BodyValid && !tip.connected {
                    tip.connected = true;
                    stack.extend(tip.children.iter().copied());
                }
            }
        }
    }

    // ── Selection ─────────────────────────────────────────────────

    fn outranks(a: &CandidateTip, b: &CandidateTip) -> bool {
        a.chain_work > b.chain_work || (a.chain_work == b.chain_work && a.seq < b.seq)
    }

    /// Best tip reachable from the root through tips accepted by `follow`.
    fn select_from_root(&self, follow: impl Fn(&CandidateTip) -> bool) -> BlockHash {
        let mut best: Option<&CandidateTip> = None;
        let mut stack = vec![self.root];
        while let Some(h) = stack.pop() {
            let Some(tip) = self.tips.get(&h) else {
                continue;
            };
            if !follow(tip) {
                continue;
            }
            if best.map_or(true, |b| Self::outranks(tip, b)) {
                best = Some(tip);
            }
            stack.extend(tip.children.iter().copied());
        }
        best.map_or(self.root, |t| t.hash)
    }

    /// Most-work tip with no invalid body on its chain.
    pub fn select_active(&self) -> BlockHash {
        self.select_from_root(CandidateTip::is_eligible)
    }

    /// Most-work tip whose chain is fully validated.
    pub fn select_best_validated(&self) -> BlockHash {
        self.select_from_root(|t| t.connected)
    }

    /// Recompute both selected tips and report any movement.
    fn reselect(&mut self) {
        let new_best = self.select_best_validated();
        if new_best != self.best_validated {
            let old_best = self.best_validated;
            self.best_validated = new_best;

            let ancestor = self.find_common_ancestor(old_best, new_best).unwrap_or(self.root);
            for h in self.collect_chain_from_ancestor(ancestor, new_best) {
                let tip = &self.tips[&h];
                if let Some(body) = &tip.body {
                    self.observer.block_connected(tip.height, body);
                }
            }

            let height = self.tips[&new_best].height;
            info!(hash = %new_best, height, "Best block changed");
            self.observer.best_block_changed(new_best, height);
        }

        let new_active = self.select_active();
        if new_active != self.active_tip {
            self.active_tip = new_active;
            let height = self.tips[&new_active].height;
            info!(hash = %new_active, height, "Mining tip changed");
            self.observer.mining_tip_changed(new_active, height);
        }
    }

    /// Find the deepest block that is an ancestor of both `a` and `b`.
    pub fn find_common_ancestor(
        &self,
        a: BlockHash,
        b: BlockHash,
    ) -> Result<BlockHash, ChainTrackerError> {
        let block_a = self.tips.get(&a).ok_or(ChainTrackerError::BlockNotInTree { hash: a })?;
        let block_b = self.tips.get(&b).ok_or(ChainTrackerError::BlockNotInTree { hash: b })?;

        let mut ha = a;
        let mut hb = b;
        let mut na = block_a.height;
        let mut nb = block_b.height;

        while na > nb {
            ha = self.parent_of(ha)?;
            na -= 1;
        }
        while nb > na {
            hb = self.parent_of(hb)?;
            nb -= 1;
        }
        while ha != hb {
            ha = self.parent_of(ha)?;
            hb = self.parent_of(hb)?;
        }

        Ok(ha)
    }

    fn parent_of(&self, hash: BlockHash) -> Result<BlockHash, ChainTrackerError> {
        self.tips
            .get(&hash)
            .and_then(|t| t.parent)
            .ok_or(ChainTrackerError::BlockNotInTree { hash })
    }

    /// Block hashes from `ancestor` (exclusive) to `tip` (inclusive), in
    /// ascending order.
    fn collect_chain_from_ancestor(&self, ancestor: BlockHash, tip: BlockHash) -> Vec<BlockHash> {
        let mut chain = Vec::new();
        let mut current = Some(tip);
        while let Some(h) = current {
            if h == ancestor {
                break;
            }
            chain.push(h);
            current = self.tips.get(&h).and_then(|t| t.parent);
        }
        chain.reverse();
        chain
    }

    /// Returns true if `hash` or one of its ancestors failed validation.
    fn has_invalid_lineage(&self, hash: BlockHash) -> bool {
        let mut current = Some(hash);
        while let Some(h) = current {
            match self.tips.get(&h) {
                Some(tip) if tip.status == TipStatus::BodyInvalid => return true,
                Some(tip) => current = tip.parent,
                None => break,
            }
        }
        false
    }

    // ── Mining ────────────────────────────────────────────────────

    /// Where to mine the next block.
    pub fn mining_template(&self, mode: TemplateMode, now: Instant) -> BlockTemplate {
        let target = match mode {
            TemplateMode::Validated => self.best_validated,
            TemplateMode::HeadFirst { window } => self.head_first_target(window, now),
        };
        BlockTemplate {
            previous_block_hash: target,
            height: self.tips.get(&target).map_or(0, |t| t.height) + 1,
        }
    }

    /// Walk forward from the active tip's last connected ancestor, stopping
    /// before the first header-only tip older than `window`.
    fn head_first_target(&self, window: Option<Duration>, now: Instant) -> BlockHash {
        let Some(window) = window else {
            return self.active_tip;
        };

        let mut path = Vec::new();
        let mut current = self.active_tip;
        while let Some(tip) = self.tips.get(&current) {
            if tip.connected {
                break;
            }
            path.push(current);
            match tip.parent {
                Some(p) => current = p,
                None => break,
            }
        }

        let mut target = current;
        for h in path.into_iter().rev() {
            let tip = &self.tips[&h];
            if tip.status == TipStatus::HeaderOnly
                && now.saturating_duration_since(tip.received_at) > window
            {
                debug!(hash = %h, "Header too old to mine on");
                break;
            }
            target = h;
        }

        // A stale fork must not pull us below our own best block
        match (self.tips.get(&target), self.tips.get(&self.best_validated)) {
            (Some(t), Some(best)) if t.chain_work < best.chain_work => self.best_validated,
            _ => target,
        }
    }

    /// Every leaf of the tree, plus the best validated tip.
    pub fn chain_tips(&self) -> Vec<ChainTipInfo> {
        let mut tips: Vec<ChainTipInfo> = self
            .tips
            .values()
            .filter(|t| t.children.is_empty() || t.hash == self.best_validated)
            .map(|t| ChainTipInfo {
                hash: t.hash,
                height: t.height,
                chain_work: t.chain_work.clone(),
                status: self.tip_status(t),
                mining: t.hash == self.active_tip,
            })
            .collect();
        tips.sort_by(|a, b| b.height.cmp(&a.height).then(a.hash.cmp(&b.hash)));
        tips
    }

    fn tip_status(&self, tip: &CandidateTip) -> ChainTipStatus {
        if self.has_invalid_lineage(tip.hash) {
            ChainTipStatus::Invalid
        } else if tip.hash == self.best_validated {
            ChainTipStatus::Active
        } else if tip.connected {
            ChainTipStatus::ValidFork
        } else {
            ChainTipStatus::HeadersOnly
        }
    }

    // ── Pruning ───────────────────────────────────────────────────

    /// Collect `hash` and everything descending from it.
    fn collect_all_from(&self, hash: BlockHash) -> HashSet<BlockHash> {
        let mut result = HashSet::from([hash]);
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(tip) = self.tips.get(&h) {
                for &child in &tip.children {
                    result.insert(child);
                    stack.push(child);
                }
            }
        }
        result
    }

    /// Re-root the tree `retention_depth` blocks behind the best validated
    /// tip, dropping everything that does not descend from the new root.
    ///
    /// Returns the number of tips removed.
    pub fn prune(&mut self) -> usize {
        let Some(best) = self.tips.get(&self.best_validated) else {
            return 0;
        };
        let root_height = self.tips.get(&self.root).map_or(0, |t| t.height);
        if best.height <= root_height + self.retention_depth {
            return 0;
        }
        let boundary = best.height - self.retention_depth;

        let mut new_root = self.best_validated;
        while let Some(tip) = self.tips.get(&new_root) {
            if tip.height <= boundary {
                break;
            }
            match tip.parent {
                Some(p) => new_root = p,
                None => break,
            }
        }

        let keep = self.collect_all_from(new_root);
        let before = self.tips.len();
        self.tips.retain(|h, _| keep.contains(h));
        self.root = new_root;
        if let Some(tip) = self.tips.get_mut(&new_root) {
            tip.parent = None;
        }
        self.reselect();

        let removed = before - self.tips.len();
        debug!(root = %new_root, removed, "Pruned chain tree");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ProofOfWorkValidator;
    use std::sync::Mutex;
    use tipwatch_common::pow::REGTEST_POW_LIMIT_BITS;
    use tipwatch_test_utils::{
        block_with_payments, coinbase, create_block, duplicated_tail_copy, genesis,
        invalid_block, mutated_copy, unsolve, valid_block, valid_chain, BASE_TIME,
    };

    /// Test observer that records all events for assertion.
    #[derive(Default)]
    struct TestObserver {
        headers: Mutex<Vec<BlockHash>>,
        wanted: Mutex<Vec<BlockHash>>,
        connected: Mutex<Vec<(u64, BlockHash)>>,
        rejected: Mutex<Vec<BlockHash>>,
        best: Mutex<Vec<BlockHash>>,
        mining: Mutex<Vec<BlockHash>>,
    }

    impl ChainTreeObserver for Arc<TestObserver> {
        fn header_accepted(&self, header: &BlockHeader) {
            self.headers.lock().unwrap().push(header.hash());
        }

        fn block_wanted(&self, hash: BlockHash) {
            self.wanted.lock().unwrap().push(hash);
        }

        fn block_connected(&self, height: u64, block: &Block) {
            self.connected.lock().unwrap().push((height, block.hash()));
        }

        fn block_rejected(&self, hash: BlockHash, _block: &Block) {
            self.rejected.lock().unwrap().push(hash);
        }

        fn best_block_changed(&self, hash: BlockHash, _height: u64) {
            self.best.lock().unwrap().push(hash);
        }

        fn mining_tip_changed(&self, hash: BlockHash, _height: u64) {
            self.mining.lock().unwrap().push(hash);
        }
    }

    fn make_tree(retention_depth: u64) -> (ChainTree, Arc<TestObserver>, BlockHash) {
        let observer = Arc::new(TestObserver::default());
        let validator = Arc::new(ProofOfWorkValidator::new(REGTEST_POW_LIMIT_BITS).unwrap());
        let (header, hash) = genesis();
        let tree = ChainTree::new(header, 0, retention_depth, validator, Box::new(observer.clone()));
        (tree, observer, hash)
    }

    fn template(tree: &ChainTree, mode: TemplateMode) -> (BlockHash, u64) {
        let t = tree.mining_template(mode, Instant::now());
        (t.previous_block_hash, t.height)
    }

    const HEAD_FIRST: TemplateMode = TemplateMode::HeadFirst { window: None };

    #[test]
    fn new_tree_mines_on_root() {
        let (tree, _, g) = make_tree(288);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root(), g);
        assert_eq!(tree.best_validated(), g);
        assert_eq!(tree.active_tip(), g);
        assert_eq!(template(&tree, TemplateMode::Validated), (g, 1));
        assert_eq!(template(&tree, HEAD_FIRST), (g, 1));
    }

    #[test]
    fn header_moves_mining_tip_but_not_best_block() {
        let (mut tree, obs, g) = make_tree(288);
        let b1 = valid_block(g, 1);

        let outcome = tree.submit_header(b1.header.clone(), Instant::now()).unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert_eq!(tree.get(&b1.hash()).unwrap().status, TipStatus::HeaderOnly);
        assert_eq!(tree.active_tip(), b1.hash());
        assert_eq!(tree.best_validated(), g);
        assert_eq!(template(&tree, HEAD_FIRST), (b1.hash(), 2));
        assert_eq!(template(&tree, TemplateMode::Validated), (g, 1));
        assert_eq!(*obs.wanted.lock().unwrap(), vec![b1.hash()]);
        assert_eq!(*obs.headers.lock().unwrap(), vec![b1.hash()]);
    }

    #[test]
    fn resubmitted_header_is_a_no_op() {
        let (mut tree, obs, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        tree.submit_header(b1.header.clone(), Instant::now()).unwrap();
        let outcome = tree.submit_header(b1.header.clone(), Instant::now()).unwrap();

        assert_eq!(outcome, SubmitOutcome::AlreadyKnown);
        assert_eq!(tree.len(), 2);
        assert_eq!(obs.wanted.lock().unwrap().len(), 1);
        assert_eq!(obs.mining.lock().unwrap().len(), 1);
    }

    #[test]
    fn header_without_proof_of_work_is_rejected() {
        let (mut tree, _, g) = make_tree(288);
        let mut header = valid_block(g, 1).header;
        unsolve(&mut header);

        let err = tree.submit_header(header.clone(), Instant::now()).unwrap_err();
        assert_eq!(err, ChainTrackerError::InvalidProofOfWork { hash: header.hash() });
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.active_tip(), g);
    }

    #[test]
    fn header_with_unknown_parent_is_rejected() {
        let (mut tree, _, g) = make_tree(288);
        let chain = valid_chain(g, 1, 2);

        let err = tree.submit_header(chain[1].header.clone(), Instant::now()).unwrap_err();
        assert_eq!(
            err,
            ChainTrackerError::UnknownParent {
                hash: chain[1].hash(),
                parent: chain[0].hash()
            }
        );
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn valid_block_advances_best_block() {
        let (mut tree, obs, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        tree.submit_block(b1.clone(), Instant::now()).unwrap();

        let tip = tree.get(&b1.hash()).unwrap();
        assert_eq!(tip.status, TipStatus::BodyValid);
        assert!(tip.connected);
        assert_eq!(tree.best_validated(), b1.hash());
        assert_eq!(tree.best_height(), 1);
        assert_eq!(*obs.connected.lock().unwrap(), vec![(1, b1.hash())]);
        // Full blocks are not requested
        assert!(obs.wanted.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_body_reverts_mining_tip_to_parent() {
        let (mut tree, obs, g) = make_tree(288);
        let bad = invalid_block(g, 1);
        tree.submit_header(bad.header.clone(), Instant::now()).unwrap();
        assert_eq!(template(&tree, HEAD_FIRST).0, bad.hash());

        let err = tree.submit_block(bad.clone(), Instant::now()).unwrap_err();
        assert!(matches!(err, ChainTrackerError::ValidationFailure { hash, .. } if hash == bad.hash()));
        assert_eq!(tree.get(&bad.hash()).unwrap().status, TipStatus::BodyInvalid);
        assert_eq!(template(&tree, HEAD_FIRST), (g, 1));
        assert_eq!(*obs.rejected.lock().unwrap(), vec![bad.hash()]);
    }

    #[test]
    fn descendants_of_invalid_block_are_excluded_not_deleted() {
        let (mut tree, _, g) = make_tree(288);
        let bad = invalid_block(g, 1);
        let child = valid_block(bad.hash(), 2);
        tree.submit_header(bad.header.clone(), Instant::now()).unwrap();
        tree.submit_header(child.header.clone(), Instant::now()).unwrap();
        assert_eq!(tree.active_tip(), child.hash());

        tree.submit_block(bad, Instant::now()).unwrap_err();
        assert_eq!(tree.active_tip(), g);
        assert!(tree.get(&child.hash()).is_some());

        // Still excluded once its own body validates
        tree.submit_block(child.clone(), Instant::now()).unwrap();
        assert_eq!(tree.active_tip(), g);
        assert_eq!(tree.best_validated(), g);
        assert!(!tree.get(&child.hash()).unwrap().connected);
    }

    #[test]
    fn resubmitted_invalid_block_reports_recorded_failure() {
        let (mut tree, obs, g) = make_tree(288);
        let bad = invalid_block(g, 1);
        let first = tree.submit_block(bad.clone(), Instant::now()).unwrap_err();
        let second = tree.submit_block(bad, Instant::now()).unwrap_err();

        assert_eq!(first, second);
        assert_eq!(obs.rejected.lock().unwrap().len(), 1);
    }

    #[test]
    fn valid_child_of_header_only_parent_waits_for_parent() {
        let (mut tree, obs, g) = make_tree(288);
        let chain = valid_chain(g, 1, 2);
        let (h1, h2) = (&chain[0], &chain[1]);

        tree.submit_header(h1.header.clone(), Instant::now()).unwrap();
        tree.submit_block(h2.clone(), Instant::now()).unwrap();

        assert_eq!(template(&tree, HEAD_FIRST), (h2.hash(), 3));
        assert_eq!(tree.best_validated(), g);
        assert!(!tree.get(&h2.hash()).unwrap().connected);

        tree.submit_block(h1.clone(), Instant::now()).unwrap();
        assert_eq!(tree.best_validated(), h2.hash());
        assert!(tree.get(&h2.hash()).unwrap().connected);
        assert_eq!(
            *obs.connected.lock().unwrap(),
            vec![(1, h1.hash()), (2, h2.hash())]
        );
    }

    #[test]
    fn invalid_parent_under_valid_child_falls_back_to_root() {
        let (mut tree, _, g) = make_tree(288);
        let bad = invalid_block(g, 1);
        let child = valid_block(bad.hash(), 2);

        tree.submit_header(bad.header.clone(), Instant::now()).unwrap();
        tree.submit_block(child.clone(), Instant::now()).unwrap();
        assert_eq!(template(&tree, HEAD_FIRST).0, child.hash());

        tree.submit_block(bad, Instant::now()).unwrap_err();
        assert_eq!(template(&tree, HEAD_FIRST), (g, 1));
        assert_eq!(tree.best_validated(), g);
    }

    #[test]
    fn mutated_body_changes_nothing() {
        let (mut tree, obs, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        let mutated = mutated_copy(&b1);

        // Unknown header: not even the header is taken
        let err = tree.submit_block(mutated.clone(), Instant::now()).unwrap_err();
        assert_eq!(err, ChainTrackerError::MutatedBody { hash: b1.hash() });
        assert_eq!(tree.len(), 1);

        // Known header: stays header-only
        tree.submit_header(b1.header.clone(), Instant::now()).unwrap();
        tree.submit_block(mutated, Instant::now()).unwrap_err();
        assert_eq!(tree.get(&b1.hash()).unwrap().status, TipStatus::HeaderOnly);
        assert!(obs.rejected.lock().unwrap().is_empty());

        // The real body still validates afterwards
        tree.submit_block(b1.clone(), Instant::now()).unwrap();
        assert_eq!(tree.best_validated(), b1.hash());
    }

    #[test]
    fn duplicated_tail_body_cannot_condemn_valid_block() {
        let (mut tree, obs, g) = make_tree(288);
        let good = block_with_payments(g, 1);
        let forged = duplicated_tail_copy(&good);
        assert_eq!(forged.hash(), good.hash());
        tree.submit_header(good.header.clone(), Instant::now()).unwrap();

        let err = tree.report_external_invalid(good.hash(), forged.clone(), Instant::now());
        assert!(matches!(err, Err(ChainTrackerError::UntrustedAdvisory { .. })));
        let err = tree.submit_block(forged, Instant::now());
        assert!(matches!(err, Err(ChainTrackerError::MutatedBody { .. })));
        assert_eq!(tree.get(&good.hash()).unwrap().status, TipStatus::HeaderOnly);
        assert!(obs.rejected.lock().unwrap().is_empty());

        // The genuine body is still accepted
        tree.submit_block(good.clone(), Instant::now()).unwrap();
        assert_eq!(tree.best_validated(), good.hash());
    }

    #[test]
    fn advisory_naming_another_block_is_ignored() {
        let (mut tree, _, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        let other = invalid_block(g, 1);
        tree.submit_header(b1.header.clone(), Instant::now()).unwrap();

        let err = tree.report_external_invalid(b1.hash(), other, Instant::now()).unwrap_err();
        assert!(matches!(err, ChainTrackerError::UntrustedAdvisory { .. }));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(&b1.hash()).unwrap().status, TipStatus::HeaderOnly);
        assert_eq!(tree.active_tip(), b1.hash());
    }

    #[test]
    fn advisory_with_mutated_body_is_ignored() {
        let (mut tree, _, g) = make_tree(288);
        let bad = invalid_block(g, 1);
        tree.submit_header(bad.header.clone(), Instant::now()).unwrap();

        let err = tree
            .report_external_invalid(bad.hash(), mutated_copy(&bad), Instant::now())
            .unwrap_err();
        assert!(matches!(err, ChainTrackerError::UntrustedAdvisory { .. }));
        assert_eq!(tree.get(&bad.hash()).unwrap().status, TipStatus::HeaderOnly);
        assert_eq!(tree.active_tip(), bad.hash());
    }

    #[test]
    fn valid_block_claimed_invalid_is_accepted() {
        let (mut tree, _, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        tree.submit_header(b1.header.clone(), Instant::now()).unwrap();

        tree.report_external_invalid(b1.hash(), b1.clone(), Instant::now()).unwrap();
        assert_eq!(tree.best_validated(), b1.hash());
        assert_eq!(tree.active_tip(), b1.hash());
    }

    #[test]
    fn unseen_invalid_block_in_advisory_is_validated_here() {
        let (mut tree, obs, g) = make_tree(288);
        let bad = invalid_block(g, 1);

        let err = tree.report_external_invalid(bad.hash(), bad.clone(), Instant::now()).unwrap_err();
        assert!(matches!(err, ChainTrackerError::ValidationFailure { .. }));
        assert_eq!(tree.get(&bad.hash()).unwrap().status, TipStatus::BodyInvalid);
        assert_eq!(tree.active_tip(), g);
        assert_eq!(*obs.rejected.lock().unwrap(), vec![bad.hash()]);
    }

    #[test]
    fn equal_work_tie_goes_to_first_seen() {
        let (mut tree, _, g) = make_tree(288);
        let a = valid_block(g, 1);
        let b = create_block(g, vec![coinbase(1)], BASE_TIME + 500);

        tree.submit_header(a.header.clone(), Instant::now()).unwrap();
        tree.submit_header(b.header.clone(), Instant::now()).unwrap();
        assert_eq!(tree.active_tip(), a.hash());

        tree.submit_block(b.clone(), Instant::now()).unwrap();
        tree.submit_block(a.clone(), Instant::now()).unwrap();
        // b validated first, but a was seen first
        assert_eq!(tree.best_validated(), a.hash());
    }

    #[test]
    fn longer_fork_reorganises_best_chain() {
        let (mut tree, obs, g) = make_tree(288);
        let main = valid_block(g, 1);
        tree.submit_block(main.clone(), Instant::now()).unwrap();

        let f1 = create_block(g, vec![coinbase(1)], BASE_TIME + 700);
        let f2 = create_block(f1.hash(), vec![coinbase(2)], BASE_TIME + 701);
        tree.submit_block(f1.clone(), Instant::now()).unwrap();
        assert_eq!(tree.best_validated(), main.hash());
        tree.submit_block(f2.clone(), Instant::now()).unwrap();

        assert_eq!(tree.best_validated(), f2.hash());
        assert_eq!(
            *obs.connected.lock().unwrap(),
            vec![(1, main.hash()), (1, f1.hash()), (2, f2.hash())]
        );
        assert_eq!(tree.find_common_ancestor(main.hash(), f2.hash()), Ok(g));
    }

    #[test]
    fn stale_header_falls_out_of_windowed_template() {
        let (mut tree, _, g) = make_tree(288);
        let b1 = valid_block(g, 1);
        let t0 = Instant::now();
        tree.submit_header(b1.header.clone(), t0).unwrap();

        let windowed = TemplateMode::from_headfirst(Some(30));
        let fresh = tree.mining_template(windowed, t0 + Duration::from_secs(10));
        assert_eq!(fresh.previous_block_hash, b1.hash());

        let stale = tree.mining_template(windowed, t0 + Duration::from_secs(31));
        assert_eq!(stale.previous_block_hash, g);
        assert_eq!(stale.height, 1);

        let unbounded =
            tree.mining_template(TemplateMode::from_headfirst(Some(0)), t0 + Duration::from_secs(31));
        assert_eq!(unbounded.previous_block_hash, b1.hash());
    }

    #[test]
    fn window_stops_at_first_stale_header() {
        let (mut tree, _, g) = make_tree(288);
        let chain = valid_chain(g, 1, 2);
        let t0 = Instant::now();
        tree.submit_header(chain[0].header.clone(), t0).unwrap();
        tree.submit_header(chain[1].header.clone(), t0 + Duration::from_secs(40)).unwrap();

        // Parent stale, child fresh: cannot mine past the stale parent
        let mode = TemplateMode::HeadFirst {
            window: Some(Duration::from_secs(30)),
        };
        let t = tree.mining_template(mode, t0 + Duration::from_secs(45));
        assert_eq!(t.previous_block_hash, g);
    }

    #[test]
    fn headfirst_argument_maps_to_mode() {
        assert_eq!(TemplateMode::from_headfirst(None), TemplateMode::Validated);
        assert_eq!(TemplateMode::from_headfirst(Some(0)), TemplateMode::HeadFirst { window: None });
        assert_eq!(
            TemplateMode::from_headfirst(Some(30)),
            TemplateMode::HeadFirst {
                window: Some(Duration::from_secs(30))
            }
        );
    }

    #[test]
    fn chain_tips_reports_each_leaf() {
        let (mut tree, _, g) = make_tree(288);
        let main = valid_chain(g, 1, 2);
        for b in &main {
            tree.submit_block(b.clone(), Instant::now()).unwrap();
        }
        let fork = create_block(g, vec![coinbase(1)], BASE_TIME + 900);
        tree.submit_block(fork.clone(), Instant::now()).unwrap();
        let header_only = valid_block(main[1].hash(), 3);
        tree.submit_header(header_only.header.clone(), Instant::now()).unwrap();
        let bad = invalid_block(fork.hash(), 2);
        tree.submit_block(bad.clone(), Instant::now()).unwrap_err();

        let tips = tree.chain_tips();
        let status_of = |h: BlockHash| tips.iter().find(|t| t.hash == h).map(|t| (t.status, t.mining));
        assert_eq!(tips.len(), 3);
        assert_eq!(status_of(header_only.hash()), Some((ChainTipStatus::HeadersOnly, true)));
        assert_eq!(status_of(main[1].hash()), Some((ChainTipStatus::Active, false)));
        assert_eq!(status_of(bad.hash()), Some((ChainTipStatus::Invalid, false)));
        assert_eq!(status_of(fork.hash()), None);
    }

    #[test]
    fn prune_keeps_retention_depth_behind_best() {
        let (mut tree, _, g) = make_tree(2);
        let fork = create_block(g, vec![coinbase(1)], BASE_TIME + 900);
        tree.submit_block(fork.clone(), Instant::now()).unwrap();
        let chain = valid_chain(g, 1, 5);
        for b in &chain {
            tree.submit_block(b.clone(), Instant::now()).unwrap();
        }
        assert_eq!(tree.len(), 7);

        let removed = tree.prune();
        assert_eq!(tree.root(), chain[2].hash());
        assert_eq!(removed, 4);
        assert_eq!(tree.len(), 3);
        assert!(tree.get(&fork.hash()).is_none());
        assert!(tree.get(&chain[2].hash()).unwrap().parent.is_none());
        assert_eq!(tree.best_validated(), chain[4].hash());
        assert_eq!(tree.active_tip(), chain[4].hash());

        // Already within depth
        assert_eq!(tree.prune(), 0);
    }
}
