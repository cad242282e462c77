//! Block and transaction builders for tests.
//!
//! Everything here targets the regression-test proof-of-work limit, so
//! solving a header takes a couple of hashes on average.

use tipwatch_common::{
    genesis::regtest_genesis_header,
    pow::{check_proof_of_work, target_from_compact, REGTEST_POW_LIMIT_BITS},
    Block, BlockHash, BlockHeader, OutPoint, Transaction, TxInput, TxOutput,
};

/// Start of the test chain's clock
pub const BASE_TIME: u32 = 1_500_000_000;

/// Subsidy paid by test coinbases
pub const COINBASE_VALUE: u64 = 50 * 100_000_000;

/// Locking script standing in for an address
pub fn address_script(tag: u8) -> Vec<u8> {
    vec![0x76, 0xa9, 0x14, tag, 0x88, 0xac]
}

/// Coinbase for a block at `height`
pub fn coinbase(height: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            value: COINBASE_VALUE,
            script_pubkey: address_script(0),
        }],
        lock_time: 0,
    }
}

/// Transaction spending `inputs` into the given outputs
pub fn spend(inputs: &[OutPoint], outputs: &[(u64, Vec<u8>)]) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs
            .iter()
            .map(|outpoint| TxInput {
                previous_output: *outpoint,
                script_sig: vec![0x51],
                sequence: u32::MAX,
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(value, script)| TxOutput {
                value: *value,
                script_pubkey: script.clone(),
            })
            .collect(),
        lock_time: 0,
    }
}

/// Grind the nonce until the header meets its own target
pub fn solve(header: &mut BlockHeader) {
    let limit = target_from_compact(REGTEST_POW_LIMIT_BITS).expect("regtest limit decodes");
    while !check_proof_of_work(&header.hash(), header.bits, &limit).unwrap_or(false) {
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// Grind the nonce until the header fails its own target
pub fn unsolve(header: &mut BlockHeader) {
    let limit = target_from_compact(REGTEST_POW_LIMIT_BITS).expect("regtest limit decodes");
    while check_proof_of_work(&header.hash(), header.bits, &limit).unwrap_or(false) {
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// Solved block on `parent` carrying `transactions`
pub fn create_block(parent: BlockHash, transactions: Vec<Transaction>, timestamp: u32) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: parent,
            merkle_root: Default::default(),
            timestamp,
            bits: REGTEST_POW_LIMIT_BITS,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block.compute_merkle_root();
    solve(&mut block.header);
    block
}

/// Valid block at `height` on `parent`
pub fn valid_block(parent: BlockHash, height: u64) -> Block {
    create_block(parent, vec![coinbase(height)], BASE_TIME + height as u32)
}

/// Block with valid proof of work whose body spends its own coinbase
pub fn invalid_block(parent: BlockHash, height: u64) -> Block {
    let cb = coinbase(height);
    let bad = spend(
        &[OutPoint::new(cb.hash(), 0)],
        &[(COINBASE_VALUE, address_script(1))],
    );
    create_block(parent, vec![cb, bad], BASE_TIME + height as u32)
}

/// Valid block at `height` carrying a coinbase and two payments from outside
/// outpoints
pub fn block_with_payments(parent: BlockHash, height: u64) -> Block {
    let payments = (1..=2u8)
        .map(|n| {
            spend(
                &[OutPoint::new(tipwatch_common::Hash::new([n; 32]), height as u32)],
                &[(1000, address_script(n))],
            )
        })
        .collect::<Vec<_>>();
    let mut transactions = vec![coinbase(height)];
    transactions.extend(payments);
    create_block(parent, transactions, BASE_TIME + height as u32)
}

/// Copy of `block` with its last transaction repeated. An odd transaction
/// count makes this hash to the same merkle root as the original.
pub fn duplicated_tail_copy(block: &Block) -> Block {
    let mut forged = block.clone();
    if let Some(last) = forged.transactions.last().cloned() {
        forged.transactions.push(last);
    }
    forged
}

/// Copy of `block` with a tweaked transaction, so the body no longer matches
/// the header's merkle root while the header (and its hash) is unchanged
pub fn mutated_copy(block: &Block) -> Block {
    let mut tweaked = block.clone();
    if let Some(tx) = tweaked.transactions.first_mut() {
        tx.lock_time = 11;
    }
    tweaked
}

/// Genesis header plus its hash
pub fn genesis() -> (BlockHeader, BlockHash) {
    let header = regtest_genesis_header();
    let hash = header.hash();
    (header, hash)
}

/// Chain of `count` valid blocks on `parent`, starting at `first_height`
pub fn valid_chain(parent: BlockHash, first_height: u64, count: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut tip = parent;
    for i in 0..count {
        let block = valid_block(tip, first_height + i as u64);
        tip = block.hash();
        blocks.push(block);
    }
    blocks
}
