//! Consensus byte encoding of headers and transactions
//!
//! Only encoding is needed here: identities and sizes are computed from it.
//! Decoding raw wire bytes belongs to the peer network interface.

pub struct ConsensusEncoder {
    data: Vec<u8>,
}

impl Default for ConsensusEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusEncoder {
    /// Construct
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn push_u32(&mut self, num: u32) {
        self.data.extend_from_slice(&num.to_le_bytes());
    }

    pub fn push_i32(&mut self, num: i32) {
        self.data.extend_from_slice(&num.to_le_bytes());
    }

    pub fn push_u64(&mut self, num: u64) {
        self.data.extend_from_slice(&num.to_le_bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Push a CompactSize length prefix
    pub fn push_compact_size(&mut self, num: u64) {
        match num {
            0..=0xfc => self.data.push(num as u8),
            0xfd..=0xffff => {
                self.data.push(0xfd);
                self.data.extend_from_slice(&(num as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.data.push(0xfe);
                self.data.extend_from_slice(&(num as u32).to_le_bytes());
            }
            _ => {
                self.data.push(0xff);
                self.data.extend_from_slice(&num.to_le_bytes());
            }
        }
    }

    /// Push a length-prefixed byte string
    pub fn push_var_bytes(&mut self, bytes: &[u8]) {
        self.push_compact_size(bytes.len() as u64);
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the resulting vector
    pub fn to_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Encoded length of a CompactSize prefix
pub fn compact_size_len(num: u64) -> usize {
    match num {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
