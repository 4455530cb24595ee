//! Record partitioner
//!
//! Splits one decoded byte stream into parts at record (newline) boundaries,
//! either after a fixed number of records or once a part reaches a byte
//! threshold. A record is never split across parts, and the concatenation of
//! all parts reproduces the input byte-for-byte.

/// Partitioning policy for a split transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Exactly this many records per part, last part possibly shorter
    Lines(usize),
    /// Flush a part once it reaches this many bytes, at a record boundary
    Bytes(u64),
}

/// Incremental newline-delimited record scanner
///
/// Emitted records include their trailing `\n`; the final record may lack
/// one. `\r\n` input is passed through unchanged.
#[derive(Debug, Default)]
pub struct RecordScanner {
    carry: Vec<u8>,
}

impl RecordScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every record completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.carry.extend_from_slice(chunk);
        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset + 1;
            records.push(self.carry[start..end].to_vec());
            start = end;
        }
        self.carry.drain(..start);
        records
    }

    /// Drain the trailing record that never saw a newline
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.carry.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.carry))
        }
    }
}

/// Groups records into parts according to a [`SplitPolicy`]
#[derive(Debug)]
pub struct Partitioner {
    policy: SplitPolicy,
    scanner: RecordScanner,
    current: Vec<u8>,
    records_in_part: usize,
}

impl Partitioner {
    pub fn new(policy: SplitPolicy) -> Self {
        Self {
            policy,
            scanner: RecordScanner::new(),
            current: Vec::new(),
            records_in_part: 0,
        }
    }

    /// Feed a chunk, returning every part completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        for record in self.scanner.push(chunk) {
            self.append_record(record, &mut parts);
        }
        parts
    }

    /// Flush the trailing record and the final partial part
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        if let Some(record) = self.scanner.finish() {
            self.append_record(record, &mut parts);
        }
        if !self.current.is_empty() {
            parts.push(self.current);
        }
        parts
    }

    fn append_record(&mut self, record: Vec<u8>, parts: &mut Vec<Vec<u8>>) {
        self.current.extend_from_slice(&record);
        self.records_in_part += 1;
        let full = match self.policy {
            SplitPolicy::Lines(n) => self.records_in_part >= n,
            SplitPolicy::Bytes(b) => self.current.len() as u64 >= b,
        };
        if full {
            parts.push(std::mem::take(&mut self.current));
            self.records_in_part = 0;
        }
    }
}
