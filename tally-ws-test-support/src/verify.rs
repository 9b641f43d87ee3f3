//! Verification utilities for message order and content.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Checks that messages come back in the order they were sent, with the
/// same bytes.
pub struct EchoVerifier {
    /// Hashes of sent payloads not yet seen again
    expected: Mutex<VecDeque<u64>>,
    matched: AtomicU64,
    mismatches: AtomicU64,
    unexpected: AtomicU64,
}

impl Default for EchoVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoVerifier {
    pub fn new() -> Self {
        Self {
            expected: Mutex::new(VecDeque::new()),
            matched: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            unexpected: AtomicU64::new(0),
        }
    }

    /// Register a payload that should come back next after those already expected.
    pub fn expect(&self, data: &[u8]) {
        self.expected.lock().push_back(simple_hash(data));
    }

    /// Check a received payload against the oldest outstanding one.
    pub fn verify(&self, data: &[u8]) -> VerifyResult {
        let actual = simple_hash(data);
        let Some(expected) = self.expected.lock().pop_front() else {
            self.unexpected.fetch_add(1, Ordering::Relaxed);
            return VerifyResult::Unexpected;
        };

        if actual == expected {
            self.matched.fetch_add(1, Ordering::Relaxed);
            VerifyResult::Ok
        } else {
            self.mismatches.fetch_add(1, Ordering::Relaxed);
            VerifyResult::Mismatch { expected, actual }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.expected.lock().len()
    }

    pub fn stats(&self) -> VerifyStats {
        VerifyStats {
            matched: self.matched.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
            outstanding: self.outstanding() as u64,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.mismatches.load(Ordering::Relaxed) > 0 || self.unexpected.load(Ordering::Relaxed) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    Mismatch { expected: u64, actual: u64 },
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct VerifyStats {
    pub matched: u64,
    pub mismatches: u64,
    pub unexpected: u64,
    pub outstanding: u64,
}

// FNV-1a
fn simple_hash(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Checks sequence continuity and detects gaps.
pub struct SequenceChecker {
    next_expected: AtomicU64,
    /// Gaps detected: (start, end)
    gaps: Mutex<Vec<(u64, u64)>>,
    total_seen: AtomicU64,
    out_of_order: AtomicU64,
}

impl Default for SequenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceChecker {
    pub fn new() -> Self {
        Self::with_start(0)
    }

    pub fn with_start(start: u64) -> Self {
        Self {
            next_expected: AtomicU64::new(start),
            gaps: Mutex::new(Vec::new()),
            total_seen: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
        }
    }

    pub fn check(&self, seq: u64) -> SequenceStatus {
        self.total_seen.fetch_add(1, Ordering::Relaxed);
        let expected = self.next_expected.load(Ordering::Relaxed);

        if seq == expected {
            self.next_expected.store(seq + 1, Ordering::Relaxed);
            SequenceStatus::InOrder
        } else if seq < expected {
            // Late arrival or duplicate
            self.out_of_order.fetch_add(1, Ordering::Relaxed);
            SequenceStatus::OutOfOrder
        } else {
            let gap = (expected, seq - 1);
            self.gaps.lock().push(gap);
            self.next_expected.store(seq + 1, Ordering::Relaxed);
            SequenceStatus::Gap {
                start: gap.0,
                end: gap.1,
            }
        }
    }

    pub fn gaps(&self) -> Vec<(u64, u64)> {
        self.gaps.lock().clone()
    }

    /// Number of missing sequences across all gaps.
    pub fn total_gap_size(&self) -> u64 {
        self.gaps.lock().iter().map(|(start, end)| end - start + 1).sum()
    }

    pub fn total_seen(&self) -> u64 {
        self.total_seen.load(Ordering::Relaxed)
    }

    pub fn out_of_order(&self) -> u64 {
        self.out_of_order.load(Ordering::Relaxed)
    }

    pub fn is_perfect(&self) -> bool {
        self.gaps.lock().is_empty() && self.out_of_order.load(Ordering::Relaxed) == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceStatus {
    InOrder,
    OutOfOrder,
    Gap { start: u64, end: u64 },
}
