//! Receipt Log
//!
//! Append-only, ordered record of every dispatch outcome. Sequence numbers
//! are assigned atomically under the ledger lock: unique, strictly
//! increasing and gap-free within one engine lifetime. Each receipt is
//! hash-chained to its predecessor so the log can be verified end to end.
//! An optional JSONL sink mirrors the log to disk, one self-contained
//! record per line, suitable for external replay tools.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::config::ReceiptConfig;
use crate::errors::EngineError;
use crate::types::{
    ConfidenceBits, DispatchOutcome, NodeId, OperationRecord, Receipt,
};

const GENESIS_HASH: &str = "genesis";
const DEFAULT_LOG_CAPACITY: usize = 256;

/// Everything the engine knows about a dispatch before the log assigns the
/// sequence number, timestamp and chain hash.
#[derive(Debug, Clone)]
pub struct ReceiptDraft {
    pub signature: String,
    pub goal: String,
    pub node_path: Vec<NodeId>,
    pub response: Option<String>,
    pub operations: Vec<OperationRecord>,
    pub bits: ConfidenceBits,
    pub outcome: DispatchOutcome,
    pub success: bool,
    pub error: Option<String>,
}

/// Bounded in-memory buffer of structured log lines (test-friendly).
#[derive(Debug)]
struct LogBuffer {
    entries: Vec<String>,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, entry: String) {
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    fn recent(&self, max: usize) -> Vec<String> {
        let len = self.entries.len();
        let start = len.saturating_sub(max);
        self.entries[start..].to_vec()
    }
}

#[derive(Debug)]
struct LedgerInner {
    receipts: Vec<Receipt>,
    next_seq: u64,
    chain_tip: String,
    sink: Option<File>,
    logs: LogBuffer,
}

/// Append-only receipt ledger.
#[derive(Debug)]
pub struct ReceiptLog {
    inner: Mutex<LedgerInner>,
}

impl ReceiptLog {
    pub fn new(config: &ReceiptConfig) -> Result<Self, EngineError> {
        let sink = match &config.path {
            Some(path) => Some(open_sink(path)?),
            None => None,
        };
        let capacity = std::env::var("SYNAPSE_LOG_BUFFER_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .or(config.log_buffer_capacity)
            .unwrap_or(DEFAULT_LOG_CAPACITY);
        Ok(Self {
            inner: Mutex::new(LedgerInner {
                receipts: Vec::new(),
                next_seq: 1,
                chain_tip: GENESIS_HASH.to_string(),
                sink,
                logs: LogBuffer::new(capacity),
            }),
        })
    }

    /// In-memory log with no sink, for harnesses and tests.
    pub fn ephemeral() -> Self {
        Self::new(&ReceiptConfig::default()).expect("ephemeral log cannot fail")
    }

    /// Assign the next sequence number, chain the hash and append. The whole
    /// step happens under one lock so two concurrent dispatches can never
    /// observe the same sequence number or leave a gap.
    pub fn append(&self, draft: ReceiptDraft) -> Receipt {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let mut receipt = Receipt {
            seq,
            receipt_id: format!("r-{}", Uuid::new_v4()),
            signature: draft.signature,
            goal: draft.goal,
            node_path: draft.node_path,
            response: draft.response,
            operations: draft.operations,
            bits: draft.bits,
            outcome: draft.outcome,
            success: draft.success,
            error: draft.error,
            timestamp_ms: Utc::now().timestamp_millis() as u64,
            chain_hash: String::new(),
        };
        receipt.chain_hash = chain_hash(&inner.chain_tip, &receipt);
        inner.chain_tip = receipt.chain_hash.clone();

        let log_line = format!(
            "{{\"event\":\"receipt_appended\",\"seq\":{},\"receipt_id\":\"{}\",\"signature\":\"{}\",\"goal\":\"{}\",\"outcome\":\"{:?}\",\"success\":{},\"e\":{}}}",
            receipt.seq,
            receipt.receipt_id,
            receipt.signature,
            receipt.goal,
            receipt.outcome,
            receipt.success,
            receipt.bits.e,
        );
        inner.logs.push(log_line);

        if inner.sink.is_some() {
            let line = serde_json::to_string(&receipt).unwrap_or_default();
            let sink = inner.sink.as_mut().unwrap();
            if let Err(e) = writeln!(sink, "{}", line) {
                warn!(seq, error = %e, "failed to mirror receipt to sink");
            }
        }

        inner.receipts.push(receipt.clone());
        receipt
    }

    /// All receipts with `seq >= from`, in sequence order.
    pub fn read_from(&self, from: u64) -> Vec<Receipt> {
        let inner = self.inner.lock().unwrap();
        inner
            .receipts
            .iter()
            .filter(|r| r.seq >= from)
            .cloned()
            .collect()
    }

    /// The most recent `n` receipts, in sequence order.
    pub fn tail(&self, n: usize) -> Vec<Receipt> {
        let inner = self.inner.lock().unwrap();
        let len = inner.receipts.len();
        inner.receipts[len.saturating_sub(n)..].to_vec()
    }

    pub fn get(&self, seq: u64) -> Option<Receipt> {
        let inner = self.inner.lock().unwrap();
        inner.receipts.iter().find(|r| r.seq == seq).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-derive the hash chain from the beginning.
    pub fn verify_integrity(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        verify_chain(&inner.receipts)
    }

    /// Recent structured log lines from the in-memory buffer.
    pub fn recent_logs(&self, max: usize) -> Vec<String> {
        self.inner.lock().unwrap().logs.recent(max)
    }
}

/// Verify a run of receipts, e.g. read back from a JSONL sink. Sequence
/// numbering and the hash chain restart at each engine lifetime, marked by
/// `seq == 1`.
pub fn verify_chain(receipts: &[Receipt]) -> bool {
    let mut tip = GENESIS_HASH.to_string();
    let mut expected_seq = 1u64;
    for receipt in receipts {
        if receipt.seq == 1 {
            tip = GENESIS_HASH.to_string();
            expected_seq = 1;
        }
        if receipt.seq != expected_seq {
            return false;
        }
        if chain_hash(&tip, receipt) != receipt.chain_hash {
            return false;
        }
        tip = receipt.chain_hash.clone();
        expected_seq += 1;
    }
    true
}

fn open_sink(path: &Path) -> Result<File, EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Sink(format!("{}: {}", parent.display(), e)))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::Sink(format!("{}: {}", path.display(), e)))
}

/// Chain hash over the fields that define the receipt's identity.
fn chain_hash(prev: &str, receipt: &Receipt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(receipt.seq.to_be_bytes());
    hasher.update(receipt.receipt_id.as_bytes());
    hasher.update(receipt.signature.as_bytes());
    hasher.update(receipt.goal.as_bytes());
    hasher.update([receipt.success as u8, receipt.bits.e as u8]);
    hasher.update(receipt.timestamp_ms.to_be_bytes());
    if let Some(response) = &receipt.response {
        hasher.update(response.as_bytes());
    }
    for op in &receipt.operations {
        hasher.update(op.detail.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
