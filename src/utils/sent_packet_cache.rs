//! Sent-packet cache for checksum-fail resends
//!
//! When checksum validation is on, each connection keeps recently sent frames
//! keyed by payload hash so a peer that detects corruption can ask for the
//! same frame again. Entries expire after a TTL and the cache holds at most a
//! fixed number of bytes, evicting oldest first.

use crate::core::codec::Frame;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct CacheEntry {
    added_at: Instant,
    frame: Frame,
}

#[derive(Debug)]
pub struct SentPacketCache {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<String>,
    ttl: Duration,
    /// Frames with a payload above this are never cached
    max_packet_bytes: usize,
    max_total_bytes: usize,
    total_bytes: usize,
}

impl SentPacketCache {
    pub fn new(ttl: Duration, max_packet_bytes: usize, max_total_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_packet_bytes,
            max_total_bytes,
            total_bytes: 0,
        }
    }

    /// Cache `frame` under `hash`. Returns false if the payload is too large.
    #[instrument(level = "trace", skip(self, frame), fields(bytes = frame.len()))]
    pub fn insert(&mut self, hash: &str, frame: Frame) -> bool {
        if frame.payload.len() > self.max_packet_bytes || frame.len() > self.max_total_bytes {
            return false;
        }

        self.cleanup_expired();
        if let Some(old) = self.entries.remove(hash) {
            self.total_bytes -= old.frame.len();
            self.insertion_order.retain(|k| k != hash);
        }

        while self.total_bytes + frame.len() > self.max_total_bytes {
            if !self.remove_oldest() {
                break;
            }
        }

        self.total_bytes += frame.len();
        self.entries.insert(
            hash.to_string(),
            CacheEntry {
                added_at: Instant::now(),
                frame,
            },
        );
        self.insertion_order.push_back(hash.to_string());
        true
    }

    pub fn get(&mut self, hash: &str) -> Option<Frame> {
        self.cleanup_expired();
        self.entries.get(hash).map(|e| e.frame.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        self.total_bytes = 0;
    }

    /// Entries are appended in time order, so expiry only inspects the front
    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let mut removed = 0usize;
        while let Some(key) = self.insertion_order.front() {
            let expired = self
                .entries
                .get(key)
                .map_or(true, |e| now.duration_since(e.added_at) >= self.ttl);
            if !expired {
                break;
            }
            if self.remove_oldest() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Pruned expired sent-packet cache entries");
        }
    }

    fn remove_oldest(&mut self) -> bool {
        match self.insertion_order.pop_front() {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    self.total_bytes -= entry.frame.len();
                }
                true
            }
            None => false,
        }
    }
}
