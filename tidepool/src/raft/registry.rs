//! Correlation of in-flight proposals with their callers.
//!
//! The node that accepts a proposal registers the caller's stream under
//! `(term, sequence)` and replicates that key with the entry. When the entry
//! is applied, the key finds the caller again:
//!
//! ```text
//!  propose ──register(term 5)──> (5, 1) ──> RaftProposal { term: 5, seq: 1 }
//!                                  │                   │
//!                                  │              replicated, applied
//!                                  │                   │
//!                                  └──── remove(5, 1) <┘ deliver output
//! ```
//!
//! Sequence numbers are minted per term, starting at 1. Entries leave the
//! registry when delivered, when the caller gives up (see
//! [`Registration`]), or when an entry of a newer term is applied
//! ([`StreamRegistry::prune_stale`]). Leadership changes alone never prune:
//! an entry proposed in term T can still be applied after the leader moved,
//! and its caller must still get the answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::RsmError;
use crate::stream::WriteStream;
use crate::types::{ProposalOutput, SequenceNum, Term};

type Stream = Arc<dyn WriteStream<ProposalOutput>>;

#[derive(Default)]
struct RegistryState {
    counters: BTreeMap<Term, SequenceNum>,
    streams: BTreeMap<(Term, SequenceNum), Stream>,
}

/// Pending proposal streams keyed by `(term, sequence)`.
#[derive(Default)]
pub struct StreamRegistry {
    state: Mutex<RegistryState>,
}

impl StreamRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stream` under the next sequence number of `term`.
    pub fn register(&self, term: Term, stream: Stream) -> (Term, SequenceNum) {
        let mut state = self.state.lock();
        let counter = state.counters.entry(term).or_insert(SequenceNum::ZERO);
        *counter = counter.next();
        let key = (term, *counter);
        state.streams.insert(key, stream);
        key
    }

    /// Like [`register`](Self::register), removing the entry again when the
    /// returned guard drops.
    pub fn register_guarded(&self, term: Term, stream: Stream) -> Registration<'_> {
        let (term, sequence_num) = self.register(term, stream);
        Registration {
            registry: self,
            term,
            sequence_num,
            armed: true,
        }
    }

    /// The stream registered under `(term, sequence_num)`.
    pub fn get(&self, term: Term, sequence_num: SequenceNum) -> Option<Stream> {
        self.state.lock().streams.get(&(term, sequence_num)).cloned()
    }

    /// Remove and return the stream registered under `(term, sequence_num)`.
    pub fn remove(&self, term: Term, sequence_num: SequenceNum) -> Option<Stream> {
        self.state.lock().streams.remove(&(term, sequence_num))
    }

    /// Number of pending streams.
    pub fn len(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail and drop every entry registered under a term older than `term`.
    ///
    /// Returns the number of entries pruned.
    pub fn prune_stale(&self, term: Term) -> usize {
        let stale = {
            let mut state = self.state.lock();
            let current = state.counters.split_off(&term);
            state.counters = current;
            let current = state.streams.split_off(&(term, SequenceNum::ZERO));
            std::mem::replace(&mut state.streams, current)
        };
        for ((stale_term, sequence_num), stream) in &stale {
            debug!(term = %stale_term, sequence = %sequence_num, "pruning stale proposal");
            stream.error(RsmError::unavailable(format!(
                "{} was superseded by {}",
                stale_term, term
            )));
        }
        stale.len()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StreamRegistry")
            .field("pending", &state.streams.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A registration that is removed when dropped, unless kept.
///
/// Held by the proposer for the duration of the submission, so a failed,
/// timed-out or canceled proposal never leaves its stream behind. Once the
/// engine accepted the entry, [`keep`](Self::keep) leaves the stream for the
/// apply path.
pub struct Registration<'a> {
    registry: &'a StreamRegistry,
    term: Term,
    sequence_num: SequenceNum,
    armed: bool,
}

impl Registration<'_> {
    /// Term of the registration.
    pub fn term(&self) -> Term {
        self.term
    }

    /// Sequence number within the term.
    pub fn sequence_num(&self) -> SequenceNum {
        self.sequence_num
    }

    /// Leave the stream registered; it is removed by the apply of its entry
    /// or pruned by a newer term.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.registry.remove(self.term, self.sequence_num).is_some() {
            debug!(term = %self.term, sequence = %self.sequence_num, "reclaimed registration");
        }
    }
}
