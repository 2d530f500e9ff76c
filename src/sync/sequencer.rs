//! Request sequencer
//!
//! Latest-request-wins for feed fetches. Tokens are strictly increasing
//! across the whole session; a result is committed only if its token is
//! still the newest one issued for its feed. Identical fetches within the
//! debounce window are skipped rather than reissued.

use crate::model::FeedKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Attempt {
    fingerprint: String,
    at_millis: u64,
}

#[derive(Default)]
struct SequencerState {
    issued: u64,
    latest: HashMap<FeedKey, RequestToken>,
    last_attempt: HashMap<FeedKey, Attempt>,
}

pub struct RequestSequencer {
    debounce: Duration,
    state: Mutex<SequencerState>,
}

impl RequestSequencer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: Mutex::new(SequencerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue the next token and make it the current one for `key`
    pub fn begin_request(&self, key: FeedKey) -> RequestToken {
        let mut state = self.lock();
        state.issued += 1;
        let token = RequestToken(state.issued);
        state.latest.insert(key, token);
        token
    }

    /// Whether no newer request has started for `key`
    pub fn is_current(&self, key: FeedKey, token: RequestToken) -> bool {
        self.lock().latest.get(&key) == Some(&token)
    }

    /// Whether the most recent token issued anywhere is `token`
    pub fn is_latest(&self, token: RequestToken) -> bool {
        self.lock().issued == token.0
    }

    /// Record a fetch attempt, or report that an identical one is too recent.
    ///
    /// `fingerprint` identifies the request beyond the feed key (filters,
    /// offset); a different fingerprint is never debounced.
    pub fn should_debounce(&self, key: FeedKey, fingerprint: &str, now_millis: u64) -> bool {
        let mut state = self.lock();
        if let Some(last) = state.last_attempt.get(&key) {
            let elapsed = Duration::from_millis(now_millis.saturating_sub(last.at_millis));
            if last.fingerprint == fingerprint && elapsed < self.debounce {
                return true;
            }
        }
        state.last_attempt.insert(
            key,
            Attempt {
                fingerprint: fingerprint.to_string(),
                at_millis: now_millis,
            },
        );
        false
    }

    /// Forget the debounce record so the next fetch for `key` goes out
    pub fn clear_debounce(&self, key: FeedKey) {
        self.lock().last_attempt.remove(&key);
    }

    /// Invalidate every outstanding token; the counter keeps increasing
    pub fn reset(&self) {
        let mut state = self.lock();
        state.latest.clear();
        state.last_attempt.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_request_supersedes_older() {
        let seq = RequestSequencer::new(Duration::from_millis(500));
        let a = seq.begin_request(FeedKey::HOME_ALL);
        let b = seq.begin_request(FeedKey::HOME_ALL);

        assert!(b > a);
        assert!(!seq.is_current(FeedKey::HOME_ALL, a));
        assert!(seq.is_current(FeedKey::HOME_ALL, b));
    }

    #[test]
    fn test_tokens_are_scoped_per_feed() {
        let seq = RequestSequencer::new(Duration::from_millis(500));
        let home = seq.begin_request(FeedKey::HOME_ALL);
        let poster = seq.begin_request(FeedKey::POSTER);

        assert!(seq.is_current(FeedKey::HOME_ALL, home));
        assert!(seq.is_current(FeedKey::POSTER, poster));
        assert!(!seq.is_latest(home));
    }

    #[test]
    fn test_identical_fetch_within_window_is_debounced() {
        let seq = RequestSequencer::new(Duration::from_millis(500));

        assert!(!seq.should_debounce(FeedKey::HOME_ALL, "offset=0", 1_000));
        assert!(seq.should_debounce(FeedKey::HOME_ALL, "offset=0", 1_300));
        assert!(!seq.should_debounce(FeedKey::HOME_ALL, "offset=20", 1_350));
        assert!(!seq.should_debounce(FeedKey::HOME_ALL, "offset=20", 1_900));
    }

    #[test]
    fn test_reset_discards_outstanding_tokens() {
        let seq = RequestSequencer::new(Duration::from_millis(500));
        let token = seq.begin_request(FeedKey::POSTER);
        seq.reset();

        assert!(!seq.is_current(FeedKey::POSTER, token));
        assert!(seq.begin_request(FeedKey::POSTER) > token);
    }
}
