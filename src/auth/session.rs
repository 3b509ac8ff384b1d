// Anti-forgery state for pending login attempts
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Nonces minted by `/login` and not yet redeemed by `/callback`.
///
/// Each login attempt gets its own entry, so concurrent attempts never
/// overwrite each other's nonce. A nonce is redeemable exactly once.
pub struct LoginStates {
    pending: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl LoginStates {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Generate random state for CSRF protection and remember it
    pub fn issue(&self) -> String {
        let mut random_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let state = URL_SAFE_NO_PAD.encode(random_bytes);

        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, expires| *expires > now);
        pending.insert(state.clone(), now + self.ttl);

        state
    }

    /// Redeem a presented state, returning the stored nonce if it was pending
    /// and unexpired. The entry is removed either way.
    pub fn consume(&self, state: &str) -> Option<String> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (stored, expires) = pending.remove_entry(state)?;
        (expires > Instant::now()).then_some(stored)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
