// shared fakes for the cache and backend tests
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::cache::token::Token;
use crate::config::backends::OAuth2Params;
use crate::errors::TokenError;
use crate::helpers::time::{Clock, ManualClock};
use crate::sources::TokenFetcher;

/// Token endpoint stand-in: counts calls, hands out `token-<n>` tokens
/// valid for an hour from the clock's "now".
#[derive(Clone)]
pub struct FakeFetcher {
    clock: ManualClock,
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    last_old_token: Arc<Mutex<Option<Token>>>,
}

impl FakeFetcher {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
            gate: None,
            last_old_token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetches block until [`FakeFetcher::open_gate`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_old_token(&self) -> Option<Token> {
        self.last_old_token.lock().unwrap().clone()
    }
}

impl TokenFetcher for FakeFetcher {
    async fn fetch_token(&self, params: &OAuth2Params, old_token: Option<&Token>) -> Result<Token, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_old_token.lock().unwrap() = old_token.cloned();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenError::fetch_failure(&params.backend, "token endpoint returned 503"));
        }
        Ok(Token::new(format!("token-{}", n), 3600, self.clock.now()))
    }
}
