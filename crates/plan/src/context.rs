//! Apply context and cancellation
//!
//! Every resource method and every runner call receives an [`ApplyContext`].
//! Long-running commands poll its [`CancelToken`] so an interrupted apply
//! stops promptly instead of waiting for the remote side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Cannot be undone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context threaded through query, apply and undo.
#[derive(Debug, Clone, Default)]
pub struct ApplyContext {
    cancel: CancelToken,
}

impl ApplyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that observes an existing token
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with "operation cancelled" once the token has fired
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("operation cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let ctx = ApplyContext::with_cancel(token.clone());
        let copy = ctx.clone();
        assert!(!copy.is_cancelled());
        assert!(ctx.check_cancelled().is_ok());

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(copy.is_cancelled());
        assert_eq!(ctx.check_cancelled().unwrap_err().to_string(), "operation cancelled");
    }
}
