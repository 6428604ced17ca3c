//! # Polling Primitive
//!
//! Bounded, cancellable repetition used by step functions to wait for cloud
//! state (cluster ACTIVE, instances running, nodegroup gone) and to retry
//! transient cloud errors.
//!
//! A poll function returns [`LoopState::Continue`] to keep waiting,
//! [`LoopState::EndLoop`] to stop with success, or an error to stop with
//! failure. Context cancellation and deadline expiry surface as their own
//! [`LoopError`] variants so callers can tell a timeout from a hard failure
//! and salvage partial progress.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{ContextError, OpContext};

/// Outcome of one poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Continue,
    EndLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOptions {
    pub interval: Duration,
    /// Stop with `AttemptsExhausted` after this many invocations
    pub max_attempts: Option<u32>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            max_attempts: None,
        }
    }
}

impl LoopOptions {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError<E> {
    #[error("polling deadline exceeded")]
    DeadlineExceeded,

    #[error("polling cancelled")]
    Cancelled,

    #[error("polling gave up after {0} attempts")]
    AttemptsExhausted(u32),

    #[error("polling aborted: {0}")]
    Aborted(E),
}

impl<E> LoopError<E> {
    /// True when the loop stopped because time ran out rather than on an error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::AttemptsExhausted(_))
    }
}

impl<E> From<ContextError> for LoopError<E> {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Invoke `f` immediately, then every `opts.interval`, until it ends the
/// loop, fails, or the context is done
///
/// An in-flight invocation is abandoned as soon as the context is done.
pub async fn loop_do_func<F, Fut, E>(
    ctx: &OpContext,
    mut f: F,
    opts: LoopOptions,
) -> Result<(), LoopError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoopState, E>>,
{
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let state = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            result = f() => result.map_err(LoopError::Aborted)?,
        };

        if state == LoopState::EndLoop {
            debug!(attempts, "Polling loop finished");
            return Ok(());
        }

        if let Some(max) = opts.max_attempts {
            if attempts >= max {
                warn!(attempts, "Polling loop exhausted its attempts");
                return Err(LoopError::AttemptsExhausted(attempts));
            }
        }

        tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            _ = tokio::time::sleep(opts.interval) => {}
        }
    }
}

/// Run `f` up to `attempts` times with a fixed `delay`, retrying only errors
/// accepted by `is_retryable`
pub async fn retry_fixed<F, Fut, T, E, R>(
    ctx: &OpContext,
    attempts: u32,
    delay: Duration,
    mut f: F,
    is_retryable: R,
) -> Result<T, LoopError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            result = f() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                warn!(attempt, attempts, error = %e, "Retrying transient failure");
                tokio::select! {
                    biased;
                    err = ctx.done() => return Err(err.into()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(LoopError::Aborted(e)),
        }
    }
}
