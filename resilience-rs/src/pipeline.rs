//! Ordered composition of per-attempt stages.
//!
//! A [`Pipeline`] holds stages outermost first and folds them right-to-left
//! around a terminal call, yielding a single [`BoxedCall`] that can be handed
//! to [`ResiliencePolicy::execute`](crate::policy::ResiliencePolicy::execute).

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::types::Result;

/// A callable chain: one invocation per attempt.
pub type BoxedCall<'a, T> =
    Box<dyn FnMut(CancellationToken) -> BoxFuture<'a, Result<T>> + Send + 'a>;

/// One link of the chain. Implementations decorate `next` and must invoke it
/// at most once per call they receive.
pub trait Stage<T>: Send + Sync {
    fn wrap<'a>(&'a self, next: BoxedCall<'a, T>) -> BoxedCall<'a, T>
    where
        T: 'a;
}

pub struct Pipeline<'a, T> {
    stages: Vec<&'a dyn Stage<T>>,
}

impl<'a, T: 'a> Default for Pipeline<'a, T> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<'a, T: Send + 'a> Pipeline<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage inside the ones already added.
    pub fn stage(mut self, stage: &'a dyn Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn build<F, Fut>(self, mut terminal: F) -> BoxedCall<'a, T>
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        let innermost: BoxedCall<'a, T> = Box::new(move |token| terminal(token).boxed());
        self.stages
            .into_iter()
            .rev()
            .fold(innermost, |next, stage| stage.wrap(next))
    }
}
