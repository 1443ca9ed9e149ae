//! Scripted stage doubles
//!
//! A [`ScriptedStage`] answers each call from a queue of [`Reply`] values and
//! falls back to a default once the queue is drained. It counts calls and
//! records every input it was given.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::workflow::{StageContract, StageError};

/// What a scripted stage does on one call
#[derive(Debug, Clone)]
pub enum Reply<O> {
    Succeed(O),
    Fail(StageError),
    /// Panic with the given message
    Panic(String),
    /// Never complete; only a stage timeout ends the attempt
    Hang,
    /// Succeed after sleeping
    SucceedAfter(Duration, O),
}

impl<O> Reply<O> {
    async fn resolve(self) -> Result<O, StageError> {
        match self {
            Reply::Succeed(output) => Ok(output),
            Reply::Fail(err) => Err(err),
            Reply::Panic(message) => panic!("{message}"),
            Reply::Hang => std::future::pending().await,
            Reply::SucceedAfter(delay, output) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
        }
    }
}

pub struct ScriptedStage<I, O> {
    queue: Mutex<VecDeque<Reply<O>>>,
    default: Reply<O>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<I>>,
}

impl<I: Clone, O: Clone> ScriptedStage<I, O> {
    /// Stage that answers every call with `default`
    pub fn new(default: Reply<O>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(output: O) -> Self {
        Self::new(Reply::Succeed(output))
    }

    pub fn failing(err: StageError) -> Self {
        Self::new(Reply::Fail(err))
    }

    /// Queue a reply used before the default
    pub fn then(self, reply: Reply<O>) -> Self {
        self.push(reply);
        self
    }

    pub fn push(&self, reply: Reply<O>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<I> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self) -> Reply<O> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl<I, O> StageContract for ScriptedStage<I, O>
where
    I: Clone + Send + Sync,
    O: Clone + Send + Sync,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, input: &I) -> Result<O, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.clone());

        let reply = self.next_reply();
        reply.resolve().await
    }
}
