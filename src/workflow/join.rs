//! Parallel join of independent stages
//!
//! All tasks start together and the join waits for every one of them to
//! settle. A failing or panicking task never cancels its siblings, and the
//! result always holds exactly one entry per task.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::debug;

use super::retry::{panic_message, Attempted, RetryPolicy};
use super::stage::{StageContract, StageError};
use super::StageName;

/// A named unit of work for [`join`]
pub struct JoinTask<'a, T> {
    name: StageName,
    future: BoxFuture<'a, Attempted<T>>,
}

impl<'a, T: Send + 'a> JoinTask<'a, T> {
    pub fn new<F>(name: StageName, future: F) -> Self
    where
        F: Future<Output = Attempted<T>> + Send + 'a,
    {
        Self {
            name,
            future: future.boxed(),
        }
    }

    /// Build a task that runs `stage` on `input` through the retry policy
    pub fn stage<S>(
        name: StageName,
        stage: &'a S,
        input: &'a S::Input,
        policy: &'a RetryPolicy,
    ) -> Self
    where
        S: StageContract + ?Sized,
        S::Output: Into<T>,
    {
        Self::new(name, async move { policy.invoke(stage, input).await.map(Into::into) })
    }

    pub fn name(&self) -> StageName {
        self.name
    }
}

/// Settled results of a join, in task order. Names are unique.
#[derive(Debug)]
pub struct JoinResults<T> {
    entries: Vec<(StageName, Attempted<T>)>,
}

impl<T> Default for JoinResults<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> JoinResults<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: StageName) -> Option<&Attempted<T>> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, attempted)| attempted)
    }

    /// Remove and return the result for `name`
    pub fn take(&mut self, name: StageName) -> Option<Attempted<T>> {
        let index = self.entries.iter().position(|(entry, _)| *entry == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn names(&self) -> impl Iterator<Item = StageName> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageName, &Attempted<T>)> {
        self.entries.iter().map(|(name, attempted)| (*name, attempted))
    }

    pub fn failed(&self) -> impl Iterator<Item = StageName> + '_ {
        self.entries
            .iter()
            .filter(|(_, attempted)| !attempted.is_success())
            .map(|(name, _)| *name)
    }
}

impl<T> IntoIterator for JoinResults<T> {
    type Item = (StageName, Attempted<T>);
    type IntoIter = std::vec::IntoIter<(StageName, Attempted<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Run every task concurrently and wait for all of them to settle.
///
/// A task that panics outside a stage boundary is reported as a contract
/// violation in its own slot; the other tasks still run to completion.
/// Two tasks with the same name are rejected before any task starts.
pub async fn join<'a, T: Send>(tasks: Vec<JoinTask<'a, T>>) -> Result<JoinResults<T>, StageError> {
    let mut seen = HashSet::new();
    if let Some(duplicate) = tasks.iter().map(JoinTask::name).find(|name| !seen.insert(*name)) {
        return Err(StageError::contract_violation(format!(
            "{duplicate} joined more than once"
        )));
    }

    let (names, futures): (Vec<_>, Vec<_>) = tasks
        .into_iter()
        .map(|task| (task.name, AssertUnwindSafe(task.future).catch_unwind()))
        .unzip();

    debug!("Joining {} concurrent stages", names.len());

    let settled = join_all(futures).await;

    let entries = names
        .into_iter()
        .zip(settled)
        .map(|(name, outcome)| {
            let attempted = outcome.unwrap_or_else(|panic| {
                Attempted::new(
                    Err(StageError::contract_violation(format!(
                        "{name} task panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    1,
                )
            });
            (name, attempted)
        })
        .collect();

    Ok(JoinResults { entries })
}
