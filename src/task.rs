//! Task abstraction and composition utilities
//!
//! A [`Task`] is a unit of work taking an input and producing an output.
//! Tasks compose: [`Pipe`] chains two tasks, [`ForEach`] maps one over a
//! collection, [`Consumer`] runs a side effect and passes its input on, and
//! [`RetryTask`] wraps any task in a retry policy.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, Result, TaskError};
use crate::retry::{Retry, RetryTask};

/// A unit of work from `I` to `O`
///
/// Tasks are shared across tokio tasks, so implementations must be
/// `Send + Sync`.
#[async_trait]
pub trait Task<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Perform the work on `input`
    async fn execute(&self, input: I) -> Result<O>;

    /// Name used in logs and error messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<T, I, O> Task<I, O> for Arc<T>
where
    T: Task<I, O> + ?Sized,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O> {
        (**self).execute(input).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Two tasks run back to back, the output of the first feeding the second
///
/// A failure of the first task short-circuits the chain.
pub struct Pipe<A, B, M> {
    first: A,
    second: B,
    name: String,
    _intermediate: PhantomData<fn() -> M>,
}

impl<A, B, M> Pipe<A, B, M> {
    /// Chain `first` into `second`
    pub fn new<I, O>(first: A, second: B) -> Self
    where
        A: Task<I, M>,
        B: Task<M, O>,
        I: Send + 'static,
        M: Send + 'static,
        O: Send + 'static,
    {
        let name = format!("{} | {}", first.name(), second.name());
        Self {
            first,
            second,
            name,
            _intermediate: PhantomData,
        }
    }
}

#[async_trait]
impl<A, B, I, M, O> Task<I, O> for Pipe<A, B, M>
where
    A: Task<I, M>,
    B: Task<M, O>,
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O> {
        let intermediate = self.first.execute(input).await?;
        self.second.execute(intermediate).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An element-wise task applied to every item of a `Vec`, in order
///
/// Each element gets its own result; one failure does not stop the rest.
pub struct ForEach<T> {
    inner: T,
}

impl<T> ForEach<T> {
    /// Apply `inner` to each element
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T, I, O> Task<Vec<I>, Vec<Result<O>>> for ForEach<T>
where
    T: Task<I, O>,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, inputs: Vec<I>) -> Result<Vec<Result<O>>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            outputs.push(self.inner.execute(input).await);
        }
        Ok(outputs)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// A side effect on the input, which is then passed through unchanged
pub struct Consumer<F> {
    name: String,
    accept: F,
}

impl<F> Consumer<F> {
    /// Run `accept` on every input
    pub fn new(name: impl Into<String>, accept: F) -> Self {
        Self {
            name: name.into(),
            accept,
        }
    }
}

#[async_trait]
impl<F, I> Task<I, I> for Consumer<F>
where
    F: Fn(&I) -> Result<()> + Send + Sync,
    I: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<I> {
        (self.accept)(&input)?;
        Ok(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A task backed by an async closure; see [`task_fn`]
pub struct FnTask<F> {
    name: String,
    f: F,
}

/// Adapt an async closure into a named [`Task`]
///
/// Errors returned by the closure are wrapped in [`TaskError`] carrying
/// `name`.
pub fn task_fn<F>(name: impl Into<String>, f: F) -> FnTask<F> {
    FnTask {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut, I, O, E> Task<I, O> for FnTask<F>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O> {
        (self.f)(input)
            .await
            .map_err(|e| TaskError::new(self.name.clone(), e).into())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Combinators available on every [`Task`]
pub trait TaskExt<I, O>: Task<I, O> + Sized
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Feed this task's output into `next`
    fn pipe<B, P>(self, next: B) -> Pipe<Self, B, O>
    where
        B: Task<O, P>,
        P: Send + 'static,
    {
        Pipe::new::<I, P>(self, next)
    }

    /// Apply this task to every element of a `Vec`
    fn for_each(self) -> ForEach<Self> {
        ForEach::new(self)
    }

    /// Retry this task under `retry`, observing `cancel` between attempts
    fn retrying(self, retry: Retry, cancel: CancellationToken) -> RetryTask<Self> {
        RetryTask::new(self, retry, cancel)
    }
}

impl<T, I, O> TaskExt<I, O> for T
where
    T: Task<I, O>,
    I: Send + 'static,
    O: Send + 'static,
{
}
