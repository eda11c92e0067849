//! Queued units of LLM work.
//!
//! The work queue holds entries of many different result types. Each entry is
//! boxed behind the non-generic [`QueuedTask`] trait: it closes over its own
//! typed transform and completion channel, so the queue and the workers only
//! ever hand it a raw reply (or an error) and never need to know `T`.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TaskError;

/// Object-safe view of a queued entry.
///
/// `resolve` and `reject` consume the entry, so an entry can complete its
/// handle at most once. Dropping an entry without calling either completes
/// the handle with [`TaskError::Abandoned`].
pub trait QueuedTask: Send {
    /// Prompt sent to the LLM.
    fn prompt(&self) -> &str;

    /// Optional sampling temperature.
    fn temperature(&self) -> Option<f64>;

    /// Human-readable label used in logs.
    fn description(&self) -> &str;

    /// Applies the transform to the raw reply and completes the handle.
    ///
    /// A panicking transform completes the handle with
    /// [`TaskError::TransformPanicked`] instead of unwinding into the caller.
    fn resolve(self: Box<Self>, raw: String);

    /// Completes the handle with an error.
    fn reject(self: Box<Self>, error: TaskError);
}

/// A typed task entry: prompt, optional temperature, transform and promise.
pub struct TaskEntry<T, F> {
    prompt: String,
    temperature: Option<f64>,
    description: String,
    transform: F,
    sender: oneshot::Sender<Result<T, TaskError>>,
}

impl<T, F> TaskEntry<T, F>
where
    T: Send + 'static,
    F: FnOnce(String) -> T + Send + 'static,
{
    /// Creates an entry and the handle its result will be delivered to.
    pub fn new(
        prompt: impl Into<String>,
        temperature: Option<f64>,
        transform: F,
        description: impl Into<String>,
    ) -> (Self, TaskHandle<T>) {
        let (sender, receiver) = oneshot::channel();
        let description = description.into();
        let entry = Self {
            prompt: prompt.into(),
            temperature,
            description: description.clone(),
            transform,
            sender,
        };
        (
            entry,
            TaskHandle {
                receiver,
                description,
            },
        )
    }
}

impl<T, F> QueuedTask for TaskEntry<T, F>
where
    T: Send + 'static,
    F: FnOnce(String) -> T + Send + 'static,
{
    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn resolve(self: Box<Self>, raw: String) {
        let Self {
            description,
            transform,
            sender,
            ..
        } = *self;

        let outcome = catch_unwind(AssertUnwindSafe(move || transform(raw))).map_err(|payload| {
            let reason = panic_message(payload.as_ref());
            tracing::error!(description = %description, reason = %reason, "Result transform panicked");
            TaskError::TransformPanicked {
                description,
                reason,
            }
        });
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = sender.send(outcome);
    }

    fn reject(self: Box<Self>, error: TaskError) {
        let _ = self.sender.send(Err(error));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Future side of a submitted task.
///
/// Resolves exactly once: with the transformed reply, with the permanent
/// error that ended the task, or with [`TaskError::Abandoned`] if the entry
/// was dropped without being processed.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<Result<T, TaskError>>,
    description: String,
}

impl<T> TaskHandle<T> {
    /// Human-readable label of the submitted task.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(TaskError::Abandoned(this.description.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
