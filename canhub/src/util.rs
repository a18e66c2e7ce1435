use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};

/// Await a fallible task body and log its error instead of propagating it.
pub async fn catch_error<Fut, E>(what: &str, future: Fut)
where
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display + fmt::Debug,
{
    if let Err(e) = future.await {
        log::error!("{} failed: {}", what, e);
        log::debug!("Details: {:?}", e)
    }
}

/// Join handle that aborts its task when dropped.
pub struct AbortOnDrop<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> AbortOnDrop<T> {
        AbortOnDrop {
            handle: Some(handle),
        }
    }

    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.handle {
            Some(ref mut handle) => Pin::new(handle).poll(cx),
            None => panic!("AbortOnDrop polled after its task was taken"),
        }
    }
}
