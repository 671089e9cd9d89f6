//! Background worker threads and one-shot promises.
//!
//! The detector hands feature vectors to a [`Worker`] running the inference session and keeps the
//! returned [`PromiseHandle`]s around, polling them once per frame. Dropping the handles is how
//! in-flight results are discarded when the detector is torn down.

use std::{
    io,
    panic::resume_unwind,
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};

/// Creates a connected pair of [`Promise`] and [`PromiseHandle`].
pub fn promise<T>() -> (Promise<T>, PromiseHandle<T>) {
    // Capacity of 1 means that `Promise::fulfill` will never block.
    let (sender, recv) = crossbeam::channel::bounded(1);
    let alive = Arc::new(());
    (
        Promise {
            inner: sender,
            handle: Arc::downgrade(&alive),
        },
        PromiseHandle {
            recv,
            _alive: alive,
        },
    )
}

/// An empty slot that can be filled with a `T`, fulfilling the promise.
///
/// Fulfilling a [`Promise`] lets the connected [`PromiseHandle`] retrieve the value.
pub struct Promise<T> {
    inner: Sender<T>,
    handle: Weak<()>,
}

impl<T> Promise<T> {
    /// Fulfills the promise with a value, consuming it.
    ///
    /// This method does not block or fail. If the connected [`PromiseHandle`] was dropped, `value`
    /// will be dropped and nothing happens.
    pub fn fulfill(self, value: T) {
        self.inner.send(value).ok();
    }

    /// Returns whether the connected [`PromiseHandle`] still exists.
    ///
    /// Workers can check this to skip work whose result nobody is waiting for anymore.
    pub fn is_wanted(&self) -> bool {
        // The handle holds the only strong reference.
        self.handle.strong_count() > 0
    }
}

/// A handle connected to a [`Promise`] that will eventually resolve to a value of type `T`.
pub struct PromiseHandle<T> {
    recv: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> PromiseHandle<T> {
    /// Blocks the calling thread until the [`Promise`] is fulfilled.
    pub fn block(self) -> Result<T, PromiseDropped> {
        self.recv.recv().map_err(|_| PromiseDropped { _priv: () })
    }

    /// Takes the value out of the promise if it has been fulfilled, without blocking.
    ///
    /// Returns `Ok(None)` while the [`Promise`] is still pending. Once a value was taken, the
    /// handle reports the promise as dropped.
    pub fn try_take(&self) -> Result<Option<T>, PromiseDropped> {
        match self.recv.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PromiseDropped { _priv: () }),
        }
    }
}

/// An error indicating that the connected [`Promise`] object was dropped without being fulfilled.
#[derive(Debug, Clone, Copy)]
pub struct PromiseDropped {
    _priv: (),
}

/// A builder object that can be used to configure and spawn a [`Worker`].
#[derive(Clone)]
pub struct WorkerBuilder {
    name: Option<String>,
    capacity: usize,
}

impl WorkerBuilder {
    /// Sets the name of the [`Worker`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the channel capacity of the [`Worker`].
    ///
    /// By default, a capacity of 0 is used, which means that [`Worker::send`] will block until the
    /// worker has finished processing any preceding message.
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    /// Spawns a [`Worker`] thread that uses `handler` to process incoming messages.
    pub fn spawn<I, F>(self, mut handler: F) -> io::Result<Worker<I>>
    where
        I: Send + 'static,
        F: FnMut(I) + Send + 'static,
    {
        let (sender, recv) = crossbeam::channel::bounded(self.capacity);
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let name = self.name.unwrap_or_else(|| String::from("<unnamed>"));
        let handle = builder.spawn(move || {
            log::trace!("worker '{name}' starting");
            let _guard = ExitLog(&name);
            for message in recv {
                handler(message);
            }
        })?;

        Ok(Worker {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

struct ExitLog<'a>(&'a str);

impl Drop for ExitLog<'_> {
    fn drop(&mut self) {
        log::trace!("worker '{}' exiting", self.0);
    }
}

/// A handle to a worker thread that processes messages of type `I`.
///
/// When dropped, the channel to the thread will be dropped and the thread will be joined. If the
/// thread has panicked, the panic will be forwarded to the thread dropping the `Worker`.
pub struct Worker<I: Send + 'static> {
    sender: Option<Sender<I>>,
    handle: Option<JoinHandle<()>>,
}

impl<I: Send + 'static> Drop for Worker<I> {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        self.wait_for_exit();
    }
}

impl Worker<()> {
    /// Returns a builder that can be used to configure and spawn a [`Worker`].
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder {
            name: None,
            capacity: 0,
        }
    }
}

impl<I: Send + 'static> Worker<I> {
    fn wait_for_exit(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }

    /// Sends a message to the worker thread if its channel has room, without blocking.
    ///
    /// Returns the message back if the channel is full or the worker has exited. If the worker
    /// has panicked, this will propagate the panic to the calling thread.
    pub fn try_send(&mut self, msg: I) -> Result<(), I> {
        let Some(sender) = &self.sender else {
            return Err(msg);
        };
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(msg),
            Err(TrySendError::Disconnected(msg)) => {
                self.wait_for_exit();
                Err(msg)
            }
        }
    }

    /// Closes the worker's channel and lets the thread finish on its own.
    ///
    /// Unlike dropping the [`Worker`], this does not wait for the message currently being
    /// processed. A panic of the detached thread is not propagated.
    pub fn detach(mut self) {
        drop(self.sender.take());
        drop(self.handle.take());
    }

    /// Sends a message to the worker thread.
    ///
    /// This will block until the thread is available to accept the message.
    ///
    /// If the worker has panicked, this will propagate the panic to the calling thread.
    pub fn send(&mut self, msg: I) {
        let sent = match &self.sender {
            Some(sender) => sender.send(msg).is_ok(),
            None => false,
        };
        if !sent {
            self.wait_for_exit();
        }
    }
}
