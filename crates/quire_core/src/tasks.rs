//! Sequential finish-up queue.
//!
//! Work queued at the end of a build (copying images, writing indices) runs in
//! insertion order when the queue is joined. A build must not report success
//! before [`SerialTasks::join`] has returned `Ok`.

/// A boxed unit of finish-up work.
type Task<E> = Box<dyn FnOnce() -> Result<(), E> + Send>;

/// Tasks executed one after another on [`join`](SerialTasks::join).
pub struct SerialTasks<E> {
    queue: Vec<(String, Task<E>)>,
}

impl<E> Default for SerialTasks<E> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<E> SerialTasks<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a named task. The name is only used for diagnostics.
    pub fn add_task<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        self.queue.push((name.into(), Box::new(task)));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Names of the tasks still waiting, in execution order.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(|(name, _)| name.as_str())
    }

    /// Run every queued task in order.
    ///
    /// Stops at the first failing task; the tasks after it are dropped without
    /// running. The queue is empty afterwards either way.
    pub fn join(&mut self) -> Result<(), E> {
        for (_, task) in std::mem::take(&mut self.queue) {
            task()?;
        }
        Ok(())
    }
}
