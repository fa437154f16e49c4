use std::sync::{Condvar, Mutex, MutexGuard};

/// A stack of jobs shared between worker threads.  Workers block in
/// [`JobStack::handle_many_jobs()`] until either a job is available or every
/// job (including those that may be pushed by jobs still running) is done.
#[derive(Debug)]
pub(crate) struct JobStack<T> {
    data: Mutex<JobStackData<T>>,
    cond: Condvar,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct JobStackData<T> {
    queue: Vec<T>,
    /// Number of jobs that are queued or being processed, plus the number of
    /// jobs promised via [`JobStack::expect_jobs()`] that have not yet been
    /// pushed
    jobs: usize,
    shutdown: bool,
}

impl<T> JobStack<T> {
    pub(crate) fn new<I: IntoIterator<Item = T>>(items: I) -> Self {
        let queue: Vec<T> = items.into_iter().collect();
        let jobs = queue.len();
        JobStack {
            data: Mutex::new(JobStackData {
                queue,
                jobs,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Promise that `n` more jobs will be pushed later, so that workers keep
    /// waiting while the queue is momentarily empty
    pub(crate) fn expect_jobs(&self, n: usize) {
        self.lock().jobs += n;
    }

    /// Pop & run jobs until there are none left or the stack is shut down.
    /// Each job returns the jobs it has made ready, which are pushed onto the
    /// stack, and the number of promised jobs they fulfil.  On error or
    /// panic, the stack is shut down.
    pub(crate) fn handle_many_jobs<F, I, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(T) -> Result<I, E>,
        I: IntoIterator<Item = T>,
    {
        let _guard = ShutdownOnPanic(self);
        while let Some(value) = self.pop() {
            match f(value) {
                Ok(iter) => {
                    self.fulfil(iter);
                    self.job_done();
                }
                Err(e) => {
                    self.job_done();
                    self.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        let mut data = self.lock();
        if !data.shutdown {
            log::trace!("[JobStack] Shutting down stack");
            data.queue.clear();
            data.shutdown = true;
            self.cond.notify_all();
        }
    }

    #[cfg(test)]
    fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    fn lock(&self) -> MutexGuard<'_, JobStackData<T>> {
        self.data
            .lock()
            .expect("Mutex should not have been poisoned")
    }

    fn pop(&self) -> Option<T> {
        let mut data = self.lock();
        loop {
            if data.jobs == 0 || data.shutdown {
                log::trace!("[JobStack] no jobs; returning None");
                return None;
            }
            if let value @ Some(_) = data.queue.pop() {
                return value;
            } else {
                log::trace!("[JobStack] queue is empty; waiting");
                data = self
                    .cond
                    .wait(data)
                    .expect("Mutex should not have been poisoned");
            }
        }
    }

    fn job_done(&self) {
        let mut data = self.lock();
        data.jobs = data.jobs.saturating_sub(1);
        log::trace!("[JobStack] Job count decremented to {}", data.jobs);
        if data.jobs == 0 {
            self.cond.notify_all();
        }
    }

    // Pushed jobs were already counted by `expect_jobs()`, so the count is
    // left alone here.
    fn fulfil<I: IntoIterator<Item = T>>(&self, iter: I) {
        let mut data = self.lock();
        if !data.shutdown {
            let prelen = data.queue.len();
            data.queue.extend(iter);
            if data.queue.len() > prelen {
                log::trace!(
                    "[JobStack] {} promised job(s) now ready",
                    data.queue.len() - prelen
                );
                self.cond.notify_all();
            }
        }
    }
}

/// Shuts down a stack when dropped during a panic, so that the other workers
/// stop waiting for jobs the panicking one would have pushed
struct ShutdownOnPanic<'a, T>(&'a JobStack<T>);

impl<T> Drop for ShutdownOnPanic<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_thread_chain() {
        // Job n makes job n-1 ready
        let stack = JobStack::new([3usize]);
        stack.expect_jobs(3);
        let mut seen = Vec::new();
        stack
            .handle_many_jobs(|n| {
                seen.push(n);
                Ok::<_, ()>(n.checked_sub(1))
            })
            .unwrap();
        assert_eq!(seen, [3, 2, 1, 0]);
    }

    #[test]
    fn test_error_shuts_down() {
        let stack = JobStack::new([1usize, 2, 3]);
        let r = stack.handle_many_jobs(|n| if n == 3 { Err(n) } else { Ok(None) });
        assert_eq!(r, Err(3));
        assert!(stack.is_shutdown());
        assert_eq!(stack.handle_many_jobs(|_| Ok::<_, ()>(None)), Ok(()));
    }

    #[test]
    fn test_workers_wait_for_promised_jobs() {
        let stack = JobStack::new([0usize, 1, 2, 3]);
        stack.expect_jobs(1);
        let pending = AtomicUsize::new(4);
        let ran = AtomicUsize::new(0);
        crossbeam_utils::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|_| {
                    stack
                        .handle_many_jobs(|n| {
                            ran.fetch_add(1, Ordering::SeqCst);
                            let last = pending.fetch_sub(1, Ordering::SeqCst) == 1;
                            Ok::<_, ()>((last && n < 100).then_some(100))
                        })
                        .unwrap();
                });
            }
        })
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panic_releases_waiting_workers() {
        let stack = JobStack::new([0usize]);
        stack.expect_jobs(1);
        let r = crossbeam_utils::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|_| {
                    stack.handle_many_jobs(|_| -> Result<Option<usize>, ()> {
                        panic!("job failed")
                    })
                });
            }
        });
        assert!(r.is_err());
        assert!(stack.is_shutdown());
    }
}
