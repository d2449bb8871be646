use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::kernels::{HostArg, HostKernel};
use super::{EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST, INVALID_COMMAND_QUEUE};

/// A failure inside a queue, error code plus message.
pub(crate) type Failure = (i32, String);

#[derive(Debug, Default)]
struct State {
    done: bool,
    error: Option<Failure>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

/// Completion flag of a single command, with the time it started and finished.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<State>,
    cond: Condvar,
}

impl Signal {
    fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.started = Some(Instant::now());
    }

    fn complete(&self, result: Result<(), Failure>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        state.started.get_or_insert(now);
        state.finished = Some(now);
        state.error = result.err();
        state.done = true;
        self.cond.notify_all();
    }

    /// Blocks until the command completed.
    pub(crate) fn wait(&self) -> Result<(), Failure> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.done {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &state.error {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    /// Blocks until the command completed and returns how long it was running.
    pub(crate) fn elapsed(&self) -> Result<Duration, Failure> {
        self.wait()?;
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (state.started, state.finished) {
            (Some(started), Some(finished)) => Ok(finished.duration_since(started)),
            _ => Ok(Duration::ZERO),
        }
    }
}

pub(crate) enum Command {
    Write {
        memory: Arc<RwLock<Vec<u8>>>,
        data: Vec<u8>,
        signal: Arc<Signal>,
    },
    Read {
        memory: Arc<RwLock<Vec<u8>>>,
        reply: Sender<Result<Vec<u8>, Failure>>,
    },
    Launch {
        kernel: HostKernel,
        global_size: usize,
        args: Vec<HostArg>,
        wait_list: Vec<Arc<Signal>>,
        signal: Arc<Signal>,
    },
    Wait(Arc<Signal>),
    Delay(Duration),
    Marker(Arc<Signal>),
}

/// An in-order command queue, backed by a single worker thread.
///
/// Once a command failed, every following command fails as well, the first failure is reported.
#[derive(Debug)]
pub struct Queue {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Queue {
    pub(crate) fn new(name: &str) -> Result<Self, Failure> {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || process(receiver))
            .map_err(|error| (INVALID_COMMAND_QUEUE, error.to_string()))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub(crate) fn submit(&self, command: Command) -> Result<(), Failure> {
        self.sender
            .as_ref()
            .and_then(|sender| sender.send(command).ok())
            .ok_or_else(|| {
                (
                    INVALID_COMMAND_QUEUE,
                    "The queue worker is not running.".to_string(),
                )
            })
    }

    /// Stalls the queue: commands submitted after this one start at the earliest after
    /// `duration`.
    ///
    /// It's used to simulate a slow producer when testing cross-queue dependencies.
    pub fn enqueue_delay(&self, duration: Duration) {
        if self.submit(Command::Delay(duration)).is_err() {
            warn!("Cannot delay a queue whose worker has stopped.");
        }
    }

    /// Blocks until every command submitted so far has completed.
    pub(crate) fn finish(&self) -> Result<(), Failure> {
        let signal = Arc::new(Signal::default());
        self.submit(Command::Marker(signal.clone()))?;
        signal.wait()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the remaining commands and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Host queue worker panicked.");
            }
        }
    }
}

fn process(receiver: Receiver<Command>) {
    let mut failure: Option<Failure> = None;
    for command in receiver {
        match command {
            Command::Write {
                memory,
                data,
                signal,
            } => {
                signal.start();
                if let Some(failure) = &failure {
                    signal.complete(Err(failure.clone()));
                    continue;
                }
                let mut memory = memory.write().unwrap_or_else(PoisonError::into_inner);
                memory[..data.len()].copy_from_slice(&data);
                signal.complete(Ok(()));
            }
            Command::Read { memory, reply } => {
                let result = match &failure {
                    Some(failure) => Err(failure.clone()),
                    None => Ok(memory
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone()),
                };
                // The reader might have given up already, there is nobody to report to then.
                let _ = reply.send(result);
            }
            Command::Launch {
                kernel,
                global_size,
                args,
                wait_list,
                signal,
            } => {
                if failure.is_none() {
                    failure = wait_all(&wait_list).err();
                }
                signal.start();
                if let Some(failure) = &failure {
                    signal.complete(Err(failure.clone()));
                    continue;
                }
                debug!(
                    "Running host kernel {} over {} work-items.",
                    kernel.name(),
                    global_size
                );
                let result = kernel.launch(global_size, &args);
                if let Err(error) = &result {
                    failure = Some(error.clone());
                }
                signal.complete(result);
            }
            Command::Wait(signal) => {
                if failure.is_none() {
                    failure = wait_all(&[signal]).err();
                }
            }
            Command::Delay(duration) => thread::sleep(duration),
            Command::Marker(signal) => match &failure {
                Some(failure) => signal.complete(Err(failure.clone())),
                None => signal.complete(Ok(())),
            },
        }
    }
}

fn wait_all(signals: &[Arc<Signal>]) -> Result<(), Failure> {
    for signal in signals {
        signal.wait().map_err(|(_, message)| {
            (
                EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                format!("A command this one depends on failed: {}", message),
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    use super::{Command, Queue, Signal};

    #[test]
    fn test_commands_run_in_order() {
        let queue = Queue::new("test-queue").unwrap();
        let memory = Arc::new(RwLock::new(vec![0u8; 4]));

        let first = Arc::new(Signal::default());
        queue.enqueue_delay(Duration::from_millis(50));
        queue
            .submit(Command::Write {
                memory: memory.clone(),
                data: vec![1, 1, 1, 1],
                signal: first.clone(),
            })
            .unwrap();
        let second = Arc::new(Signal::default());
        queue
            .submit(Command::Write {
                memory: memory.clone(),
                data: vec![2, 2],
                signal: second.clone(),
            })
            .unwrap();
        queue.finish().unwrap();

        assert!(first.wait().is_ok());
        assert!(second.wait().is_ok());
        assert_eq!(*memory.read().unwrap(), vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_read_blocks_until_previous_writes() {
        let queue = Queue::new("test-queue").unwrap();
        let memory = Arc::new(RwLock::new(vec![0u8; 2]));
        queue.enqueue_delay(Duration::from_millis(50));
        queue
            .submit(Command::Write {
                memory: memory.clone(),
                data: vec![7, 8],
                signal: Arc::new(Signal::default()),
            })
            .unwrap();

        let (reply, receiver) = std::sync::mpsc::channel();
        queue
            .submit(Command::Read {
                memory: memory.clone(),
                reply,
            })
            .unwrap();
        assert_eq!(receiver.recv().unwrap().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_signal_elapsed() {
        let signal = Signal::default();
        signal.start();
        std::thread::sleep(Duration::from_millis(5));
        signal.complete(Ok(()));
        assert!(signal.elapsed().unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_failed_dependency_fails_queue() {
        let producer = Arc::new(Signal::default());
        producer.complete(Err((-5, "boom".to_string())));

        let queue = Queue::new("test-queue").unwrap();
        queue.submit(Command::Wait(producer)).unwrap();
        let (code, message) = queue.finish().unwrap_err();
        assert_eq!(code, super::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert!(message.contains("boom"));
    }
}
