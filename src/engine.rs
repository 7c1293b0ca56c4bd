use anyhow::{anyhow, Result};
use log::{debug, error, info};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GridError, TransmissionError};
use crate::recorder::SessionRecorder;
use crate::session::{Clock, GridView, Outcome, SessionController};
use crate::sink::FrameSink;

enum Command {
    SetBrightness {
        row: usize,
        col: usize,
        value: u8,
        reply: Sender<Result<Outcome, GridError>>,
    },
    SetSessionActive {
        active: bool,
        reply: Sender<Outcome>,
    },
    Toggle {
        reply: Sender<Outcome>,
    },
    SendMatrix {
        reply: Sender<Result<(), TransmissionError>>,
    },
    View {
        reply: Sender<GridView>,
    },
    Shutdown {
        reply: Sender<Outcome>,
    },
}

/// Cloneable handle for talking to the engine thread.
///
/// Every call is a request/reply round trip, so edits, session changes and
/// ticks never interleave.
#[derive(Clone)]
pub struct EngineHandle {
    sender: Sender<Command>,
}

impl EngineHandle {
    pub fn set_brightness(&self, row: usize, col: usize, value: u8) -> Result<Result<Outcome, GridError>> {
        self.request(|reply| Command::SetBrightness {
            row,
            col,
            value,
            reply,
        })
    }

    pub fn set_session_active(&self, active: bool) -> Result<Outcome> {
        self.request(|reply| Command::SetSessionActive { active, reply })
    }

    pub fn toggle(&self) -> Result<Outcome> {
        self.request(|reply| Command::Toggle { reply })
    }

    pub fn send_matrix(&self) -> Result<Result<(), TransmissionError>> {
        self.request(|reply| Command::SendMatrix { reply })
    }

    pub fn view(&self) -> Result<GridView> {
        self.request(|reply| Command::View { reply })
    }

    /// End any active session, close the sink and stop the worker.
    pub fn shutdown(&self) -> Result<Outcome> {
        self.request(|reply| Command::Shutdown { reply })
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(build(reply))
            .map_err(|_| anyhow!("engine has stopped"))?;
        response
            .recv()
            .map_err(|_| anyhow!("engine stopped before replying"))
    }
}

/// Runs a [`SessionController`] on its own thread with a periodic tick.
pub struct Engine {
    handle: EngineHandle,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl Engine {
    pub fn start<S, R, C>(controller: SessionController<S, R, C>, tick_interval: Duration) -> Self
    where
        S: FrameSink + 'static,
        R: SessionRecorder + 'static,
        C: Clock + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Command>();

        let worker_handle = thread::spawn(move || {
            worker_thread(controller, receiver, tick_interval);
        });

        Engine {
            handle: EngineHandle { sender },
            worker_handle: Some(worker_handle),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the engine and wait for the worker thread
    pub fn stop(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            // Fails only if the worker already exited
            let _ = self.handle.shutdown();
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker thread function - serves commands and fires the tick between them.
/// Exits on shutdown or once every handle is gone.
fn worker_thread<S, R, C>(
    mut controller: SessionController<S, R, C>,
    receiver: Receiver<Command>,
    tick_interval: Duration,
) where
    S: FrameSink,
    R: SessionRecorder,
    C: Clock,
{
    let mut next_tick = Instant::now() + tick_interval;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());

        match receiver.recv_timeout(wait) {
            Ok(command) => {
                if !serve(&mut controller, command) {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_tick {
            let elapsed = controller.tick();
            if controller.is_active() {
                debug!("Running time: {}", elapsed);
            }
            next_tick += tick_interval;
            if next_tick < now {
                next_tick = now + tick_interval;
            }
        }
    }

    finish(&mut controller);
}

/// Apply one command. Returns `false` once the engine should stop.
fn serve<S, R, C>(controller: &mut SessionController<S, R, C>, command: Command) -> bool
where
    S: FrameSink,
    R: SessionRecorder,
    C: Clock,
{
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::SetBrightness {
            row,
            col,
            value,
            reply,
        } => {
            let _ = reply.send(controller.set_brightness(row, col, value));
        }
        Command::SetSessionActive { active, reply } => {
            let _ = reply.send(controller.set_session_active(active));
        }
        Command::Toggle { reply } => {
            let _ = reply.send(controller.toggle());
        }
        Command::SendMatrix { reply } => {
            let _ = reply.send(controller.send_matrix());
        }
        Command::View { reply } => {
            let _ = reply.send(controller.view());
        }
        Command::Shutdown { reply } => {
            let _ = reply.send(finish(controller));
            return false;
        }
    }
    true
}

/// Leave the device dark and the session saved.
fn finish<S, R, C>(controller: &mut SessionController<S, R, C>) -> Outcome
where
    S: FrameSink,
    R: SessionRecorder,
    C: Clock,
{
    let outcome = controller.turn_off();
    if outcome.summary.is_some() {
        info!("Active session closed on shutdown");
    }
    if let Some(e) = &outcome.transmission_error {
        error!("Final frame not delivered: {}", e);
    }
    controller.close_sink();
    outcome
}
