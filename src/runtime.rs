use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::machine::{MachineState, SessionMachine, SessionView};
use crate::model::SessionId;

/// Commands the interview screen can send to a running session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    ToggleRecording,
    SetCode(String),
    Advance,
    End,
    Abandon,
    RefreshBalance,
}

/// What a command produced, when it succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Started(SessionId),
    Recording(bool),
    Done,
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<Outcome>>,
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn every_second() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Cheap, cloneable front door to a session running in its own task.
/// Dropping every handle counts as leaving the interview screen.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Envelope>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> Result<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub async fn start(&self) -> Result<SessionId> {
        match self.send(Command::Start).await? {
            Outcome::Started(id) => Ok(id),
            _ => Err(SessionError::SessionClosed),
        }
    }

    pub async fn toggle_recording(&self) -> Result<bool> {
        match self.send(Command::ToggleRecording).await? {
            Outcome::Recording(on) => Ok(on),
            _ => Err(SessionError::SessionClosed),
        }
    }

    pub async fn set_code(&self, code: String) -> Result<()> {
        self.send(Command::SetCode(code)).await.map(|_| ())
    }

    pub async fn advance(&self) -> Result<()> {
        self.send(Command::Advance).await.map(|_| ())
    }

    pub async fn end(&self) -> Result<()> {
        self.send(Command::End).await.map(|_| ())
    }

    pub async fn abandon(&self) -> Result<()> {
        self.send(Command::Abandon).await.map(|_| ())
    }

    pub async fn refresh_balance(&self) -> Result<()> {
        self.send(Command::RefreshBalance).await.map(|_| ())
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Waits until the published view satisfies `pred`.
    pub async fn wait_for<F>(&self, mut pred: F) -> Result<SessionView>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(|v| pred(v))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(view.clone())
    }
}

/// Drives one session machine: commands, transcript chunks and the
/// countdown tick are processed one at a time on a single task.
pub struct SessionRunner<T: Ticker> {
    machine: SessionMachine,
    ticker: T,
}

impl<T: Ticker> SessionRunner<T> {
    pub fn new(machine: SessionMachine, ticker: T) -> Self {
        Self { machine, ticker }
    }

    /// Spawns the session task. The join handle yields the machine back
    /// once every handle is gone.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<SessionMachine>) {
        let (tx, rx) = mpsc::channel(32);
        let view = self.machine.subscribe();
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { tx, view }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Envelope>) -> SessionMachine {
        let mut transcripts = match self.machine.take_transcripts() {
            Some(rx) => rx,
            None => mpsc::unbounded_channel().1,
        };
        let _ = self.machine.refresh_balance().await;
        let period = self.ticker.interval();
        let mut clock: Option<Interval> = None;

        loop {
            // The clock only exists while the session is live.
            match (self.machine.state(), clock.is_some()) {
                (MachineState::Active, false) => {
                    let mut iv = interval_at(Instant::now() + period, period);
                    // Ticks missed while a command was awaited are made up at once.
                    iv.set_missed_tick_behavior(MissedTickBehavior::Burst);
                    clock = Some(iv);
                }
                (MachineState::Active, true) => {}
                (_, true) => {
                    debug!("session left Active, dropping clock");
                    clock = None;
                }
                (_, false) => {}
            }

            tokio::select! {
                biased;

                Some(chunk) = transcripts.recv() => {
                    self.machine.on_transcript(chunk);
                }
                envelope = commands.recv() => match envelope {
                    Some(Envelope { command, reply }) => {
                        let result = self.apply(command).await;
                        let _ = reply.send(result);
                    }
                    None => {
                        info!(state = %self.machine.state(), "interview screen closed");
                        self.machine.abandon().await;
                        break;
                    }
                },
                _ = next_tick(&mut clock) => {
                    self.machine.tick().await;
                }
            }
        }

        self.machine
    }

    async fn apply(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::Start => self.machine.start().await.map(Outcome::Started),
            Command::ToggleRecording => self.machine.toggle_recording().await.map(Outcome::Recording),
            Command::SetCode(code) => self.machine.set_code(code).map(|_| Outcome::Done),
            Command::Advance => self.machine.advance().await.map(|_| Outcome::Done),
            Command::End => self.machine.end().await.map(|_| Outcome::Done),
            Command::Abandon => {
                self.machine.abandon().await;
                Ok(Outcome::Done)
            }
            Command::RefreshBalance => self.machine.refresh_balance().await.map(|_| Outcome::Done),
        }
    }
}

async fn next_tick(clock: &mut Option<Interval>) {
    match clock {
        Some(iv) => {
            iv.tick().await;
        }
        None => pending::<()>().await,
    }
}
