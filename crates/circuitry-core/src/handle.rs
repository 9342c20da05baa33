//! Thread-safe access to a [`Simulator`].
//!
//! Every step runs under one mutex and ends by publishing an immutable
//! [`SimSnapshot`]. Readers take the latest published snapshot and never see
//! a half-finished step. They can poll with
//! [`SimHandle::has_update_since`] or receive snapshots over a channel from
//! [`SimHandle::subscribe`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::circuit::CircuitLibrary;
use crate::id::{ComponentId, StateNodeId};
use crate::sim::{StepOutcome, StopHandle};
use crate::simulator::{SimError, SimSnapshot, Simulator};
use crate::value::Value;

#[derive(Debug)]
struct Shared {
    sim: Mutex<Simulator>,
    published: RwLock<Arc<SimSnapshot>>,
    seq: AtomicU64,
    subscribers: Mutex<Vec<Sender<Arc<SimSnapshot>>>>,
}

impl Shared {
    /// Publish the state of `sim`. Called with the simulator lock held, so
    /// sequence numbers follow step order.
    fn publish(&self, sim: &Simulator) -> Arc<SimSnapshot> {
        let seq = self.seq.load(Ordering::SeqCst) + 1;
        let mut snapshot = sim.snapshot();
        snapshot.seq = seq;
        let snapshot = Arc::new(snapshot);
        *self.published.write() = Arc::clone(&snapshot);
        self.seq.store(seq, Ordering::SeqCst);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
        snapshot
    }

    fn step(&self, f: impl FnOnce(&mut Simulator) -> Result<StepOutcome, SimError>) -> Result<StepOutcome, SimError> {
        let mut sim = self.sim.lock();
        let outcome = f(&mut *sim);
        self.publish(&*sim);
        outcome
    }
}

#[derive(Debug)]
struct Ticker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Clonable, `Send + Sync` handle to a simulator running behind a lock.
#[derive(Debug, Clone)]
pub struct SimHandle {
    shared: Arc<Shared>,
    stop: StopHandle,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl SimHandle {
    pub fn new(sim: Simulator) -> Self {
        let stop = sim.stop_handle();
        let initial = Arc::new(sim.snapshot());
        Self {
            shared: Arc::new(Shared {
                sim: Mutex::new(sim),
                published: RwLock::new(initial),
                seq: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
            stop,
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<SimSnapshot> {
        Arc::clone(&self.shared.published.read())
    }

    /// Sequence number of the latest published snapshot.
    pub fn seq(&self) -> u64 {
        self.shared.seq.load(Ordering::SeqCst)
    }

    /// Whether a snapshot newer than `seq` has been published.
    pub fn has_update_since(&self, seq: u64) -> bool {
        self.seq() > seq
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> Receiver<Arc<SimSnapshot>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Interrupt a running drain. Does not wait for the simulator lock.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    pub fn nudge(&self) -> Result<StepOutcome, SimError> {
        self.shared.step(Simulator::nudge)
    }

    pub fn tick(&self) -> Result<StepOutcome, SimError> {
        self.shared.step(Simulator::tick)
    }

    pub fn reset(&self) -> Result<StepOutcome, SimError> {
        self.shared.step(Simulator::reset)
    }

    /// Run `f` against the simulator under the lock, then publish.
    pub fn with<R>(&self, f: impl FnOnce(&mut Simulator) -> R) -> R {
        let mut sim = self.shared.sim.lock();
        let out = f(&mut *sim);
        self.shared.publish(&*sim);
        out
    }

    /// Edit topology. With `auto_propagate`, the edit is settled before the
    /// next snapshot is published.
    pub fn edit<R>(&self, f: impl FnOnce(&mut CircuitLibrary) -> R) -> Result<R, SimError> {
        let mut sim = self.shared.sim.lock();
        let out = f(sim.library_mut());
        let result = if sim.config().auto_propagate {
            sim.nudge().map(|_| out)
        } else {
            sim.sync().map(|_| out)
        };
        self.shared.publish(&*sim);
        result
    }

    /// Poke an input pin; with `auto_propagate`, settle immediately.
    pub fn poke_pin(&self, node: StateNodeId, pin: ComponentId, value: Value) -> Result<(), SimError> {
        let mut sim = self.shared.sim.lock();
        let result = sim.poke_pin(node, pin, value).and_then(|()| {
            if sim.config().auto_propagate {
                sim.nudge().map(|_| ())
            } else {
                Ok(())
            }
        });
        self.shared.publish(&*sim);
        result
    }

    // -----------------------------------------------------------------------
    // Auto-ticking
    // -----------------------------------------------------------------------

    pub fn is_auto_ticking(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Start or stop a background thread that ticks once per
    /// `tick_period_ms`.
    pub fn set_auto_ticking(&self, enabled: bool) {
        let mut ticker = self.ticker.lock();
        match (enabled, ticker.is_some()) {
            (true, false) => {
                let period = Duration::from_millis(self.shared.sim.lock().config().tick_period_ms);
                let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
                let shared = Arc::clone(&self.shared);
                let thread = std::thread::spawn(move || {
                    let ticks = crossbeam_channel::tick(period);
                    loop {
                        crossbeam_channel::select! {
                            recv(ticks) -> _ => {
                                if let Err(e) = shared.step(Simulator::tick) {
                                    tracing::warn!(error = %e, "auto-tick failed");
                                }
                            }
                            recv(stop_rx) -> _ => break,
                        }
                    }
                });
                tracing::info!(period_ms = period.as_millis() as u64, "auto-ticking started");
                *ticker = Some(Ticker {
                    stop: stop_tx,
                    thread,
                });
            }
            (false, true) => {
                if let Some(t) = ticker.take() {
                    let _ = t.stop.send(());
                    if t.thread.join().is_err() {
                        tracing::warn!("auto-tick thread panicked");
                    }
                    tracing::info!("auto-ticking stopped");
                }
            }
            _ => {}
        }
    }
}
