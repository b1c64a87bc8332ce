//! The navigation worker: one blocking thread that drains the waypoint queue
//! into the vehicle, plus the handle the request handlers drive it through.

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use wayline_fc::{Halt, Leg, Takeoff, Vehicle};
use wayline_proto::{WayPoint, HOME_ORDER};

use crate::queue::WayPointQueue;
use crate::NavConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationState {
    Idle,
    Flying,
    Halted,
    ReturningHome,
}

impl NavigationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Flying => "flying",
            Self::Halted => "halted",
            Self::ReturningHome => "returning_home",
        }
    }
}

#[derive(Debug)]
struct Flags {
    /// Set by a successful start, cleared by stop or a leg the pilot interrupted.
    launched: bool,
    quit: bool,
    returning_home: bool,
    finished: bool,
    state: NavigationState,
}

struct Shared {
    queue: Arc<WayPointQueue>,
    vehicle: Arc<dyn Vehicle>,
    cfg: NavConfig,
    halt: Halt,
    flags: Mutex<Flags>,
    wake: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: NavigationState) {
        let mut f = self.flags();
        if f.state != state {
            debug!("nav: {:?} -> {:?}", f.state, state);
            f.state = state;
        }
    }
}

/// Cloneable control surface for the single navigation worker.
#[derive(Clone)]
pub struct NavigationHandle {
    shared: Arc<Shared>,
}

impl NavigationHandle {
    pub fn spawn(queue: Arc<WayPointQueue>, vehicle: Arc<dyn Vehicle>, cfg: NavConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue,
            vehicle,
            cfg,
            halt: Halt::new(),
            flags: Mutex::new(Flags {
                launched: false,
                quit: false,
                returning_home: false,
                finished: false,
                state: NavigationState::Idle,
            }),
            wake: Condvar::new(),
            thread: Mutex::new(None),
        });
        let worker = shared.clone();
        let handle = std::thread::Builder::new()
            .name("nav-worker".into())
            .spawn(move || run(&worker))
            .context("spawn navigation worker")?;
        *shared.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(Self { shared })
    }

    pub fn queue(&self) -> &Arc<WayPointQueue> {
        &self.shared.queue
    }

    pub fn vehicle(&self) -> &Arc<dyn Vehicle> {
        &self.shared.vehicle
    }

    pub fn state(&self) -> NavigationState {
        self.shared.flags().state
    }

    pub fn is_running(&self) -> bool {
        !self.shared.flags().finished
    }

    fn ensure_accepting(&self) -> Result<()> {
        let f = self.shared.flags();
        ensure!(!f.quit, "navigation has terminated");
        Ok(())
    }

    /// Capture home, arm and take off. Blocks until airborne; takeoff is
    /// retried up to the configured attempt count.
    pub fn start(&self) -> Result<()> {
        self.ensure_accepting()?;
        let vehicle = &self.shared.vehicle;
        let home = vehicle.location().context("no position fix, cannot capture home")?;
        self.shared.queue.set_home(home);
        info!("nav: home set to {:.7},{:.7}", home.latitude, home.longitude);

        let attempts = self.shared.cfg.takeoff_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            vehicle.arm().context("arm")?;
            match vehicle.takeoff().context("takeoff")? {
                Takeoff::Airborne => break,
                Takeoff::Retry if attempt < attempts => warn!("nav: takeoff attempt {} failed, retrying", attempt),
                Takeoff::Retry => bail!("takeoff failed after {} attempts", attempt),
            }
        }

        let mut f = self.shared.flags();
        ensure!(!f.quit, "navigation terminated during takeoff");
        f.launched = true;
        if f.state == NavigationState::Halted {
            f.state = NavigationState::Idle;
        }
        self.shared.wake.notify_all();
        info!("nav: launched");
        Ok(())
    }

    /// Queue waypoints; they are flown in ascending order once launched.
    pub fn path(&self, waypoints: Vec<WayPoint>) -> Result<usize> {
        self.ensure_accepting()?;
        for wp in &waypoints {
            ensure!(wp.location.is_valid(), "waypoint {} has invalid coordinates", wp.order);
            ensure!(wp.order != HOME_ORDER, "order {} is reserved for home", HOME_ORDER);
        }
        let added = waypoints.len();
        let depth = self.shared.queue.enqueue_path(waypoints);
        info!("nav: added {} waypoint(s), {} queued", added, depth);
        self.shared.wake.notify_all();
        Ok(depth)
    }

    /// Brake in place. The interrupted waypoint stays queued; flying resumes on the next start.
    pub fn stop(&self) -> Result<()> {
        {
            let mut f = self.shared.flags();
            if f.launched {
                f.launched = false;
                f.state = NavigationState::Halted;
            }
        }
        self.shared.vehicle.brake().context("brake")
    }

    /// Abort the path and fly back to where start was received, then land.
    pub fn rth(&self) -> Result<()> {
        let home = self.shared.queue.home().context("no home location, start was never received")?;
        {
            let mut f = self.shared.flags();
            ensure!(!f.quit, "navigation has terminated");
            self.shared.queue.replace_with_home(home);
            f.quit = true;
            f.returning_home = true;
            f.state = NavigationState::ReturningHome;
        }
        info!("nav: returning home");
        self.shared.halt.trigger();
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop navigating without visiting home and land where we are.
    pub fn emergency(&self) -> Result<()> {
        warn!("nav: emergency, landing in place");
        self.signal_quit();
        self.shared.vehicle.land().context("land")
    }

    /// Stop the worker and wait for it. Does not command the vehicle.
    pub fn shutdown(&self) {
        self.signal_quit();
        let handle = self.shared.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("nav: worker panicked");
            }
        }
    }

    fn signal_quit(&self) {
        {
            let mut f = self.shared.flags();
            f.quit = true;
            f.returning_home = false;
        }
        self.shared.halt.trigger();
        self.shared.wake.notify_all();
    }
}

fn run(shared: &Shared) {
    info!("nav: worker started");
    let queue = &shared.queue;
    let idle = shared.cfg.idle_poll();

    loop {
        // quit check and pop under one lock; rth queues home under the same lock
        let mut f = shared.flags();
        if f.quit {
            break;
        }
        if !f.launched {
            drop(shared.wake.wait_timeout(f, idle).unwrap_or_else(PoisonError::into_inner));
            continue;
        }
        let Some(wp) = queue.pop_front() else {
            if f.state == NavigationState::Flying {
                f.state = NavigationState::Idle;
            }
            drop(shared.wake.wait_timeout(f, idle).unwrap_or_else(PoisonError::into_inner));
            continue;
        };
        if f.state != NavigationState::Flying {
            debug!("nav: {:?} -> Flying", f.state);
            f.state = NavigationState::Flying;
        }
        drop(f);

        info!("nav: flying to waypoint {}", wp.order);
        match shared.vehicle.fly_to(&wp.location, &shared.halt) {
            Ok(Leg::Arrived) => {
                queue.complete_current();
                info!("nav: arrived at waypoint {}", wp.order);
            }
            Ok(Leg::Halted) => debug!("nav: leg to {} halted", wp.order),
            Ok(Leg::ModeChanged(mode)) => {
                info!("nav: leg to {} interrupted by mode {:?}", wp.order, mode);
                pause(shared, wp);
            }
            Err(e) => {
                warn!("nav: leg to {} failed: {:#}", wp.order, e);
                pause(shared, wp);
            }
        }
    }

    let returning = shared.flags().returning_home;
    if returning {
        return_home(shared);
    }

    let mut f = shared.flags();
    f.finished = true;
    f.launched = false;
    f.state = NavigationState::Halted;
    info!("nav: worker stopped");
}

/// Put the interrupted waypoint back and wait for the next start.
fn pause(shared: &Shared, wp: WayPoint) {
    let mut f = shared.flags();
    if f.quit {
        return;
    }
    shared.queue.insert_front(wp);
    f.launched = false;
    f.state = NavigationState::Halted;
}

fn return_home(shared: &Shared) {
    shared.halt.reset();
    let Some(home) = shared.queue.pop_front() else {
        warn!("nav: nothing queued to return to");
        return;
    };
    if !shared.vehicle.telemetry().airborne {
        info!("nav: on the ground, not flying home");
        return;
    }
    shared.set_state(NavigationState::ReturningHome);
    info!("nav: flying home");
    match shared.vehicle.fly_to(&home.location, &shared.halt) {
        Ok(Leg::Arrived) => {
            shared.queue.complete_current();
        }
        // emergency already landed
        Ok(Leg::Halted) => return,
        Ok(Leg::ModeChanged(mode)) => {
            warn!("nav: return home interrupted by mode {:?}, leaving vehicle to the pilot", mode);
            return;
        }
        Err(e) => warn!("nav: return home failed: {:#}", e),
    }
    if let Err(e) = shared.vehicle.land() {
        warn!("nav: land after return home failed: {:#}", e);
    }
}
