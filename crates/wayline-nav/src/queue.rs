use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use wayline_proto::{Location, WayPoint};

#[derive(Debug, Default)]
struct QueueState {
    points: VecDeque<WayPoint>,
    /// Waypoint most recently taken for visiting.
    current: Option<WayPoint>,
    /// Order of the last waypoint actually reached.
    last_order: Option<i32>,
    home: Option<Location>,
}

/// Waypoints still to visit plus the navigation cursor.
///
/// Every method takes the lock for the duration of one structural change and
/// never hands out references into the sequence, so readers see either the
/// state before or after an insert+sort, never in between.
#[derive(Debug, Default)]
pub struct WayPointQueue {
    inner: Mutex<QueueState>,
}

impl WayPointQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, wp: WayPoint) {
        self.lock().points.push_back(wp);
    }

    pub fn insert_front(&self, wp: WayPoint) {
        self.lock().points.push_front(wp);
    }

    /// Append a path and re-sort in one critical section.
    pub fn enqueue_path(&self, path: impl IntoIterator<Item = WayPoint>) -> usize {
        let mut st = self.lock();
        st.points.extend(path);
        sort_points(&mut st.points);
        st.points.len()
    }

    /// Stable: waypoints sharing an order keep their insertion order.
    pub fn sort(&self) {
        sort_points(&mut self.lock().points);
    }

    /// Take the next waypoint to visit and make it current.
    pub fn pop_front(&self) -> Option<WayPoint> {
        let mut st = self.lock();
        let wp = st.points.pop_front();
        if wp.is_some() {
            st.current = wp;
        }
        wp
    }

    /// Record that the current waypoint was reached.
    pub fn complete_current(&self) -> Option<WayPoint> {
        let mut st = self.lock();
        let done = st.current.take();
        if let Some(wp) = done {
            st.last_order = Some(wp.order);
        }
        done
    }

    pub fn is_empty(&self) -> bool {
        self.lock().points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().points.len()
    }

    /// Drop every queued waypoint. Cursor and home are kept.
    pub fn clear(&self) {
        self.lock().points.clear();
    }

    /// Drop everything queued and put the synthetic home waypoint in front.
    pub fn replace_with_home(&self, home: Location) -> WayPoint {
        let wp = WayPoint::home(home);
        let mut st = self.lock();
        st.points.clear();
        st.points.push_front(wp);
        wp
    }

    pub fn peek(&self) -> Option<WayPoint> {
        self.lock().points.front().copied()
    }

    pub fn snapshot(&self) -> Vec<WayPoint> {
        self.lock().points.iter().copied().collect()
    }

    pub fn current(&self) -> Option<WayPoint> {
        self.lock().current
    }

    pub fn last_order(&self) -> Option<i32> {
        self.lock().last_order
    }

    pub fn home(&self) -> Option<Location> {
        self.lock().home
    }

    pub fn set_home(&self, home: Location) {
        self.lock().home = Some(home);
    }
}

fn sort_points(points: &mut VecDeque<WayPoint>) {
    points.make_contiguous().sort_by_key(|wp| wp.order);
}
