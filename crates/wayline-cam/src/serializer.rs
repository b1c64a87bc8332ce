//! At-most-one-outstanding command discipline for the camera link.
//!
//! The camera answers asynchronously and cannot multiplex, so a command is
//! only transmitted once the previous one was answered. A link that stays busy
//! past the timeout is considered stuck: its queue is dropped and the tracked
//! state is pushed again so watchers resynchronise.

use anyhow::Result;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{fps_code, id, resolution_code, CameraResponse, CommandKind, PeripheralCommand};
use crate::state::CameraState;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Transmit side of the camera link.
pub trait PeripheralLink: Send {
    fn transmit(&mut self, cmd: &PeripheralCommand) -> Result<()>;

    /// Hook run after the state was republished on a forced resync.
    fn resync(&mut self, state: &CameraState) {
        info!("cam: resynchronised state {:?}", state);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LinkEvent {
    Submit(PeripheralCommand),
    Response(CameraResponse),
}

pub struct CommandSerializer<L> {
    link: L,
    in_flight: Option<PeripheralCommand>,
    last_sent_at: Option<Instant>,
    pending: VecDeque<PeripheralCommand>,
    timeout: Duration,
    state: CameraState,
    publish: watch::Sender<CameraState>,
}

impl<L: PeripheralLink> CommandSerializer<L> {
    pub fn new(link: L, timeout: Duration) -> (Self, watch::Receiver<CameraState>) {
        let (publish, rx) = watch::channel(CameraState::default());
        let s = Self {
            link,
            in_flight: None,
            last_sent_at: None,
            pending: VecDeque::new(),
            timeout,
            state: CameraState::default(),
            publish,
        };
        (s, rx)
    }

    pub fn is_busy(&self) -> bool { self.in_flight.is_some() }

    pub fn pending_len(&self) -> usize { self.pending.len() }

    pub fn state(&self) -> &CameraState { &self.state }

    pub fn submit(&mut self, cmd: PeripheralCommand, now: Instant) {
        if self.is_busy() && self.is_stale(now) {
            warn!(
                "cam: no response within {:?}, dropping {} queued command(s)",
                self.timeout,
                self.pending.len()
            );
            self.in_flight = None;
            self.pending.clear();
            self.resync();
        }

        if self.is_busy() {
            self.pending.push_back(cmd);
            debug!("cam: link busy, queued command {} (depth {})", cmd.id, self.pending.len());
        } else {
            self.send(cmd, now);
        }
    }

    pub fn on_response(&mut self, resp: CameraResponse, now: Instant) {
        // a late answer to a command dropped by a resync must not release the link
        match self.in_flight {
            Some(cmd) if cmd.id == resp.id && cmd.kind == resp.kind => {}
            _ => {
                debug!("cam: ignoring stale response for command {} ({:?})", resp.id, resp.kind);
                return;
            }
        }

        match resp.kind {
            CommandKind::Get if resp.success => {
                if self.state.apply(&resp) {
                    self.publish.send_replace(self.state.clone());
                }
            }
            CommandKind::Get => {
                debug!("cam: get request for command {} failed", resp.id);
            }
            CommandKind::Set => {
                debug!("cam: set response for command {} success={}", resp.id, resp.success);
                if !resp.success {
                    self.resync();
                }
            }
        }

        match self.pending.pop_front() {
            Some(next) => {
                debug!("cam: sending queued command {} (depth {})", next.id, self.pending.len());
                self.send(next, now);
            }
            None => self.in_flight = None,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.last_sent_at {
            Some(t) => now.saturating_duration_since(t) > self.timeout,
            None => true,
        }
    }

    fn send(&mut self, cmd: PeripheralCommand, now: Instant) {
        self.in_flight = Some(cmd);
        self.last_sent_at = Some(now);
        if let Err(e) = self.link.transmit(&cmd) {
            // stays busy; the staleness check recovers the link
            warn!("cam: transmit of command {} failed: {:#}", cmd.id, e);
        }
    }

    fn resync(&mut self) {
        self.publish.send_replace(self.state.clone());
        self.link.resync(&self.state);
    }

    /// Drain link events until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(ev) = events.recv().await {
            let now = Instant::now();
            match ev {
                LinkEvent::Submit(cmd) => self.submit(cmd, now),
                LinkEvent::Response(resp) => self.on_response(resp, now),
            }
        }
        debug!("cam: serializer stopped");
    }
}

/// Handed to whatever receives camera answers; it only enqueues.
#[derive(Debug, Clone)]
pub struct ResponseSender(mpsc::UnboundedSender<LinkEvent>);

impl ResponseSender {
    pub fn send(&self, resp: CameraResponse) {
        if self.0.send(LinkEvent::Response(resp)).is_err() {
            debug!("cam: response for command {} dropped, serializer gone", resp.id);
        }
    }
}

/// Event channel feeding one serializer task.
pub struct CameraBus {
    tx: mpsc::UnboundedSender<LinkEvent>,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Default for CameraBus {
    fn default() -> Self { Self::new() }
}

impl CameraBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn responder(&self) -> ResponseSender {
        ResponseSender(self.tx.clone())
    }

    /// Spawn the serializer on its own task. Must be called inside a tokio runtime.
    pub fn start<L: PeripheralLink + 'static>(self, link: L, timeout: Duration) -> (CameraControl, JoinHandle<()>) {
        let (serializer, state) = CommandSerializer::new(link, timeout);
        let handle = tokio::spawn(serializer.run(self.rx));
        (CameraControl { tx: self.tx, state }, handle)
    }
}

/// Cloneable front-end used by vehicle and settings code.
#[derive(Debug, Clone)]
pub struct CameraControl {
    tx: mpsc::UnboundedSender<LinkEvent>,
    state: watch::Receiver<CameraState>,
}

impl CameraControl {
    fn submit(&self, cmd: PeripheralCommand) -> Result<()> {
        self.tx
            .send(LinkEvent::Submit(cmd))
            .map_err(|_| anyhow::anyhow!("camera serializer is not running"))
    }

    pub fn request(&self, id: u16) -> Result<()> {
        self.submit(PeripheralCommand::get(id)?)
    }

    /// Queue a set command, followed by a get when the camera would not report the change.
    pub fn command(&self, id: u16, payload: [u8; 4]) -> Result<()> {
        let cmd = PeripheralCommand::set(id, payload)?;
        self.submit(cmd)?;
        if cmd.needs_requery() {
            self.submit(PeripheralCommand::get(id)?)?;
        }
        Ok(())
    }

    pub fn set_resolution(&self, px: u32) -> Result<()> {
        let st = self.state();
        let res = resolution_code(px)?;
        let fps = fps_code(st.video_fps.unwrap_or(30))?;
        self.command(id::VIDEO_SETTINGS, [res, fps, st.field_of_view, video_flags(&st)])
    }

    pub fn set_fps(&self, fps: u32) -> Result<()> {
        let st = self.state();
        let res = resolution_code(st.video_resolution.unwrap_or(1080))?;
        let fps = fps_code(fps)?;
        self.command(id::VIDEO_SETTINGS, [res, fps, st.field_of_view, video_flags(&st)])
    }

    pub fn refresh(&self) -> Result<()> {
        for cmd in [id::VIDEO_SETTINGS, id::CAPTURE_MODE, id::BATTERY] {
            self.request(cmd)?;
        }
        Ok(())
    }

    pub fn state(&self) -> CameraState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state.clone()
    }
}

fn video_flags(st: &CameraState) -> u8 {
    if st.pal { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Sent(u16, CommandKind),
        Resync,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl Recorder {
        fn seen(&self) -> Vec<Seen> { self.0.lock().unwrap().clone() }
        fn sent(&self) -> usize {
            self.seen().iter().filter(|s| matches!(s, Seen::Sent(..))).count()
        }
    }

    impl PeripheralLink for Recorder {
        fn transmit(&mut self, cmd: &PeripheralCommand) -> Result<()> {
            self.0.lock().unwrap().push(Seen::Sent(cmd.id, cmd.kind));
            Ok(())
        }
        fn resync(&mut self, _state: &CameraState) {
            self.0.lock().unwrap().push(Seen::Resync);
        }
    }

    fn get(id: u16) -> PeripheralCommand { PeripheralCommand::get(id).unwrap() }

    fn ok(cmd: &PeripheralCommand, value: [u8; 4]) -> CameraResponse {
        CameraResponse { kind: cmd.kind, id: cmd.id, success: true, value }
    }

    #[test]
    fn one_in_flight_until_answered() {
        let rec = Recorder::default();
        let (mut s, _rx) = CommandSerializer::new(rec.clone(), DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();

        let cmds = [get(id::BATTERY), get(id::MODEL), get(id::CAPTURE_MODE), get(id::PROTUNE)];
        for c in cmds {
            s.submit(c, t0);
        }
        assert_eq!(rec.sent(), 1);
        assert!(s.is_busy());
        assert_eq!(s.pending_len(), 3);

        for (i, c) in cmds.iter().enumerate() {
            s.on_response(ok(c, [0; 4]), t0 + Duration::from_millis(100));
            assert_eq!(rec.sent(), (i + 2).min(4));
        }
        assert!(!s.is_busy());
        let order: Vec<u16> = rec
            .seen()
            .into_iter()
            .filter_map(|s| match s { Seen::Sent(id, _) => Some(id), Seen::Resync => None })
            .collect();
        assert_eq!(order, vec![id::BATTERY, id::MODEL, id::CAPTURE_MODE, id::PROTUNE]);
    }

    #[test]
    fn stale_link_resyncs_then_sends_immediately() {
        let rec = Recorder::default();
        let (mut s, _rx) = CommandSerializer::new(rec.clone(), DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();

        s.submit(get(id::BATTERY), t0);
        s.submit(get(id::MODEL), t0);
        assert_eq!(s.pending_len(), 1);

        // within the timeout the link is still busy
        s.submit(get(id::POWER), t0 + Duration::from_millis(1500));
        assert_eq!(rec.sent(), 1);
        assert_eq!(s.pending_len(), 2);

        s.submit(get(id::CAPTURE_MODE), t0 + Duration::from_millis(2100));
        assert_eq!(
            rec.seen(),
            vec![
                Seen::Sent(id::BATTERY, CommandKind::Get),
                Seen::Resync,
                Seen::Sent(id::CAPTURE_MODE, CommandKind::Get),
            ]
        );
        assert_eq!(s.pending_len(), 0);
        assert!(s.is_busy());
    }

    #[test]
    fn late_answer_to_a_dropped_command_is_ignored() {
        let rec = Recorder::default();
        let (mut s, rx) = CommandSerializer::new(rec.clone(), DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();
        let battery = get(id::BATTERY);
        let model = get(id::MODEL);

        s.submit(battery, t0);
        s.submit(model, t0 + Duration::from_millis(2100));
        s.submit(get(id::POWER), t0 + Duration::from_millis(2200));
        assert_eq!(rec.sent(), 2);
        assert_eq!(s.pending_len(), 1);

        s.on_response(ok(&battery, [55, 0, 0, 0]), t0 + Duration::from_millis(2300));
        assert!(s.is_busy());
        assert_eq!(s.pending_len(), 1);
        assert_eq!(rec.sent(), 2);
        assert_eq!(rx.borrow().battery, 0);

        s.on_response(ok(&model, [0; 4]), t0 + Duration::from_millis(2400));
        assert_eq!(rec.sent(), 3);
        assert_eq!(s.pending_len(), 0);
        assert_eq!(rec.seen().last(), Some(&Seen::Sent(id::POWER, CommandKind::Get)));
    }

    #[test]
    fn answer_with_nothing_in_flight_is_ignored() {
        let rec = Recorder::default();
        let (mut s, _rx) = CommandSerializer::new(rec.clone(), DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();
        s.on_response(ok(&get(id::BATTERY), [9, 0, 0, 0]), t0);
        assert!(!s.is_busy());
        assert_eq!(s.state().battery, 0);
    }

    #[test]
    fn failed_set_triggers_resync_and_advances() {
        let rec = Recorder::default();
        let (mut s, _rx) = CommandSerializer::new(rec.clone(), DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();
        let set = PeripheralCommand::set(id::CAPTURE_MODE, [1, 0, 0, 0]).unwrap();

        s.submit(set, t0);
        s.submit(get(id::CAPTURE_MODE), t0);
        s.on_response(CameraResponse { success: false, ..ok(&set, [0; 4]) }, t0);

        assert_eq!(
            rec.seen(),
            vec![
                Seen::Sent(id::CAPTURE_MODE, CommandKind::Set),
                Seen::Resync,
                Seen::Sent(id::CAPTURE_MODE, CommandKind::Get),
            ]
        );
        assert!(s.is_busy());
    }

    #[test]
    fn get_responses_are_published() {
        let rec = Recorder::default();
        let (mut s, rx) = CommandSerializer::new(rec, DEFAULT_BUSY_TIMEOUT);
        let t0 = Instant::now();
        let c = get(id::BATTERY);
        s.submit(c, t0);
        s.on_response(ok(&c, [77, 0, 0, 0]), t0);
        assert_eq!(rx.borrow().battery, 77);
        assert!(!s.is_busy());
    }

    struct Echo {
        responder: ResponseSender,
        sent: Arc<Mutex<Vec<PeripheralCommand>>>,
    }

    impl PeripheralLink for Echo {
        fn transmit(&mut self, cmd: &PeripheralCommand) -> Result<()> {
            self.sent.lock().unwrap().push(*cmd);
            let value = if cmd.kind == CommandKind::Get { [3, 4, 0, 0] } else { [0; 4] };
            self.responder.send(CameraResponse { kind: cmd.kind, id: cmd.id, success: true, value });
            Ok(())
        }
    }

    #[tokio::test]
    async fn set_is_followed_by_requery_through_the_task() {
        let bus = CameraBus::new();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let link = Echo { responder: bus.responder(), sent: sent.clone() };
        let (cam, _task) = bus.start(link, DEFAULT_BUSY_TIMEOUT);
        let mut watch = cam.subscribe();

        cam.set_fps(30).unwrap();
        tokio::time::timeout(Duration::from_secs(2), watch.changed()).await.unwrap().unwrap();

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, CommandKind::Set);
        assert_eq!(sent[0].payload[1], 4);
        assert_eq!(sent[1].kind, CommandKind::Get);
        assert_eq!(cam.state().video_resolution, Some(1080));
        assert_eq!(cam.state().video_fps, Some(30));
    }
}
