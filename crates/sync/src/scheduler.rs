use std::collections::HashSet;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lockstep_state::playback::MIN_REPLAY_SPEED;
use lockstep_state::source::{FrameIndex, SourceId, UpdateReason};
use lockstep_state::tuning::SyncTuning;

use crate::fair_queue::FairQueue;
use crate::source::SourceRequest;

/// Control and ACK traffic into the scheduler thread. Everything the
/// scheduler mutates lives on that thread; callers only send messages.
pub(crate) enum SchedulerMsg {
    Subscribe(Subscriber),
    Unsubscribe(SourceId),
    SetPaused(bool),
    SetSpeed(f64),
    RequestScrub(FrameIndex),
    Ack {
        source: SourceId,
        reason: UpdateReason,
        position: FrameIndex,
    },
    Reset,
    Stop,
}

pub(crate) struct Subscriber {
    pub id: SourceId,
    pub fps: f64,
    pub is_primary: bool,
    pub req_tx: mpsc::Sender<SourceRequest>,
}

struct Subscription {
    sub: Subscriber,
    tick_count: u64,
}

pub(crate) struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerMsg>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Sender cloned into source workers for their ACK path.
    pub fn sender(&self) -> mpsc::Sender<SchedulerMsg> {
        self.tx.clone()
    }

    pub fn subscribe(&self, sub: Subscriber) {
        let _ = self.tx.send(SchedulerMsg::Subscribe(sub));
    }

    pub fn unsubscribe(&self, id: SourceId) {
        let _ = self.tx.send(SchedulerMsg::Unsubscribe(id));
    }

    pub fn set_paused(&self, paused: bool) {
        let _ = self.tx.send(SchedulerMsg::SetPaused(paused));
    }

    pub fn set_replay_speed(&self, speed: f64) {
        let _ = self.tx.send(SchedulerMsg::SetSpeed(speed));
    }

    pub fn request_scrub(&self, target: FrameIndex) {
        let _ = self.tx.send(SchedulerMsg::RequestScrub(target));
    }

    pub fn reset(&self) {
        let _ = self.tx.send(SchedulerMsg::Reset);
    }

    /// Terminate the loop and join the thread. Control calls after this
    /// are silently dropped.
    pub fn stop(&mut self) {
        let _ = self.tx.send(SchedulerMsg::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn spawn_scheduler(tuning: SyncTuning) -> SchedulerHandle {
    let (tx, rx) = mpsc::channel::<SchedulerMsg>();
    let join = std::thread::spawn(move || {
        Scheduler::new(tuning).run(rx);
    });
    SchedulerHandle {
        tx,
        join: Some(join),
    }
}

struct Scheduler {
    tuning: SyncTuning,
    subscriptions: Vec<Subscription>,
    queue: FairQueue,
    in_flight_ticks: HashSet<SourceId>,
    in_flight_scrubs: HashSet<SourceId>,
    pending_scrub: Option<FrameIndex>,
    paused: bool,
    needs_pause_sync: bool,
    replay_speed: f64,
    alpha: f64,
    virtual_time_ms: f64,
    last_wall: Option<Instant>,
    primary_position: FrameIndex,
}

impl Scheduler {
    fn new(tuning: SyncTuning) -> Self {
        Self {
            tuning,
            subscriptions: Vec::new(),
            queue: FairQueue::new(),
            in_flight_ticks: HashSet::new(),
            in_flight_scrubs: HashSet::new(),
            pending_scrub: None,
            paused: true,
            needs_pause_sync: false,
            replay_speed: 1.0,
            alpha: 1.0,
            virtual_time_ms: 0.0,
            last_wall: None,
            primary_position: 0,
        }
    }

    fn run(mut self, rx: mpsc::Receiver<SchedulerMsg>) {
        let idle_active = Duration::from_millis(self.tuning.idle_active_ms);
        let idle_passive = Duration::from_millis(self.tuning.idle_passive_ms);

        loop {
            while let Ok(msg) = rx.try_recv() {
                if !self.handle(msg) {
                    return;
                }
            }

            // Scrub ACKs outstanding: everything else waits.
            if !self.in_flight_scrubs.is_empty() {
                std::thread::sleep(idle_active);
                continue;
            }

            if let Some(target) = self.pending_scrub {
                if self.in_flight_ticks.is_empty() {
                    self.issue_scrub(target);
                } else {
                    // Let the in-flight ticks ACK first; no new dispatch
                    // happens while the scrub is pending.
                    std::thread::sleep(idle_active);
                }
                continue;
            }

            if self.paused {
                if self.needs_pause_sync {
                    if self.in_flight_ticks.is_empty() {
                        if !self.subscriptions.is_empty() {
                            // Converge every source onto the primary's
                            // resting frame before going idle.
                            let target = self.primary_position;
                            self.issue_scrub(target);
                        }
                        self.needs_pause_sync = false;
                    } else {
                        std::thread::sleep(idle_active);
                    }
                    continue;
                }
                std::thread::sleep(idle_passive);
                continue;
            }

            if self.subscriptions.is_empty() {
                self.reset_clock();
                std::thread::sleep(idle_passive);
                continue;
            }

            self.advance_clock();
            self.refill_queue();
            self.update_alpha();
            self.dispatch();

            std::thread::sleep(idle_active);
        }
    }

    /// Returns false when the loop should terminate.
    fn handle(&mut self, msg: SchedulerMsg) -> bool {
        match msg {
            SchedulerMsg::Subscribe(sub) => {
                if self.subscriptions.iter().any(|s| s.sub.id == sub.id) {
                    return true;
                }
                // Start at the clock's current tick count so a late join
                // does not trigger a burst of catch-up ticks.
                let period = 1000.0 / sub.fps.max(f64::MIN_POSITIVE);
                let tick_count = (self.virtual_time_ms / period).floor() as u64;
                log::debug!("scheduler: subscribe {} at {:.2} fps", sub.id, sub.fps);
                self.subscriptions.push(Subscription { sub, tick_count });
            }
            SchedulerMsg::Unsubscribe(id) => {
                log::debug!("scheduler: unsubscribe {id}");
                self.drop_subscriber(id);
            }
            SchedulerMsg::SetPaused(paused) => {
                if paused && !self.paused {
                    self.paused = true;
                    self.needs_pause_sync = true;
                } else if !paused && self.paused {
                    self.paused = false;
                    self.needs_pause_sync = false;
                    // Resume without crediting the pause to the clock.
                    self.last_wall = None;
                }
            }
            SchedulerMsg::SetSpeed(speed) => {
                self.replay_speed = speed.max(MIN_REPLAY_SPEED);
            }
            SchedulerMsg::RequestScrub(target) => {
                self.pending_scrub = Some(target);
            }
            SchedulerMsg::Ack {
                source,
                reason,
                position,
            } => {
                match reason {
                    UpdateReason::Timeout => {
                        self.in_flight_ticks.remove(&source);
                    }
                    UpdateReason::Scrub => {
                        self.in_flight_scrubs.remove(&source);
                    }
                }
                if self
                    .subscriptions
                    .iter()
                    .any(|s| s.sub.id == source && s.sub.is_primary)
                {
                    self.primary_position = position;
                }
            }
            SchedulerMsg::Reset => {
                self.subscriptions.clear();
                self.queue.clear();
                self.in_flight_ticks.clear();
                self.in_flight_scrubs.clear();
                self.pending_scrub = None;
                self.primary_position = 0;
                self.paused = true;
                self.needs_pause_sync = false;
                self.replay_speed = 1.0;
                self.reset_clock();
            }
            SchedulerMsg::Stop => return false,
        }
        true
    }

    /// Synthesized removal of a subscriber whose worker is gone or was
    /// explicitly unsubscribed; outstanding work is treated as ACKed.
    fn drop_subscriber(&mut self, id: SourceId) {
        self.subscriptions.retain(|s| s.sub.id != id);
        self.queue.remove(id);
        self.in_flight_ticks.remove(&id);
        self.in_flight_scrubs.remove(&id);
    }

    fn issue_scrub(&mut self, target: FrameIndex) {
        debug_assert!(self.in_flight_ticks.is_empty());
        log::debug!("scheduler: scrub to {target}");
        let mut dead = Vec::new();
        for sub in &self.subscriptions {
            let sent = sub.sub.req_tx.send(SourceRequest::Scrub {
                target,
                reason: UpdateReason::Scrub,
            });
            if sent.is_ok() {
                self.in_flight_scrubs.insert(sub.sub.id);
            } else {
                dead.push(sub.sub.id);
            }
        }
        for id in dead {
            log::warn!("scheduler: dropping {id}, worker mailbox is closed");
            self.drop_subscriber(id);
        }
        self.pending_scrub = None;
        self.primary_position = target;
        self.queue.clear();
        self.reset_clock();
    }

    fn reset_clock(&mut self) {
        self.virtual_time_ms = 0.0;
        self.last_wall = None;
        self.alpha = 1.0;
        for sub in &mut self.subscriptions {
            sub.tick_count = 0;
        }
    }

    fn advance_clock(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_wall {
            let delta_ms = now.duration_since(last).as_secs_f64() * 1000.0;
            self.virtual_time_ms += self.replay_speed * self.alpha * delta_ms;
        }
        self.last_wall = Some(now);
    }

    fn refill_queue(&mut self) {
        for sub in &mut self.subscriptions {
            let period = 1000.0 / sub.sub.fps.max(f64::MIN_POSITIVE);
            let new_count = (self.virtual_time_ms / period).floor() as u64;
            for _ in sub.tick_count..new_count {
                self.queue.push(sub.sub.id, sub.sub.fps);
            }
            sub.tick_count = sub.tick_count.max(new_count);
        }
    }

    fn update_alpha(&mut self) {
        let threshold = (2 * self.subscriptions.len()).min(5);
        let depth = self.queue.len();
        self.alpha = if depth <= threshold {
            1.0
        } else {
            let q_max = self.tuning.queue_max.max(threshold + 1);
            let load = (depth - threshold) as f64 / (q_max - threshold) as f64;
            (1.0 - load).max(self.tuning.alpha_epsilon)
        };
    }

    fn dispatch(&mut self) {
        while self.in_flight_ticks.len() < self.tuning.max_in_flight {
            let Some(id) = self.queue.pop() else {
                break;
            };
            let Some(sub) = self.subscriptions.iter().find(|s| s.sub.id == id) else {
                continue;
            };
            // One un-ACKed tick per source at a time. A tick that comes due
            // while the previous one is still rendering is dropped: the
            // slow source skips frames instead of throttling its peers.
            if self.in_flight_ticks.contains(&id) {
                continue;
            }
            let sent = sub.sub.req_tx.send(SourceRequest::Tick {
                reason: UpdateReason::Timeout,
            });
            if sent.is_ok() {
                self.in_flight_ticks.insert(id);
            } else {
                log::warn!("scheduler: dropping {id}, worker mailbox is closed");
                self.drop_subscriber(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(fps: f64) -> (Subscriber, mpsc::Receiver<SourceRequest>) {
        let (req_tx, req_rx) = mpsc::channel();
        let sub = Subscriber {
            id: SourceId::new(),
            fps,
            is_primary: false,
            req_tx,
        };
        (sub, req_rx)
    }

    fn scheduler_with_subs(n: usize) -> (Scheduler, Vec<mpsc::Receiver<SourceRequest>>) {
        let mut scheduler = Scheduler::new(SyncTuning::default());
        let mut mailboxes = Vec::new();
        for _ in 0..n {
            let (sub, rx) = subscriber(30.0);
            scheduler.handle(SchedulerMsg::Subscribe(sub));
            mailboxes.push(rx);
        }
        (scheduler, mailboxes)
    }

    #[test]
    fn alpha_stays_one_up_to_the_queue_threshold() {
        // Two subscribers: threshold = min(2 * 2, 5) = 4.
        let (mut scheduler, _mailboxes) = scheduler_with_subs(2);
        let id = scheduler.subscriptions[0].sub.id;
        for _ in 0..4 {
            scheduler.queue.push(id, 30.0);
        }
        scheduler.update_alpha();
        assert_eq!(scheduler.alpha, 1.0);

        scheduler.queue.push(id, 30.0);
        scheduler.update_alpha();
        assert!(scheduler.alpha < 1.0);
        assert!(scheduler.alpha > 0.0);
    }

    #[test]
    fn alpha_interpolates_between_threshold_and_queue_max() {
        // Three subscribers: threshold = min(6, 5) = 5; q_max = 50.
        let (mut scheduler, _mailboxes) = scheduler_with_subs(3);
        let id = scheduler.subscriptions[0].sub.id;
        for _ in 0..27 {
            scheduler.queue.push(id, 30.0);
        }
        scheduler.update_alpha();
        // (27 - 5) / (50 - 5) load gives alpha = 1 - 22/45.
        assert!((scheduler.alpha - (1.0 - 22.0 / 45.0)).abs() < 1e-9);
    }

    #[test]
    fn alpha_floors_at_epsilon_when_the_queue_saturates() {
        let (mut scheduler, _mailboxes) = scheduler_with_subs(3);
        let id = scheduler.subscriptions[0].sub.id;
        for _ in 0..60 {
            scheduler.queue.push(id, 30.0);
        }
        scheduler.update_alpha();
        assert_eq!(scheduler.alpha, scheduler.tuning.alpha_epsilon);
        assert!(scheduler.alpha > 0.0);
    }

    #[test]
    fn late_subscriber_is_seeded_at_the_current_clock() {
        let mut scheduler = Scheduler::new(SyncTuning::default());
        scheduler.virtual_time_ms = 1000.0;
        let (sub, _rx) = subscriber(30.0);
        scheduler.handle(SchedulerMsg::Subscribe(sub));

        // Seeded at floor(1000 / 33.3) so joining does not trigger a
        // catch-up burst.
        assert_eq!(scheduler.subscriptions[0].tick_count, 30);
        scheduler.refill_queue();
        assert!(scheduler.queue.is_empty());
    }

    #[test]
    fn refill_credits_one_tick_per_elapsed_period() {
        let (mut scheduler, _mailboxes) = scheduler_with_subs(1);
        scheduler.virtual_time_ms = 100.0;
        scheduler.refill_queue();
        // 100 ms at 30 fps is three full frame periods.
        assert_eq!(scheduler.queue.len(), 3);
        assert_eq!(scheduler.subscriptions[0].tick_count, 3);

        // A second refill at the same clock adds nothing.
        scheduler.refill_queue();
        assert_eq!(scheduler.queue.len(), 3);
    }

    #[test]
    fn reset_returns_the_scheduler_to_a_fresh_state() {
        let (mut scheduler, _mailboxes) = scheduler_with_subs(2);
        let id = scheduler.subscriptions[0].sub.id;
        scheduler.virtual_time_ms = 500.0;
        scheduler.primary_position = 40;
        scheduler.queue.push(id, 30.0);
        scheduler.in_flight_ticks.insert(id);

        scheduler.paused = false;
        scheduler.replay_speed = 2.0;
        scheduler.handle(SchedulerMsg::Reset);
        assert!(scheduler.paused);
        assert_eq!(scheduler.replay_speed, 1.0);
        assert!(scheduler.subscriptions.is_empty());
        assert!(scheduler.queue.is_empty());
        assert!(scheduler.in_flight_ticks.is_empty());
        assert_eq!(scheduler.primary_position, 0);
        assert_eq!(scheduler.virtual_time_ms, 0.0);
        assert_eq!(scheduler.alpha, 1.0);
    }

    #[test]
    fn dispatch_holds_one_tick_per_source() {
        let (mut scheduler, mailboxes) = scheduler_with_subs(1);
        let id = scheduler.subscriptions[0].sub.id;
        for _ in 0..3 {
            scheduler.queue.push(id, 30.0);
        }
        scheduler.dispatch();

        // One tick went out; the rest were dropped, not deferred.
        assert_eq!(scheduler.in_flight_ticks.len(), 1);
        assert!(scheduler.queue.is_empty());
        assert!(matches!(
            mailboxes[0].try_recv(),
            Ok(SourceRequest::Tick { .. })
        ));
        assert!(mailboxes[0].try_recv().is_err());

        scheduler.handle(SchedulerMsg::Ack {
            source: id,
            reason: UpdateReason::Timeout,
            position: 1,
        });
        assert!(scheduler.in_flight_ticks.is_empty());
    }
}
