use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use lockstep_media::cache::MocapCache;
use lockstep_media::video::VideoBackend;
use lockstep_media::MediaError;
use lockstep_state::playback::Playback;
use lockstep_state::source::{FrameIndex, SourceId, SourceMeta};
use lockstep_state::tuning::SyncTuning;

use crate::events::{SessionEvent, SourceEvent};
use crate::mediator::{Mediator, MediatorOutcome};
use crate::scheduler::{spawn_scheduler, SchedulerHandle, Subscriber};
use crate::source::{spawn_source_worker, SourceRequest, SourceWorker, SpawnContext};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("unknown source {0}")]
    UnknownSource(SourceId),
    #[error("a primary source is already set")]
    PrimaryAlreadySet,
    #[error("no primary source")]
    NoPrimary,
    #[error("loop bounds out of range")]
    InvalidLoopBounds,
    #[error("session is closed")]
    SessionClosed,
}

struct SourceEntry {
    worker: SourceWorker,
    subscribed: bool,
    offset: i64,
}

/// A set of media sources driven in lock-step. Sources are opened, one is
/// promoted to primary, and the rest follow it through per-source scaling.
/// Call `pump_events` regularly from the owning thread to collect rendered
/// frames and playhead updates.
pub struct Session {
    tuning: SyncTuning,
    scheduler: SchedulerHandle,
    sources: HashMap<SourceId, SourceEntry>,
    primary: Option<SourceId>,
    mediator: Option<Mediator>,
    event_tx: mpsc::Sender<SourceEvent>,
    event_rx: mpsc::Receiver<SourceEvent>,
    pending_out: Vec<SessionEvent>,
    cache: Arc<MocapCache>,
    backend: Option<Arc<dyn VideoBackend>>,
    playback: Playback,
    closed: bool,
}

impl Session {
    pub fn new(tuning: SyncTuning) -> Self {
        Self::build(tuning, None)
    }

    /// A session that can open video files through `backend`. Without one,
    /// only mocap sources can be opened.
    pub fn with_video_backend(tuning: SyncTuning, backend: Arc<dyn VideoBackend>) -> Self {
        Self::build(tuning, Some(backend))
    }

    fn build(tuning: SyncTuning, backend: Option<Arc<dyn VideoBackend>>) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        let cache = Arc::new(MocapCache::new(tuning.mocap_cache_bytes));
        let scheduler = spawn_scheduler(tuning.clone());
        Self {
            tuning,
            scheduler,
            sources: HashMap::new(),
            primary: None,
            mediator: None,
            event_tx,
            event_rx,
            pending_out: Vec::new(),
            cache,
            backend,
            playback: Playback::default(),
            closed: false,
        }
    }

    /// Open a media file and spawn its worker. The source starts idle; it
    /// joins playback once promoted with `set_primary` or `add_secondary`.
    pub fn open_source(&mut self, path: &Path) -> Result<SourceId, SyncError> {
        self.ensure_open()?;
        let id = SourceId::new();
        let worker = spawn_source_worker(SpawnContext {
            id,
            path: path.to_path_buf(),
            tuning: self.tuning.clone(),
            cache: Arc::clone(&self.cache),
            backend: self.backend.clone(),
            ack_tx: self.scheduler.sender(),
            event_tx: self.event_tx.clone(),
        })?;
        self.sources.insert(
            id,
            SourceEntry {
                worker,
                subscribed: false,
                offset: 0,
            },
        );
        self.pending_out.push(SessionEvent::SourceLoaded { source: id });
        Ok(id)
    }

    pub fn set_primary(&mut self, id: SourceId) -> Result<(), SyncError> {
        self.ensure_open()?;
        if self.primary.is_some() {
            return Err(SyncError::PrimaryAlreadySet);
        }
        let entry = self.sources.get_mut(&id).ok_or(SyncError::UnknownSource(id))?;
        if entry.offset != 0 {
            // The primary defines the timeline; any alignment it carried as
            // a secondary no longer applies.
            log::info!("{id}: promoting to primary, dropping offset {}", entry.offset);
            entry.offset = 0;
        }
        let meta = entry.worker.meta;
        let _ = entry.worker.req_tx.send(SourceRequest::SetRole {
            is_primary: true,
            offset: 0,
            reference_fps: meta.fps,
            reference_length: meta.length,
        });
        self.scheduler.subscribe(Subscriber {
            id,
            fps: meta.fps,
            is_primary: true,
            req_tx: entry.worker.req_tx.clone(),
        });
        entry.subscribed = true;
        self.primary = Some(id);
        self.mediator = Some(Mediator::new(meta.length));
        // Secondaries that were following an earlier primary keep playing;
        // rebase their translation onto the new reference rate.
        for (other_id, other) in &self.sources {
            if *other_id == id || !other.subscribed {
                continue;
            }
            let _ = other.worker.req_tx.send(SourceRequest::SetRole {
                is_primary: false,
                offset: other.offset,
                reference_fps: meta.fps,
                reference_length: meta.length,
            });
        }
        Ok(())
    }

    /// Attach a source as a follower of the primary. `offset` shifts its
    /// own frame index after rate translation.
    pub fn add_secondary(&mut self, id: SourceId, offset: i64) -> Result<(), SyncError> {
        self.ensure_open()?;
        let primary_id = self.primary.ok_or(SyncError::NoPrimary)?;
        if id == primary_id {
            return Err(SyncError::PrimaryAlreadySet);
        }
        let reference = self
            .sources
            .get(&primary_id)
            .ok_or(SyncError::UnknownSource(primary_id))?
            .worker
            .meta;
        let entry = self.sources.get_mut(&id).ok_or(SyncError::UnknownSource(id))?;
        entry.offset = offset;
        let meta = entry.worker.meta;
        let _ = entry.worker.req_tx.send(SourceRequest::SetRole {
            is_primary: false,
            offset,
            reference_fps: reference.fps,
            reference_length: reference.length,
        });
        self.scheduler.subscribe(Subscriber {
            id,
            fps: meta.fps,
            is_primary: false,
            req_tx: entry.worker.req_tx.clone(),
        });
        entry.subscribed = true;
        Ok(())
    }

    pub fn remove_source(&mut self, id: SourceId) -> Result<(), SyncError> {
        self.ensure_open()?;
        let mut entry = self.sources.remove(&id).ok_or(SyncError::UnknownSource(id))?;
        if entry.subscribed {
            self.scheduler.unsubscribe(id);
        }
        let _ = entry.worker.req_tx.send(SourceRequest::Shutdown);
        if let Some(join) = entry.worker.join.take() {
            let _ = join.join();
        }
        if self.primary == Some(id) {
            self.primary = None;
            self.mediator = None;
            self.scheduler.set_paused(true);
            self.playback.paused = true;
        }
        Ok(())
    }

    pub fn play(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        if self.primary.is_none() {
            return Err(SyncError::NoPrimary);
        }
        self.playback.paused = false;
        self.scheduler.set_paused(false);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.playback.paused = true;
        self.scheduler.set_paused(true);
        Ok(())
    }

    pub fn toggle_playback(&mut self) -> Result<(), SyncError> {
        if self.playback.paused {
            self.play()
        } else {
            self.pause()
        }
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.playback.set_speed(speed);
        self.scheduler.set_replay_speed(self.playback.speed);
        Ok(())
    }

    /// Jump every source to the frame aligned with primary index `target`.
    /// Targets past the end are clamped, never rejected.
    pub fn scrub_to(&mut self, target: FrameIndex) -> Result<(), SyncError> {
        self.ensure_open()?;
        let mediator = self.mediator.as_mut().ok_or(SyncError::NoPrimary)?;
        let clamped = mediator.clamp_target(target);
        mediator.anchor(clamped);
        self.scheduler.request_scrub(clamped);
        Ok(())
    }

    /// Step the playhead by `delta` frames, scaled by the small or big
    /// skip stride.
    pub fn skip(&mut self, delta: i64, fast: bool) -> Result<(), SyncError> {
        self.ensure_open()?;
        let step = if fast {
            self.tuning.skip_big
        } else {
            self.tuning.skip_small
        };
        let mediator = self.mediator.as_mut().ok_or(SyncError::NoPrimary)?;
        let target = mediator.skip_target(delta, step);
        mediator.anchor(target);
        self.scheduler.request_scrub(target);
        Ok(())
    }

    /// Confine playback to `[lo, hi]` primary frames; reaching `hi` wraps
    /// to `lo`.
    pub fn start_loop(&mut self, lo: FrameIndex, hi: FrameIndex) -> Result<(), SyncError> {
        self.ensure_open()?;
        let mediator = self.mediator.as_mut().ok_or(SyncError::NoPrimary)?;
        if !mediator.set_loop(lo, hi) {
            return Err(SyncError::InvalidLoopBounds);
        }
        Ok(())
    }

    pub fn stop_loop(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        let mediator = self.mediator.as_mut().ok_or(SyncError::NoPrimary)?;
        mediator.clear_loop();
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.playback.paused
    }

    pub fn speed(&self) -> f64 {
        self.playback.speed
    }

    pub fn primary_position(&self) -> Option<FrameIndex> {
        self.mediator.as_ref().map(|m| m.position())
    }

    pub fn source_meta(&self, id: SourceId) -> Option<SourceMeta> {
        self.sources.get(&id).map(|e| e.worker.meta)
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.keys().copied().collect()
    }

    /// Drain worker traffic into application-facing events. Non-blocking;
    /// call this once per frame of the embedding application's loop.
    pub fn pump_events(&mut self) -> Vec<SessionEvent> {
        let mut out = std::mem::take(&mut self.pending_out);
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                SourceEvent::FrameReady {
                    source,
                    position,
                    frame,
                } => out.push(SessionEvent::FrameReady {
                    source,
                    position,
                    frame,
                }),
                SourceEvent::PrimaryAdvanced { position, reason } => {
                    let Some(mediator) = self.mediator.as_mut() else {
                        continue;
                    };
                    match mediator.on_primary_advanced(position, reason) {
                        MediatorOutcome::Advance(frame) => {
                            out.push(SessionEvent::PrimaryPositionChanged { frame });
                        }
                        MediatorOutcome::Wrap { position, restart } => {
                            out.push(SessionEvent::PrimaryPositionChanged { frame: position });
                            mediator.anchor(restart);
                            self.scheduler.request_scrub(restart);
                        }
                        MediatorOutcome::Stale => {}
                    }
                }
                SourceEvent::Failed { source, error } => {
                    out.push(SessionEvent::SourceFailed { source, error });
                }
            }
        }
        out
    }

    /// Drop every source and return to the freshly-built state, keeping
    /// the scheduler thread and the mocap cache warm. Used when the
    /// embedding tool switches to a different recording set.
    pub fn reset(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.scheduler.reset();
        for (_, mut entry) in self.sources.drain() {
            let _ = entry.worker.req_tx.send(SourceRequest::Shutdown);
            if let Some(join) = entry.worker.join.take() {
                let _ = join.join();
            }
        }
        self.primary = None;
        self.mediator = None;
        self.playback = Playback::default();
        self.pending_out.clear();
        // Anything the dead workers still posted is from the old set.
        while self.event_rx.try_recv().is_ok() {}
        Ok(())
    }

    /// Stop the scheduler and every worker. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scheduler.stop();
        for (_, mut entry) in self.sources.drain() {
            let _ = entry.worker.req_tx.send(SourceRequest::Shutdown);
            if let Some(join) = entry.worker.join.take() {
                let _ = join.join();
            }
        }
        self.primary = None;
        self.mediator = None;
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.closed {
            Err(SyncError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
