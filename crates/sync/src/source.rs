use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use lockstep_media::cache::MocapCache;
use lockstep_media::mocap::MocapReader;
use lockstep_media::probe::detect_kind;
use lockstep_media::video::{SeekPolicy, VideoBackend, VideoReader};
use lockstep_media::{FrameReader, MediaError};
use lockstep_state::source::{
    adjusted_length, translate_index, FrameIndex, SourceId, SourceKind, SourceMeta, UpdateReason,
};
use lockstep_state::tuning::SyncTuning;

use crate::events::SourceEvent;
use crate::scheduler::SchedulerMsg;

/// Requests delivered to a source's worker mailbox.
pub(crate) enum SourceRequest {
    Tick {
        reason: UpdateReason,
    },
    /// `target` is a primary frame index; the worker translates it.
    Scrub {
        target: FrameIndex,
        reason: UpdateReason,
    },
    /// Role and alignment, sent when the source becomes primary or
    /// secondary.
    SetRole {
        is_primary: bool,
        offset: i64,
        reference_fps: f64,
        reference_length: FrameIndex,
    },
    Shutdown,
}

pub(crate) struct SourceWorker {
    pub id: SourceId,
    pub meta: SourceMeta,
    pub req_tx: mpsc::Sender<SourceRequest>,
    pub join: Option<JoinHandle<()>>,
}

pub(crate) struct SpawnContext {
    pub id: SourceId,
    pub path: PathBuf,
    pub tuning: SyncTuning,
    pub cache: Arc<MocapCache>,
    pub backend: Option<Arc<dyn VideoBackend>>,
    pub ack_tx: mpsc::Sender<SchedulerMsg>,
    pub event_tx: mpsc::Sender<SourceEvent>,
}

/// Spawn the worker thread that owns this source's reader. Blocks until
/// the reader has opened and reported its metadata, so load failures
/// surface synchronously.
pub(crate) fn spawn_source_worker(ctx: SpawnContext) -> Result<SourceWorker, MediaError> {
    let (req_tx, req_rx) = mpsc::channel::<SourceRequest>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<SourceMeta, MediaError>>();

    let id = ctx.id;
    let join = std::thread::spawn(move || {
        let reader = match open_reader(&ctx) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };
        let meta = SourceMeta {
            kind: reader.kind(),
            fps: reader.fps(),
            length: reader.length(),
        };
        let _ = ready_tx.send(Ok(meta));

        let mut worker = Worker {
            id: ctx.id,
            reader,
            meta,
            position: 0,
            is_primary: false,
            offset: 0,
            reference_fps: meta.fps,
            reference_length: meta.length,
            rendered_any: false,
            reported_failure: false,
            ack_tx: ctx.ack_tx,
            event_tx: ctx.event_tx,
        };

        worker.render_initial_frame();
        worker.run(req_rx);
        worker.reader.close();
        log::debug!("{id}: worker stopped");
    });

    let meta = ready_rx
        .recv()
        .map_err(|_| MediaError::DecoderError(format!("{id}: worker died during load")))??;
    log::info!(
        "{id}: loaded {:?}, {} frames at {:.2} fps",
        meta.kind,
        meta.length,
        meta.fps
    );
    Ok(SourceWorker {
        id,
        meta,
        req_tx,
        join: Some(join),
    })
}

fn open_reader(ctx: &SpawnContext) -> Result<FrameReader, MediaError> {
    let backend = ctx.backend.as_deref();
    let kind = detect_kind(&ctx.path, backend)?;
    match kind {
        SourceKind::Mocap => {
            let reader = MocapReader::open(&ctx.cache, &ctx.path, ctx.tuning.mocap_fps)?;
            if reader.length() == 0 {
                return Err(MediaError::FormatUnsupported(format!(
                    "{}: empty mocap sequence",
                    ctx.path.display()
                )));
            }
            Ok(FrameReader::Mocap(reader))
        }
        SourceKind::Video => {
            let backend = backend.ok_or_else(|| {
                MediaError::FormatUnsupported(format!(
                    "{}: no video backend registered",
                    ctx.path.display()
                ))
            })?;
            let policy = SeekPolicy::new(
                ctx.tuning.scan_threshold,
                ctx.tuning.scan_threshold_min,
                ctx.tuning.scan_threshold_max,
            );
            let reader = VideoReader::open(backend, &ctx.path, policy)?;
            Ok(FrameReader::Video(reader))
        }
    }
}

struct Worker {
    id: SourceId,
    reader: FrameReader,
    meta: SourceMeta,
    position: FrameIndex,
    is_primary: bool,
    offset: i64,
    reference_fps: f64,
    reference_length: FrameIndex,
    rendered_any: bool,
    reported_failure: bool,
    ack_tx: mpsc::Sender<SchedulerMsg>,
    event_tx: mpsc::Sender<SourceEvent>,
}

enum WorkItem {
    Tick(UpdateReason),
    Scrub(FrameIndex, UpdateReason),
}

impl Worker {
    fn run(&mut self, req_rx: mpsc::Receiver<SourceRequest>) {
        loop {
            let Ok(first) = req_rx.recv() else {
                return;
            };
            // Coalesce: the newest unstarted update replaces older ones.
            // The scheduler serializes per-source requests, so at most one
            // tick and one scrub can pile up here; a scrub then supersedes
            // the tick.
            let mut work: Option<WorkItem> = None;
            if !self.apply(first, &mut work) {
                return;
            }
            loop {
                match req_rx.try_recv() {
                    Ok(req) => {
                        if !self.apply(req, &mut work) {
                            return;
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => return,
                }
            }
            match work {
                Some(WorkItem::Tick(reason)) => self.handle_tick(reason),
                Some(WorkItem::Scrub(target, reason)) => self.handle_scrub(target, reason),
                None => {}
            }
        }
    }

    /// Returns false on shutdown.
    fn apply(&mut self, req: SourceRequest, work: &mut Option<WorkItem>) -> bool {
        match req {
            SourceRequest::Tick { reason } => {
                // A pending scrub always outranks a tick.
                if matches!(work, Some(WorkItem::Scrub(..))) {
                    self.send_ack(reason);
                } else {
                    *work = Some(WorkItem::Tick(reason));
                }
            }
            SourceRequest::Scrub { target, reason } => {
                if let Some(WorkItem::Tick(tick_reason)) = work.take() {
                    // The superseded tick still owes its ACK.
                    self.send_ack(tick_reason);
                }
                *work = Some(WorkItem::Scrub(target, reason));
            }
            SourceRequest::SetRole {
                is_primary,
                offset,
                reference_fps,
                reference_length,
            } => {
                self.is_primary = is_primary;
                self.offset = offset;
                self.reference_fps = reference_fps;
                self.reference_length = reference_length;
            }
            SourceRequest::Shutdown => return false,
        }
        true
    }

    fn adjusted_length(&self) -> FrameIndex {
        if self.is_primary {
            self.meta.length
        } else {
            adjusted_length(
                self.meta.length,
                self.meta.fps,
                self.reference_fps,
                self.reference_length,
            )
        }
    }

    fn handle_tick(&mut self, reason: UpdateReason) {
        let end = self.adjusted_length().saturating_sub(1);
        let new_index = (self.position + 1).min(end);
        if new_index == self.position {
            // End of stream: the tick is a no-op but must still be ACKed.
            self.send_ack(reason);
            return;
        }
        match self.reader.frame_at(new_index) {
            Ok(frame) => {
                self.position = new_index;
                self.rendered_any = true;
                let _ = self.event_tx.send(SourceEvent::FrameReady {
                    source: self.id,
                    position: new_index,
                    frame,
                });
                if self.is_primary {
                    let _ = self.event_tx.send(SourceEvent::PrimaryAdvanced {
                        position: new_index,
                        reason,
                    });
                }
            }
            Err(err) => {
                // Keep showing the previous frame; playback goes on.
                log::warn!("{}: tick render of frame {new_index} failed: {err}", self.id);
                self.report_first_read_failure(&err);
            }
        }
        self.send_ack(reason);
    }

    fn handle_scrub(&mut self, target: FrameIndex, reason: UpdateReason) {
        let end = self.adjusted_length().saturating_sub(1);
        let translated = translate_index(target, self.meta.fps, self.reference_fps) as i64;
        let own = translated.saturating_add(self.offset).clamp(0, end as i64) as FrameIndex;
        if own == self.position && self.rendered_any {
            self.send_ack(reason);
            return;
        }
        match self.reader.frame_at(own) {
            Ok(frame) => {
                self.position = own;
                self.rendered_any = true;
                let _ = self.event_tx.send(SourceEvent::FrameReady {
                    source: self.id,
                    position: own,
                    frame,
                });
            }
            Err(err) => {
                log::warn!("{}: scrub render of frame {own} failed: {err}", self.id);
                self.report_first_read_failure(&err);
                // A scrub must not leave a stale image up; show a blank.
                self.position = own;
                let _ = self.event_tx.send(SourceEvent::FrameReady {
                    source: self.id,
                    position: own,
                    frame: self.reader.blank_frame(),
                });
            }
        }
        if self.is_primary {
            let _ = self.event_tx.send(SourceEvent::PrimaryAdvanced {
                position: self.position,
                reason,
            });
        }
        self.send_ack(reason);
    }

    fn render_initial_frame(&mut self) {
        match self.reader.frame_at(0) {
            Ok(frame) => {
                self.rendered_any = true;
                let _ = self.event_tx.send(SourceEvent::FrameReady {
                    source: self.id,
                    position: 0,
                    frame,
                });
            }
            Err(err) => {
                log::warn!("{}: initial frame failed: {err}", self.id);
                self.report_first_read_failure(&err);
            }
        }
    }

    fn report_first_read_failure(&mut self, err: &MediaError) {
        if self.rendered_any || self.reported_failure {
            return;
        }
        self.reported_failure = true;
        let _ = self.event_tx.send(SourceEvent::Failed {
            source: self.id,
            error: err.clone(),
        });
    }

    fn send_ack(&self, reason: UpdateReason) {
        let _ = self.ack_tx.send(SchedulerMsg::Ack {
            source: self.id,
            reason,
            position: self.position,
        });
    }
}
