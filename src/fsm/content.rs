//! Content states and their playback scheduler
//!
//! A content state is one node of the ballot dialogue. When presented it
//! opens every segment's media, plays the first one immediately and
//! schedules the rest on one-shot tokio timers, followed by either an
//! auto-repeat (after a silence timeout) or a completion marker.
//!
//! Every presentation bumps the state's generation. Timers carry the
//! generation they were scheduled under and do nothing if it has moved on,
//! so a timer that fires after its presentation was cancelled is inert.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::events::EngineEvent;
use crate::keypad::{InputCode, InputSet};
use crate::playback::{Segment, Track};

use super::action::StateAction;
use super::error::EngineError;
use super::session::{Lifecycle, Session};
use super::transition::StateId;

/// Everything needed to add a state to the machine
pub struct StateSpec {
    pub(crate) valid_inputs: InputSet,
    pub(crate) segments: Vec<Segment>,
    pub(crate) interruptable: bool,
    pub(crate) repeatable: bool,
    pub(crate) max_repeats: Option<u32>,
    pub(crate) action: Option<Arc<dyn StateAction>>,
}

impl StateSpec {
    /// An interruptable, repeatable state with no content and no action
    pub fn new(valid_inputs: InputSet) -> Self {
        Self {
            valid_inputs,
            segments: Vec::new(),
            interruptable: true,
            repeatable: true,
            max_repeats: None,
            action: None,
        }
    }

    /// Append a segment to the playlist
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn segments(mut self, segments: impl IntoIterator<Item = Segment>) -> Self {
        self.segments.extend(segments);
        self
    }

    pub fn interruptable(mut self, interruptable: bool) -> Self {
        self.interruptable = interruptable;
        self
    }

    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    /// Override the machine's default repeat ceiling for this state
    pub fn max_repeats(mut self, max_repeats: u32) -> Self {
        self.max_repeats = Some(max_repeats);
        self
    }

    pub fn action(mut self, action: impl StateAction + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    pub fn shared_action(mut self, action: Arc<dyn StateAction>) -> Self {
        self.action = Some(action);
        self
    }
}

/// One node of the dialogue
pub struct ContentState {
    id: StateId,
    valid_inputs: InputSet,
    segments: Vec<Segment>,
    interruptable: bool,
    repeatable: bool,
    /// Per-state repeat ceiling; the machine default applies when unset
    max_repeats: Option<u32>,
    action: Option<Arc<dyn StateAction>>,
    scheduler: Mutex<Scheduler>,
    /// Last generation whose presentation completed or was cancelled
    completed: watch::Sender<u64>,
}

/// Transient playback state of a content state
#[derive(Default)]
struct Scheduler {
    generation: u64,
    play_count: u32,
    /// Opened tracks by segment index; `None` once released
    tracks: Vec<Option<Box<dyn Track>>>,
    active: Option<usize>,
    /// Index of the next segment a timer will start
    next: usize,
    timers: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Advance(usize),
    Repeat,
    Complete,
}

impl Scheduler {
    /// Abort pending timers and invalidate any that already fired
    fn halt(&mut self) {
        self.generation += 1;
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.next = self.tracks.len();
    }

    /// Stop the active track and release every opened one
    fn release(&mut self) {
        if let Some(index) = self.active.take() {
            if let Some(track) = self.tracks.get_mut(index).and_then(Option::as_mut) {
                track.stop();
            }
        }
        for mut track in self.tracks.drain(..).flatten() {
            track.release();
        }
        self.next = 0;
    }

    /// Release the previous segment's track and start `index`
    fn start_segment(&mut self, index: usize, gain: f32) {
        if let Some(previous) = self.active.take() {
            if let Some(mut track) = self.tracks.get_mut(previous).and_then(Option::take) {
                track.stop();
                track.release();
            }
        }
        if let Some(track) = self.tracks.get_mut(index).and_then(Option::as_mut) {
            track.set_gain(gain);
            track.play();
            self.active = Some(index);
        }
        self.next = index + 1;
    }

    fn active_track(&mut self) -> Option<&mut Box<dyn Track>> {
        let index = self.active?;
        self.tracks.get_mut(index).and_then(Option::as_mut)
    }

    fn is_active(&self) -> bool {
        let playing = self
            .active
            .and_then(|index| self.tracks.get(index))
            .and_then(Option::as_ref)
            .is_some_and(|track| track.is_playing());
        playing || self.next < self.tracks.len()
    }
}

impl ContentState {
    pub(crate) fn new(id: StateId, spec: StateSpec) -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            id,
            valid_inputs: spec.valid_inputs,
            segments: spec.segments,
            interruptable: spec.interruptable,
            repeatable: spec.repeatable,
            max_repeats: spec.max_repeats,
            action: spec.action,
            scheduler: Mutex::new(Scheduler::default()),
            completed,
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn valid_inputs(&self) -> &InputSet {
        &self.valid_inputs
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_interruptable(&self) -> bool {
        self.interruptable
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    pub fn max_repeats(&self) -> Option<u32> {
        self.max_repeats
    }

    /// Number of presentations since the last accepted input
    pub fn play_count(&self) -> u32 {
        self.scheduler().play_count
    }

    /// Whether `input` is valid in this state
    pub fn accept(&self, input: InputCode) -> bool {
        self.valid_inputs.contains(input)
    }

    /// Whether a track is playing or segments are still scheduled
    pub fn is_active(&self) -> bool {
        self.scheduler().is_active()
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Present the state's content
    ///
    /// With `allow_repeat` the content replays after the silence timeout
    /// until input arrives or the repeat ceiling is exceeded. Without it
    /// the content plays once and [`finished`](Self::finished) resolves
    /// when it is over.
    pub(crate) fn present(
        self: &Arc<Self>,
        session: &Arc<Session>,
        allow_repeat: bool,
    ) -> Result<(), EngineError> {
        let mut sched = self.scheduler();
        self.present_locked(&mut sched, session, allow_repeat)
    }

    fn present_locked(
        self: &Arc<Self>,
        sched: &mut Scheduler,
        session: &Arc<Session>,
        allow_repeat: bool,
    ) -> Result<(), EngineError> {
        let ceiling = self.max_repeats.unwrap_or_else(|| session.max_repeats());
        if allow_repeat && sched.play_count > ceiling {
            return Err(EngineError::TimeoutExceeded {
                state: self.id,
                repeats: sched.play_count,
            });
        }

        sched.halt();
        sched.release();

        if self.segments.is_empty() {
            debug!(state = %self.id, "state has no content");
            self.completed.send_replace(sched.generation);
            return Ok(());
        }

        let offset = session.timing().inter_segment_offset;
        let mut starts = Vec::with_capacity(self.segments.len());
        let mut played = Duration::ZERO;
        let mut end = Duration::ZERO;
        for (index, segment) in self.segments.iter().enumerate() {
            let track = match session.open(&segment.media) {
                Ok(track) => track,
                Err(e) => {
                    sched.release();
                    return Err(e);
                }
            };
            let start = if index == 0 { Duration::ZERO } else { played + offset };
            starts.push(start);
            played += track.duration();
            end = start + track.duration();
            sched.tracks.push(Some(track));
        }

        sched.start_segment(0, session.gain());
        self.announce(session, 0);

        for (index, &start) in starts.iter().enumerate().skip(1) {
            self.schedule(sched, session, start, Timer::Advance(index));
        }

        if allow_repeat && self.repeatable {
            let repeat_at = end + session.timing().repeat_timeout;
            self.schedule(sched, session, repeat_at, Timer::Repeat);
            sched.play_count += 1;
        } else {
            self.schedule(sched, session, end, Timer::Complete);
        }

        debug!(
            state = %self.id,
            segments = self.segments.len(),
            total_ms = u64::try_from(end.as_millis()).unwrap_or(u64::MAX),
            play_count = sched.play_count,
            "content presented"
        );

        Ok(())
    }

    fn schedule(
        self: &Arc<Self>,
        sched: &mut Scheduler,
        session: &Arc<Session>,
        after: Duration,
        timer: Timer,
    ) {
        let state = Arc::clone(self);
        let session = Arc::clone(session);
        let generation = sched.generation;
        let deadline = Instant::now() + after;

        sched.timers.push(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            state.fire(&session, generation, timer);
        }));
    }

    fn fire(self: &Arc<Self>, session: &Arc<Session>, generation: u64, timer: Timer) {
        let mut sched = self.scheduler();
        if sched.generation != generation {
            debug!(state = %self.id, ?timer, "stale timer ignored");
            return;
        }

        match timer {
            Timer::Advance(index) => {
                sched.start_segment(index, session.gain());
                self.announce(session, index);
            }
            Timer::Repeat => {
                if session.lifecycle() == Lifecycle::Stopped {
                    debug!(state = %self.id, "session stopped, not repeating");
                    return;
                }
                session.clear_captions();
                match self.present_locked(&mut sched, session, true) {
                    Ok(()) => {
                        info!(state = %self.id, play_count = sched.play_count, "no input, content repeated");
                        session.emit(EngineEvent::ContentRepeated {
                            state: self.id,
                            play_count: sched.play_count,
                        });
                    }
                    Err(err) => {
                        sched.halt();
                        sched.release();
                        drop(sched);
                        session.raise(err);
                    }
                }
            }
            Timer::Complete => {
                debug!(state = %self.id, "presentation complete");
                self.completed.send_replace(generation);
            }
        }
    }

    fn announce(&self, session: &Session, index: usize) {
        if let Some(caption) = &self.segments[index].caption {
            session.show_caption(caption);
        }
        session.emit(EngineEvent::SegmentStarted {
            state: self.id,
            segment: index,
        });
    }

    /// Wait until the current presentation has completed or been cancelled
    pub(crate) async fn finished(&self) {
        let generation = self.scheduler().generation;
        let mut completed = self.completed.subscribe();
        let _ = completed.wait_for(|&done| done >= generation).await;
    }

    /// Stop playback, cancel timers and release every opened track
    pub fn cancel(&self) {
        let mut sched = self.scheduler();
        sched.halt();
        sched.release();
        sched.play_count = 0;
        self.completed.send_replace(sched.generation);
        debug!(state = %self.id, "playback cancelled");
    }

    /// Run the state's action for an accepted input
    pub(crate) fn run_action(&self, input: InputCode) {
        {
            let mut sched = self.scheduler();
            sched.play_count = 0;
            sched.halt();
        }

        if let Some(action) = &self.action {
            debug!(state = %self.id, input = %input, "running state action");
            action.perform(input);
        }
    }

    /// Forward a gain level to the playing track
    pub fn set_gain(&self, level: f32) {
        let mut sched = self.scheduler();
        if let Some(track) = sched.active_track() {
            if !track.set_gain(level) {
                debug!(state = %self.id, "backend has no gain control");
            }
        }
    }
}

impl fmt::Debug for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentState")
            .field("id", &self.id)
            .field("valid_inputs", &self.valid_inputs)
            .field("segments", &self.segments.len())
            .field("interruptable", &self.interruptable)
            .field("repeatable", &self.repeatable)
            .field("max_repeats", &self.max_repeats)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
