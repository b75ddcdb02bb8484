//! The composition session: authoritative story state plus the reversible
//! editing state machine.
//!
//! One session is owned by the creation-flow controller and passed by
//! reference into every operation, so preview, trim editing, and export all
//! observe the same state. Every mutation triggers a full rebuild of both
//! the working (preview) and export (render-ready) outputs; there is no
//! incremental diffing.
//!
//! Range and reorder mutations require an open edit session. Calling them
//! without one is a caller bug and panics; `try_`-prefixed variants return
//! a [`SessionError`] instead for hosts that need a checked path.

use std::sync::Arc;

use tracing::debug;

use crate::compose::builder::{rebuild_working, BuildInputs};
use crate::compose::export::build_export;
use crate::compose::plan::{ExportComposition, WorkingComposition};
use crate::compose::text::OverlayRenderer;
use crate::compose::transform::CanvasSize;
use crate::core::asset::MediaAsset;
use crate::core::model::{
    BackgroundSong, CompositionMode, Gradient, MediaSnapshot, TextOverlay, VideoClip,
};
use crate::core::time::TimeRange;
use uuid::Uuid;

/// Error type for the checked session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("operation requires an open edit session")]
    EditSessionNotOpen,
    #[error("an edit session is already open")]
    EditSessionAlreadyOpen,
    #[error("clip index {0} is out of range")]
    ClipOutOfRange(usize),
}

/// Both rebuild outputs derived from one snapshot.
#[derive(Debug, Clone, PartialEq)]
struct Outputs {
    working: WorkingComposition,
    export: ExportComposition,
}

/// Authoritative story state for one creation flow.
pub struct CompositionSession {
    mode: CompositionMode,
    canvas: CanvasSize,
    source: MediaSnapshot,
    editing: Option<MediaSnapshot>,
    texts: Vec<TextOverlay>,
    original_volume: f32,
    added_volume: f32,
    gradient: Option<Gradient>,
    duet_origin: Option<MediaAsset>,
    renderer: Arc<dyn OverlayRenderer>,
    committed: Outputs,
    /// Outputs derived from the editing snapshot while a session is open.
    /// Dropping them on cancel leaves the committed outputs untouched.
    editing_outputs: Option<Outputs>,
}

impl CompositionSession {
    pub fn new(canvas: CanvasSize, renderer: Arc<dyn OverlayRenderer>) -> Self {
        let source = MediaSnapshot::empty();
        let inputs = BuildInputs {
            snapshot: &source,
            mode: CompositionMode::default(),
            canvas,
            duet_origin: None,
            original_volume: 1.0,
            added_volume: 1.0,
            gradient: None,
        };
        let committed = Outputs {
            working: rebuild_working(&inputs),
            export: build_export(&inputs, &[], renderer.as_ref()),
        };
        Self {
            mode: CompositionMode::default(),
            canvas,
            source,
            editing: None,
            texts: Vec::new(),
            original_volume: 1.0,
            added_volume: 1.0,
            gradient: None,
            duet_origin: None,
            renderer,
            committed,
            editing_outputs: None,
        }
    }

    /// Clear back to the empty state (canceled flow or mode switch).
    pub fn reset(&mut self) {
        self.mode = CompositionMode::default();
        self.source = MediaSnapshot::empty();
        self.editing = None;
        self.editing_outputs = None;
        self.texts.clear();
        self.original_volume = 1.0;
        self.added_volume = 1.0;
        self.gradient = None;
        self.duet_origin = None;
        self.committed = self.build_from(&self.source.clone());
    }

    /// Switch creation mode, resetting all story state. Text mode seeds the
    /// synthetic blank canvas clip its gradient and overlays draw over.
    /// Duet mode needs an origin asset; use [`Self::start_duet`].
    pub fn set_mode(&mut self, mode: CompositionMode) {
        assert!(
            mode != CompositionMode::Duet,
            "set_mode cannot enter duet; start_duet supplies the origin asset"
        );
        self.reset();
        self.mode = mode;
        if mode == CompositionMode::Text {
            let canvas_clip = VideoClip::new(MediaAsset::blank_canvas(self.canvas.size()));
            self.source.clips.push(canvas_clip);
            self.source.refresh_output_window();
        }
        self.rebuild_active();
    }

    /// Enter duet mode against an existing story. The origin sits outside
    /// the snapshot: it is always present, never trimmed, and pinned to the
    /// upper half of the canvas.
    pub fn start_duet(&mut self, origin: MediaAsset) {
        self.reset();
        self.mode = CompositionMode::Duet;
        self.duet_origin = Some(origin);
        self.rebuild_active();
    }

    pub fn mode(&self) -> CompositionMode {
        self.mode
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn duet_origin(&self) -> Option<&MediaAsset> {
        self.duet_origin.as_ref()
    }

    /// The committed story state.
    pub fn source_snapshot(&self) -> &MediaSnapshot {
        &self.source
    }

    /// The state mutations currently apply to: the editing snapshot while a
    /// session is open, the committed one otherwise.
    pub fn snapshot(&self) -> &MediaSnapshot {
        self.editing.as_ref().unwrap_or(&self.source)
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn texts(&self) -> &[TextOverlay] {
        &self.texts
    }

    pub fn volumes(&self) -> (f32, f32) {
        (self.original_volume, self.added_volume)
    }

    pub fn gradient(&self) -> Option<Gradient> {
        self.gradient
    }

    /// Live-preview composition for the active snapshot.
    pub fn working(&self) -> &WorkingComposition {
        &self.active_outputs().working
    }

    /// Render-ready composition for the active snapshot.
    pub fn export_composition(&self) -> &ExportComposition {
        &self.active_outputs().export
    }

    // Structural mutations, allowed with or without an open edit session.

    pub fn add_clip(&mut self, clip: VideoClip) {
        self.mutate(|snapshot| {
            snapshot.clips.push(clip);
            snapshot.refresh_output_window();
        });
    }

    pub fn remove_clip(&mut self, index: usize) -> Option<VideoClip> {
        self.mutate(|snapshot| {
            if index >= snapshot.clips.len() {
                return None;
            }
            let removed = snapshot.clips.remove(index);
            snapshot.refresh_output_window();
            Some(removed)
        })
    }

    pub fn set_background_song(&mut self, song: Option<BackgroundSong>) {
        self.mutate(|snapshot| snapshot.background_song = song);
    }

    /// Volumes are clamped, not validated; out-of-range input is a no-op
    /// correction rather than an error.
    pub fn set_volumes(&mut self, original: f32, added: f32) {
        self.original_volume = original.clamp(0.0, 1.0);
        self.added_volume = added.clamp(0.0, 1.0);
        self.rebuild_active();
    }

    pub fn set_gradient(&mut self, gradient: Option<Gradient>) {
        self.gradient = gradient;
        self.rebuild_active();
    }

    // Text overlay operations. Editing an overlay's fields means removing it
    // and reinserting a replacement with the same id.

    pub fn add_text(&mut self, overlay: TextOverlay) {
        self.texts.push(overlay);
        self.rebuild_active();
    }

    pub fn remove_text(&mut self, id: Uuid) -> Option<TextOverlay> {
        let index = self.texts.iter().position(|t| t.id == id)?;
        let removed = self.texts.remove(index);
        self.rebuild_active();
        Some(removed)
    }

    // Editing session state machine.

    /// Open an edit session by copying the committed snapshot.
    pub fn start_editing(&mut self) {
        self.try_start_editing()
            .unwrap_or_else(|err| panic!("start_editing: {err}"));
    }

    pub fn try_start_editing(&mut self) -> Result<(), SessionError> {
        if self.editing.is_some() {
            return Err(SessionError::EditSessionAlreadyOpen);
        }
        self.editing = Some(self.source.clone());
        self.editing_outputs = Some(self.committed.clone());
        debug!("edit session opened");
        Ok(())
    }

    /// Commit the editing snapshot and rebuild from it.
    pub fn save_edit(&mut self) {
        self.try_save_edit()
            .unwrap_or_else(|err| panic!("save_edit: {err}"));
    }

    pub fn try_save_edit(&mut self) -> Result<(), SessionError> {
        let editing = self.editing.take().ok_or(SessionError::EditSessionNotOpen)?;
        self.source = editing;
        self.editing_outputs = None;
        self.committed = self.build_from(&self.source.clone());
        debug!("edit session saved");
        Ok(())
    }

    /// Discard the editing snapshot without rebuilding; outputs remain as
    /// derived from the committed snapshot.
    pub fn cancel_edit(&mut self) {
        self.try_cancel_edit()
            .unwrap_or_else(|err| panic!("cancel_edit: {err}"));
    }

    pub fn try_cancel_edit(&mut self) -> Result<(), SessionError> {
        if self.editing.take().is_none() {
            return Err(SessionError::EditSessionNotOpen);
        }
        self.editing_outputs = None;
        debug!("edit session canceled");
        Ok(())
    }

    // Range and reorder mutations; require an open edit session.

    pub fn set_clip_trim(&mut self, index: usize, trim: Option<TimeRange>) {
        self.try_set_clip_trim(index, trim)
            .unwrap_or_else(|err| panic!("set_clip_trim: {err}"));
    }

    pub fn try_set_clip_trim(
        &mut self,
        index: usize,
        trim: Option<TimeRange>,
    ) -> Result<(), SessionError> {
        let snapshot = self.editing.as_mut().ok_or(SessionError::EditSessionNotOpen)?;
        let clip = snapshot
            .clips
            .get_mut(index)
            .ok_or(SessionError::ClipOutOfRange(index))?;
        clip.trim_range = trim;
        snapshot.refresh_output_window();
        self.rebuild_active();
        Ok(())
    }

    pub fn set_output_window(&mut self, window: TimeRange) {
        self.try_set_output_window(window)
            .unwrap_or_else(|err| panic!("set_output_window: {err}"));
    }

    pub fn try_set_output_window(&mut self, window: TimeRange) -> Result<(), SessionError> {
        let snapshot = self.editing.as_mut().ok_or(SessionError::EditSessionNotOpen)?;
        snapshot.set_output_window(window);
        self.rebuild_active();
        Ok(())
    }

    pub fn move_clip(&mut self, from: usize, to: usize) {
        self.try_move_clip(from, to)
            .unwrap_or_else(|err| panic!("move_clip: {err}"));
    }

    pub fn try_move_clip(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        let snapshot = self.editing.as_mut().ok_or(SessionError::EditSessionNotOpen)?;
        if from >= snapshot.clips.len() {
            return Err(SessionError::ClipOutOfRange(from));
        }
        if to >= snapshot.clips.len() {
            return Err(SessionError::ClipOutOfRange(to));
        }
        let clip = snapshot.clips.remove(from);
        snapshot.clips.insert(to, clip);
        snapshot.refresh_output_window();
        self.rebuild_active();
        Ok(())
    }

    // Rebuild plumbing.

    fn active_outputs(&self) -> &Outputs {
        self.editing_outputs.as_ref().unwrap_or(&self.committed)
    }

    fn mutate<R>(&mut self, op: impl FnOnce(&mut MediaSnapshot) -> R) -> R {
        let result = match self.editing.as_mut() {
            Some(editing) => op(editing),
            None => op(&mut self.source),
        };
        self.rebuild_active();
        result
    }

    fn rebuild_active(&mut self) {
        if self.editing.is_some() {
            let snapshot = self.editing.clone().unwrap();
            self.editing_outputs = Some(self.build_from(&snapshot));
        } else {
            self.committed = self.build_from(&self.source.clone());
        }
    }

    fn build_from(&self, snapshot: &MediaSnapshot) -> Outputs {
        debug!(
            clips = snapshot.clips.len(),
            window = ?snapshot.output_window,
            "rebuilding compositions"
        );
        let inputs = BuildInputs {
            snapshot,
            mode: self.mode,
            canvas: self.canvas,
            duet_origin: self.duet_origin.as_ref(),
            original_volume: self.original_volume,
            added_volume: self.added_volume,
            gradient: self.gradient,
        };
        Outputs {
            working: rebuild_working(&inputs),
            export: build_export(&inputs, &self.texts, self.renderer.as_ref()),
        }
    }
}
