//! Export composer: derives the trimmed, render-ready result.
//!
//! Recomputed from the snapshot's clip list rather than derived from the
//! working composition, which keeps the trimming arithmetic a single forward
//! walk. Text overlays are burned in here: each is rasterized once and added
//! to the overlay graph with its visibility ramp.

use tracing::warn;

use crate::compose::builder::{
    clip_layer, insert_clip_audio, insert_leading_track, insert_song, BuildInputs,
};
use crate::compose::layout::layout_for;
use crate::compose::plan::{
    Composition, ExportComposition, OverlayGraph, OverlayStill, TrackKind, VideoInstruction,
    VisibilityRamp,
};
use crate::compose::text::OverlayRenderer;
use crate::core::model::TextOverlay;
use crate::core::time::{round2, Seconds, TimeRange};

/// Build the trimmed export composition for a snapshot's output window,
/// burning in the given overlays.
pub fn build_export(
    inputs: &BuildInputs,
    texts: &[TextOverlay],
    renderer: &dyn OverlayRenderer,
) -> ExportComposition {
    let layout = layout_for(inputs.mode);
    let window = inputs.snapshot.output_window;
    let fades = layout.fades_enabled();

    let mut composition = Composition::new();
    let mut layers = Vec::new();
    let mut audio_mix = Vec::new();

    insert_leading_track(
        inputs,
        window.duration,
        &mut composition,
        &mut layers,
        &mut audio_mix,
    );

    // Forward walk over the clips: skim off the window's leading offset,
    // then take slices until the window length is spent. All loop guards go
    // through round2 so float residue cannot keep the walk alive.
    let mut trim_left: Seconds = window.start;
    let mut length_left: Seconds = window.duration;
    let mut cursor: Seconds = 0.0;

    for clip in &inputs.snapshot.clips {
        if round2(length_left) <= 0.0 {
            break;
        }
        let effective = clip.effective_duration();
        if effective <= trim_left {
            trim_left -= effective;
            continue;
        }

        let source_start = clip.source_range().start + trim_left;
        let slice = (effective - trim_left).min(length_left);
        trim_left = 0.0;
        if round2(slice) <= 0.0 {
            break;
        }
        let source = TimeRange::new(source_start, slice);

        let video = composition.add_track(TrackKind::Video, clip.asset.clone());
        if let Err(err) = composition.insert(video, source, cursor) {
            warn!(at = cursor, %err, "skipping clip whose video failed to insert");
            composition.remove_track(video);
            continue;
        }
        layers.push(clip_layer(
            &clip.asset,
            &inputs.canvas,
            layout.clip_role(),
            video,
            cursor,
            slice,
            fades,
        ));

        if clip.asset.has_audio() {
            insert_clip_audio(
                &mut composition,
                &mut audio_mix,
                clip.asset.clone(),
                source,
                cursor,
                inputs.original_volume,
            );
        }

        cursor += slice;
        length_left -= slice;
    }

    if let Some(song) = &inputs.snapshot.background_song {
        let filled_total = composition.duration;
        insert_song(
            &mut composition,
            &mut audio_mix,
            song,
            filled_total,
            inputs.added_volume,
        );
    }

    let overlay = burn_in_overlays(inputs, texts, renderer);

    let duration = composition.duration;
    ExportComposition {
        instruction: VideoInstruction {
            time_range: TimeRange::new(0.0, duration),
            layers,
        },
        composition,
        audio_mix,
        canvas: inputs.canvas,
        overlay,
    }
}

/// Rasterize each overlay once and attach its visibility ramp. The graph
/// starts from the mode's base surface (the text-mode gradient) so gradient
/// and stills ride the same secondary render graph.
fn burn_in_overlays(
    inputs: &BuildInputs,
    texts: &[TextOverlay],
    renderer: &dyn OverlayRenderer,
) -> Option<OverlayGraph> {
    let mut overlay = layout_for(inputs.mode).base_overlay(inputs.gradient);
    if texts.is_empty() {
        return overlay;
    }
    let graph = overlay.get_or_insert(OverlayGraph {
        gradient: None,
        stills: Vec::new(),
    });
    let center = inputs.canvas.center();
    for text in texts {
        graph.stills.push(OverlayStill {
            image: renderer.rasterize(&text.content),
            center,
            transform: text.transform,
            visibility: text.visible_range.map(VisibilityRamp::for_range),
        });
    }
    overlay
}
