//! Composition builder: rebuilds the full working timeline from a snapshot.
//!
//! Every mutation rebuilds from scratch; there is no incremental diffing.
//! Clips are walked in order and inserted at a running cursor. Each video
//! track gets one layer instruction alive for the whole timeline, and
//! concatenation happens purely by toggling opacity at the clip boundaries.

use tracing::warn;

use crate::compose::layout::{layout_for, LayoutContext};
use crate::compose::plan::{
    AudioMixInput, Composition, LayerInstruction, OpacityKeyframe, TrackKind, VideoInstruction,
    WorkingComposition,
};
use crate::compose::transform::{self, CanvasSize, LayerRole};
use crate::core::asset::MediaAsset;
use crate::core::model::{BackgroundSong, CompositionMode, Gradient, MediaSnapshot};
use crate::core::time::{round2, Seconds, TimeRange};

/// Everything a rebuild reads besides the snapshot itself.
pub struct BuildInputs<'a> {
    pub snapshot: &'a MediaSnapshot,
    pub mode: CompositionMode,
    pub canvas: CanvasSize,
    pub duet_origin: Option<&'a MediaAsset>,
    /// Volume applied to each clip's own audio.
    pub original_volume: f32,
    /// Volume applied to the background song.
    pub added_volume: f32,
    pub gradient: Option<Gradient>,
}

/// Rebuild the full working composition used for live preview.
pub fn rebuild_working(inputs: &BuildInputs) -> WorkingComposition {
    let layout = layout_for(inputs.mode);
    let total = inputs.snapshot.total_duration();
    let fades = layout.fades_enabled();

    let mut composition = Composition::new();
    let mut layers = Vec::new();
    let mut audio_mix = Vec::new();

    insert_leading_track(inputs, total, &mut composition, &mut layers, &mut audio_mix);

    let mut cursor: Seconds = 0.0;
    for clip in &inputs.snapshot.clips {
        let source = clip.source_range();
        if source.is_empty() {
            continue;
        }
        let length = source.duration;

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
            length,
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

        cursor += length;
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

    let duration = composition.duration;
    WorkingComposition {
        instruction: VideoInstruction {
            time_range: TimeRange::new(0.0, duration),
            layers,
        },
        composition,
        audio_mix,
        canvas: inputs.canvas,
        overlay: layout.base_overlay(inputs.gradient),
    }
}

/// One full-timeline layer instruction for a clip inserted at `cursor`:
/// transform fixed at insert time, shown at `cursor`, hidden again at
/// `cursor + length`. Modes without fades leave the layer always visible.
pub(crate) fn clip_layer(
    asset: &MediaAsset,
    canvas: &CanvasSize,
    role: LayerRole,
    track: usize,
    cursor: Seconds,
    length: Seconds,
    fades: bool,
) -> LayerInstruction {
    let placement = match asset.natural_size() {
        Some(natural) => transform::resolve(natural, asset.orientation(), canvas, role),
        // Audio-only assets never reach here through the builder; fall back
        // to an untouched canvas placement.
        None => transform::Placement {
            transform: asset.orientation(),
            crop: None,
        },
    };
    let opacity = if fades {
        vec![
            OpacityKeyframe {
                at: cursor,
                value: 1.0,
            },
            OpacityKeyframe {
                at: cursor + length,
                value: 0.0,
            },
        ]
    } else {
        Vec::new()
    };
    LayerInstruction {
        track,
        transform: placement.transform,
        crop: placement.crop,
        opacity,
    }
}

/// Insert the mode's pinned leading layer (the duet origin), if any. Its
/// opacity fades at its own end so later clips stay visible afterwards.
pub(crate) fn insert_leading_track(
    inputs: &BuildInputs,
    total: Seconds,
    composition: &mut Composition,
    layers: &mut Vec<LayerInstruction>,
    audio_mix: &mut Vec<AudioMixInput>,
) {
    let ctx = LayoutContext {
        canvas: &inputs.canvas,
        duet_origin: inputs.duet_origin,
        total,
    };
    let Some(leading) = layout_for(inputs.mode).leading_track(&ctx) else {
        return;
    };
    let track = composition.add_track(TrackKind::Video, leading.asset.clone());
    if let Err(err) = composition.insert(track, leading.range, 0.0) {
        warn!(%err, "omitting leading layer that failed to insert");
        composition.remove_track(track);
        return;
    }
    layers.push(LayerInstruction {
        track,
        transform: leading.placement.transform,
        crop: leading.placement.crop,
        opacity: vec![
            OpacityKeyframe { at: 0.0, value: 1.0 },
            OpacityKeyframe {
                at: leading.range.end(),
                value: 0.0,
            },
        ],
    });
    if leading.asset.has_audio() {
        insert_clip_audio(
            composition,
            audio_mix,
            leading.asset,
            leading.range,
            0.0,
            inputs.original_volume,
        );
    }
}

/// Insert a clip's audio track; a failure removes only that track and the
/// video composition continues.
pub(crate) fn insert_clip_audio(
    composition: &mut Composition,
    audio_mix: &mut Vec<AudioMixInput>,
    asset: MediaAsset,
    source: TimeRange,
    at: Seconds,
    volume: f32,
) {
    let track = composition.add_track(TrackKind::Audio, asset);
    match composition.insert(track, source, at) {
        Ok(()) => audio_mix.push(AudioMixInput { track, volume }),
        Err(err) => {
            warn!(at, %err, "omitting audio track that failed to insert");
            composition.remove_track(track);
        }
    }
}

/// Tile the background song over `total`, looping it seamlessly: each pass
/// inserts `min(total - filled, song length)` starting at the song's offset.
pub(crate) fn insert_song(
    composition: &mut Composition,
    audio_mix: &mut Vec<AudioMixInput>,
    song: &BackgroundSong,
    total: Seconds,
    volume: f32,
) {
    let song_length = song.duration();
    if round2(song_length) <= 0.0 || round2(total) <= 0.0 {
        warn!(song_length, "skipping background song with no playable length");
        return;
    }
    let track = composition.add_track(TrackKind::Audio, song.asset.clone());
    let mut filled: Seconds = 0.0;
    while round2(total - filled) > 0.0 {
        let slice = (total - filled).min(song_length);
        if let Err(err) =
            composition.insert(track, TimeRange::new(song.start_offset, slice), filled)
        {
            warn!(filled, %err, "omitting background song that failed to insert");
            composition.remove_track(track);
            return;
        }
        filled += slice;
    }
    audio_mix.push(AudioMixInput { track, volume });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix3, SquareMatrix};
    use std::path::PathBuf;

    use crate::core::asset::Size;
    use crate::core::model::VideoClip;

    fn canvas() -> CanvasSize {
        CanvasSize::new(1080.0, 1920.0)
    }

    fn video_asset(seconds: Seconds) -> MediaAsset {
        MediaAsset::video_file(
            PathBuf::from("clip.mp4"),
            seconds,
            Size::new(1080.0, 1920.0),
            Matrix3::identity(),
            true,
        )
    }

    fn snapshot_of(durations: &[Seconds]) -> MediaSnapshot {
        let mut snapshot = MediaSnapshot::empty();
        for &seconds in durations {
            snapshot.clips.push(VideoClip::new(video_asset(seconds)));
        }
        snapshot.refresh_output_window();
        snapshot
    }

    fn inputs<'a>(
        snapshot: &'a MediaSnapshot,
        mode: CompositionMode,
        duet_origin: Option<&'a MediaAsset>,
    ) -> BuildInputs<'a> {
        BuildInputs {
            snapshot,
            mode,
            canvas: canvas(),
            duet_origin,
            original_volume: 1.0,
            added_volume: 0.6,
            gradient: None,
        }
    }

    #[test]
    fn test_empty_snapshot_builds_zero_length_composition() {
        let snapshot = MediaSnapshot::empty();
        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Recorded, None));
        assert_eq!(working.composition.duration, 0.0);
        assert!(working.instruction.layers.is_empty());
        assert!(working.audio_mix.is_empty());
    }

    #[test]
    fn test_clips_chain_at_running_cursor() {
        let snapshot = snapshot_of(&[4.0, 6.0]);
        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Recorded, None));

        assert_eq!(working.composition.duration, 10.0);
        assert_eq!(working.instruction.layers.len(), 2);
        assert_eq!(working.instruction.time_range, TimeRange::new(0.0, 10.0));

        // Opacity toggles implement the concatenation.
        let first = &working.instruction.layers[0];
        assert_eq!(first.opacity_at(0.0), 1.0);
        assert_eq!(first.opacity_at(4.0), 0.0);
        let second = &working.instruction.layers[1];
        assert_eq!(second.opacity_at(3.9), 0.0);
        assert_eq!(second.opacity_at(4.0), 1.0);
        assert_eq!(second.opacity_at(10.0), 0.0);

        // One audio envelope entry per clip.
        assert_eq!(working.audio_mix.len(), 2);
        assert!(working.audio_mix.iter().all(|m| m.volume == 1.0));
    }

    #[test]
    fn test_trimmed_clip_inserts_its_trim_range() {
        let mut snapshot = snapshot_of(&[10.0]);
        snapshot.clips[0].trim_range = Some(TimeRange::new(2.0, 3.0));
        snapshot.refresh_output_window();

        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Recorded, None));
        assert_eq!(working.composition.duration, 3.0);
        let track = &working.composition.tracks[0];
        assert_eq!(track.segments[0].source, TimeRange::new(2.0, 3.0));
    }

    #[test]
    fn test_song_is_tiled_over_the_whole_duration() {
        let mut snapshot = snapshot_of(&[12.0, 8.0]);
        snapshot.background_song = Some(BackgroundSong::new(
            MediaAsset::audio_file(PathBuf::from("song.m4a"), 7.0),
            0.0,
        ));
        snapshot.refresh_output_window();

        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Recorded, None));
        let song_track = working
            .composition
            .tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .last()
            .unwrap();

        // 7s song over 20s: [0-7, 7-14, 14-20]; the final slice truncates.
        assert_eq!(song_track.segments.len(), 3);
        assert_eq!(song_track.segments[0].at, 0.0);
        assert_eq!(song_track.segments[1].at, 7.0);
        assert_eq!(song_track.segments[2].at, 14.0);
        assert_eq!(song_track.segments[2].source.duration, 6.0);

        let song_mix = working.audio_mix.last().unwrap();
        assert_eq!(song_mix.track, song_track.id);
        assert_eq!(song_mix.volume, 0.6);
    }

    #[test]
    fn test_song_with_no_playable_length_is_omitted() {
        let mut snapshot = snapshot_of(&[5.0]);
        snapshot.background_song = Some(BackgroundSong::new(
            MediaAsset::audio_file(PathBuf::from("song.m4a"), 7.0),
            7.0,
        ));
        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Recorded, None));
        // Only the clip's own audio remains.
        assert_eq!(working.audio_mix.len(), 1);
    }

    #[test]
    fn test_duet_leading_layer_bounded_by_story_total() {
        let snapshot = snapshot_of(&[5.0]);
        let origin = video_asset(8.0);
        let working = rebuild_working(&inputs(&snapshot, CompositionMode::Duet, Some(&origin)));

        // Leading origin layer first, opacity window exactly [0, 5].
        let leading = &working.instruction.layers[0];
        assert_eq!(
            leading.opacity,
            vec![
                OpacityKeyframe { at: 0.0, value: 1.0 },
                OpacityKeyframe { at: 5.0, value: 0.0 },
            ]
        );
        assert!(leading.crop.is_some());

        // The recording clip is cropped to the lower half.
        let recording = &working.instruction.layers[1];
        assert!(recording.crop.unwrap().y > 0.0);
    }

    #[test]
    fn test_text_mode_has_gradient_overlay_and_no_fades() {
        let blank = MediaAsset::blank_canvas(Size::new(1080.0, 1920.0));
        let mut snapshot = MediaSnapshot::empty();
        snapshot.clips.push(VideoClip::new(blank));
        snapshot.refresh_output_window();

        let gradient = Gradient {
            top: [20, 20, 80, 255],
            bottom: [120, 20, 20, 255],
        };
        let mut build = inputs(&snapshot, CompositionMode::Text, None);
        build.gradient = Some(gradient);

        let working = rebuild_working(&build);
        assert_eq!(working.overlay.as_ref().unwrap().gradient, Some(gradient));
        assert!(working.instruction.layers[0].opacity.is_empty());
        // The blank canvas carries no audio.
        assert!(working.audio_mix.is_empty());
    }
}
