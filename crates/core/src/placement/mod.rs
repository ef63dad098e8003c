//! Placement legality and automatic crossfades.
//!
//! Two clips on one track may overlap only by at most the transition
//! tolerance, and never with one fully containing the other. Every
//! placement-affecting mutation recomputes the fades of the tracks it
//! touched via [`apply_overlap_transitions`].

use crate::model::{ClipId, Composition, TrackId};

/// Overlaps at or below this length are treated as touching.
pub const OVERLAP_EPSILON: f64 = 1e-6;

/// Length of the shared region of two half-open intervals (negative if disjoint).
pub fn overlap_s(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    a_end.min(b_end) - a_start.max(b_start)
}

/// Whether two intervals may share a track under `transition_s`.
pub fn intervals_coexist(a: (f64, f64), b: (f64, f64), transition_s: f64) -> bool {
    let (a0, a1) = a;
    let (b0, b1) = b;
    let ov = overlap_s(a0, a1, b0, b1);
    if ov <= 0.0 {
        return true;
    }
    if transition_s <= 0.0 || ov > transition_s + OVERLAP_EPSILON {
        return false;
    }
    let contained = (a0 >= b0 && a1 <= b1) || (b0 >= a0 && b1 <= a1);
    !contained
}

/// Decides whether a clip may occupy `[start_s, start_s + duration_s)` on a
/// track. `ignore` excludes the clip being moved from the check.
pub fn can_place(
    state: &Composition,
    track_id: TrackId,
    start_s: f64,
    duration_s: f64,
    ignore: Option<ClipId>,
) -> bool {
    let candidate = (start_s, start_s + duration_s);
    let transition_s = state.transition.seconds();
    state
        .clips
        .iter()
        .filter(|c| c.track_id == track_id && Some(c.id) != ignore)
        .all(|c| intervals_coexist(candidate, (c.start_s, c.end_s()), transition_s))
}

/// First track, in track order, that accepts the interval.
pub fn find_track(
    state: &Composition,
    start_s: f64,
    duration_s: f64,
    ignore: Option<ClipId>,
) -> Option<TrackId> {
    state
        .tracks
        .iter()
        .map(|t| t.id)
        .find(|&id| can_place(state, id, start_s, duration_s, ignore))
}

/// Scans tracks cyclically starting at `preferred`.
pub fn find_track_from(
    state: &Composition,
    preferred: TrackId,
    start_s: f64,
    duration_s: f64,
    ignore: Option<ClipId>,
) -> Option<TrackId> {
    let count = state.tracks.len();
    let first = state.track_index(preferred).unwrap_or(0);
    (0..count)
        .map(|step| state.tracks[(first + step) % count].id)
        .find(|&id| can_place(state, id, start_s, duration_s, ignore))
}

/// `preferred` first, then every other track in order.
pub fn candidate_tracks(state: &Composition, preferred: TrackId) -> Vec<TrackId> {
    std::iter::once(preferred)
        .chain(state.tracks.iter().map(|t| t.id).filter(|&id| id != preferred))
        .collect()
}

/// Recomputes every fade on `track_id` from the current overlaps.
///
/// Fades are reset to zero, then each adjacent overlapping pair (ordered by
/// start, ties by id) receives `min(transition, overlap, both durations)` as
/// the earlier clip's fade-out and the later clip's fade-in.
pub fn apply_overlap_transitions(state: &mut Composition, track_id: TrackId) {
    let transition_s = state.transition.seconds();
    let mut indices: Vec<usize> = state
        .clips
        .iter()
        .enumerate()
        .filter(|(_, c)| c.track_id == track_id)
        .map(|(i, _)| i)
        .collect();
    indices.sort_by(|&a, &b| {
        let (a, b) = (&state.clips[a], &state.clips[b]);
        a.start_s.total_cmp(&b.start_s).then_with(|| a.id.cmp(&b.id))
    });

    for &i in &indices {
        state.clips[i].fade_in_s = 0.0;
        state.clips[i].fade_out_s = 0.0;
    }
    if transition_s <= 0.0 {
        return;
    }

    for pair in indices.windows(2) {
        let (a, b) = (&state.clips[pair[0]], &state.clips[pair[1]]);
        let ov = overlap_s(a.start_s, a.end_s(), b.start_s, b.end_s());
        if ov <= OVERLAP_EPSILON {
            continue;
        }
        let fade = transition_s.min(ov).min(a.duration_s).min(b.duration_s).max(0.0);
        if fade <= OVERLAP_EPSILON {
            continue;
        }
        let a = &mut state.clips[pair[0]];
        a.fade_out_s = a.fade_out_s.max(fade);
        let b = &mut state.clips[pair[1]];
        b.fade_in_s = b.fade_in_s.max(fade);
    }
}

/// Recomputes fades on every track.
pub fn reconcile_all(state: &mut Composition) {
    let ids: Vec<TrackId> = state.tracks.iter().map(|t| t.id).collect();
    for id in ids {
        apply_overlap_transitions(state, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClipDraft;

    fn state_with_transition(transition_s: f64) -> (Composition, TrackId) {
        let mut state = Composition::default();
        state.set_transition(transition_s);
        let track = state.tracks[0].id;
        (state, track)
    }

    fn place(state: &mut Composition, track: TrackId, start: f64, duration: f64) -> ClipId {
        let draft = ClipDraft {
            duration_s: duration,
            ..Default::default()
        };
        state.add_clip(draft, track, start)
    }

    #[test]
    fn disjoint_intervals_coexist_for_any_transition() {
        for transition in [0.0, 0.1, 2.5, 5.0] {
            assert!(intervals_coexist((0.0, 1.0), (1.0, 2.0), transition));
            assert!(intervals_coexist((3.0, 4.0), (0.0, 1.5), transition));
        }
    }

    #[test]
    fn small_overlaps_pass_and_large_ones_fail() {
        assert!(intervals_coexist((0.0, 1.0), (0.8, 2.0), 0.25));
        assert!(!intervals_coexist((0.0, 1.0), (0.5, 2.0), 0.25));
        assert!(!intervals_coexist((0.0, 1.0), (0.9, 2.0), 0.0));
    }

    #[test]
    fn containment_is_always_rejected() {
        assert!(!intervals_coexist((0.0, 1.0), (0.4, 0.5), 5.0));
        assert!(!intervals_coexist((0.4, 0.5), (0.0, 1.0), 5.0));
        assert!(!intervals_coexist((0.0, 0.1), (0.0, 0.1), 5.0));
    }

    #[test]
    fn can_place_ignores_the_moving_clip_and_other_tracks() {
        let (mut state, track) = state_with_transition(0.25);
        let id = place(&mut state, track, 1.0, 2.0);
        assert!(!can_place(&state, track, 1.5, 1.0, None));
        assert!(can_place(&state, track, 1.5, 1.0, Some(id)));
        let other = state.tracks[1].id;
        assert!(can_place(&state, other, 1.5, 1.0, None));
    }

    #[test]
    fn crossfades_follow_overlap() {
        let (mut state, track) = state_with_transition(0.25);
        let a = place(&mut state, track, 0.0, 2.0);
        let b = place(&mut state, track, 1.9, 1.0);
        let a = state.clip(a).unwrap();
        let b = state.clip(b).unwrap();
        assert!((a.fade_out_s - 0.1).abs() < 1e-9);
        assert!((b.fade_in_s - 0.1).abs() < 1e-9);
        assert_eq!(a.fade_in_s, 0.0);
        assert_eq!(b.fade_out_s, 0.0);
    }

    #[test]
    fn crossfade_is_bounded_by_transition_and_durations() {
        let (mut state, track) = state_with_transition(5.0);
        let a = place(&mut state, track, 0.0, 0.3);
        let b = place(&mut state, track, 0.1, 0.3);
        for id in [a, b] {
            let clip = state.clip(id).unwrap();
            assert!(clip.fade_in_s <= clip.duration_s);
            assert!(clip.fade_out_s <= clip.duration_s);
        }
        assert!((state.clip(a).unwrap().fade_out_s - 0.2).abs() < 1e-9);
    }

    #[test]
    fn crossfade_is_capped_by_the_transition() {
        let (mut state, track) = state_with_transition(0.1);
        let a = place(&mut state, track, 0.0, 2.0);
        let b = place(&mut state, track, 1.5, 1.5);
        let (a, b) = (state.clip(a).unwrap(), state.clip(b).unwrap());
        assert!((a.fade_out_s - 0.1).abs() < 1e-9);
        assert!((b.fade_in_s - 0.1).abs() < 1e-9);
        assert_eq!(a.fade_in_s, 0.0);
        assert_eq!(b.fade_out_s, 0.0);
    }

    #[test]
    fn crossfade_is_capped_by_a_short_clip() {
        let (mut state, track) = state_with_transition(5.0);
        let long = place(&mut state, track, 0.0, 2.0);
        let short = place(&mut state, track, 1.8, 0.15);
        let short_clip = state.clip(short).unwrap();
        assert!((short_clip.fade_in_s - 0.15).abs() < 1e-9);
        assert!(short_clip.fade_in_s <= short_clip.duration_s);
        assert!((state.clip(long).unwrap().fade_out_s - 0.15).abs() < 1e-9);
    }

    #[test]
    fn manual_fades_are_overwritten_by_reconciliation() {
        let (mut state, track) = state_with_transition(0.25);
        let a = place(&mut state, track, 0.0, 1.0);
        state.set_fade_in(a, 0.5);
        assert_eq!(state.clip(a).unwrap().fade_in_s, 0.5);
        apply_overlap_transitions(&mut state, track);
        assert_eq!(state.clip(a).unwrap().fade_in_s, 0.0);
    }

    #[test]
    fn cyclic_search_starts_at_the_preferred_track() {
        let (mut state, first) = state_with_transition(0.0);
        let third = state.tracks[2].id;
        place(&mut state, third, 0.0, 1.0);
        let found = find_track_from(&state, third, 0.5, 1.0, None);
        assert_eq!(found, Some(state.tracks[3].id));
        assert_eq!(find_track(&state, 0.5, 1.0, None), Some(first));
        let order = candidate_tracks(&state, third);
        assert_eq!(order[0], third);
        assert_eq!(order.len(), state.tracks.len());
    }
}
