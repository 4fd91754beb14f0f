//! The frame engine: advances the active block of the loaded script once
//! per tick and writes interpolated poses into the kite table.
//!
//! Interpolation is a pure function of (elapsed time, start pose, target),
//! so re-evaluating at the same cumulative elapsed time is idempotent.

use std::collections::{BTreeMap, BTreeSet};

use crate::action::Action;
use crate::frame::{Block, BuildError, Script, Track};
use crate::kite::{rotate_about, Kite, KiteId, Pose};

/// Script progress as broadcast to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockProgress {
    pub script_id: u32,
    pub block_count: u32,
    pub block_index: u32,
}

/// What one `advance` call did.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tick {
    /// The block index moved during this tick.
    pub block_changed: bool,

    /// Progress snapshot, present whenever a script is loaded.
    pub progress: Option<BlockProgress>,

    /// The script reached its terminal state during this tick.
    pub script_finished: bool,
}

/// Owns the kite table and at most one script.
#[derive(Debug, Default)]
pub struct Engine {
    kites: BTreeMap<KiteId, Kite>,
    script: Option<Script>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a kite. Replaces any existing kite with the same id.
    pub fn add_kite(&mut self, kite: Kite) {
        self.kites.insert(kite.id, kite);
    }

    /// Insert a default kite under `id`.
    pub fn create_kite(&mut self, id: KiteId) {
        self.add_kite(Kite::new(id));
    }

    /// Remove a kite. Idempotent: removing an absent id is a no-op.
    pub fn remove_kite(&mut self, id: KiteId) -> Option<Kite> {
        self.kites.remove(&id)
    }

    pub fn kite(&self, id: KiteId) -> Option<&Kite> {
        self.kites.get(&id)
    }

    pub fn kite_mut(&mut self, id: KiteId) -> Option<&mut Kite> {
        self.kites.get_mut(&id)
    }

    /// Kites in id order (deterministic snapshot order).
    pub fn kites(&self) -> impl Iterator<Item = &Kite> {
        self.kites.values()
    }

    pub fn kite_count(&self) -> usize {
        self.kites.len()
    }

    pub fn known_kites(&self) -> BTreeSet<KiteId> {
        self.kites.keys().copied().collect()
    }

    /// Load a script after validating every referenced kite id.
    ///
    /// A failed load leaves the previously loaded script untouched.
    pub fn load_script(&mut self, script: Script) -> Result<(), BuildError> {
        script.validate_kites(&self.known_kites())?;
        log::info!(
            "script {} loaded: {} blocks over {} kites",
            script.id,
            script.block_count(),
            script.referenced_kites().len()
        );
        self.script = Some(script);
        Ok(())
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn clear_script(&mut self) {
        self.script = None;
    }

    /// A script is loaded, unpaused, and not yet finished.
    pub fn script_active(&self) -> bool {
        self.script
            .as_ref()
            .map(|s| s.running && !s.finished)
            .unwrap_or(false)
    }

    /// Pause/resume playback. Returns the new running state, if a script
    /// is loaded.
    pub fn toggle(&mut self) -> Option<bool> {
        let script = self.script.as_mut()?;
        script.running = !script.running;
        log::info!(
            "script {} {}",
            script.id,
            if script.running { "resumed" } else { "paused" }
        );
        Some(script.running)
    }

    pub fn progress(&self) -> Option<BlockProgress> {
        self.script.as_ref().map(|s| BlockProgress {
            script_id: s.id,
            block_count: s.block_count() as u32,
            block_index: s.block_index() as u32,
        })
    }

    /// Advance playback by `dt` seconds of wall time.
    pub fn advance(&mut self, dt: f32) -> Tick {
        let mut tick = Tick::default();

        let Some(script) = self.script.as_mut() else {
            return tick;
        };
        if !script.running || script.finished {
            return tick;
        }

        let mut quit = false;
        if let Some(block) = script.current_block_mut() {
            for track in block.tracks_mut() {
                if step_track(&mut self.kites, track, dt) {
                    quit = true;
                }
            }
        }

        if quit {
            script.finished = true;
            tick.script_finished = true;
            log::info!("script {} finished by quit action", script.id);
        }

        // Consecutive empty or just-completed blocks all resolve within
        // this tick.
        while !script.finished && script.current_block().map_or(false, |b| b.is_done()) {
            script.advance_block();
            tick.block_changed = true;
            if script.finished {
                tick.script_finished = true;
                log::info!("script {} finished", script.id);
            }
        }

        tick.progress = self.progress();
        tick
    }

    /// Force-complete the current block: every remaining frame of every
    /// track snaps to its final pose instantly.
    pub fn skip_block(&mut self) -> Tick {
        let mut tick = Tick::default();
        let Some(script) = self.script.as_mut() else {
            return tick;
        };
        if script.finished {
            return tick;
        }

        let mut quit = false;
        if let Some(block) = script.current_block_mut() {
            if complete_block(&mut self.kites, block) {
                quit = true;
            }
        }
        if quit {
            script.finished = true;
            tick.script_finished = true;
        } else {
            script.advance_block();
            if script.finished {
                tick.script_finished = true;
            }
        }
        tick.block_changed = true;
        tick.progress = self.progress();
        tick
    }

    /// Fast-forward to `block_index` by force-completing intervening
    /// blocks. Backward scrubs are ignored: finished flags never reverse.
    pub fn scrub(&mut self, block_index: u32) -> Tick {
        let mut tick = Tick::default();
        let Some(script) = self.script.as_ref() else {
            return tick;
        };
        if (block_index as usize) < script.block_index() {
            log::warn!(
                "ignoring backward scrub to block {} (at {})",
                block_index,
                script.block_index()
            );
            tick.progress = self.progress();
            return tick;
        }

        while let Some(script) = self.script.as_ref() {
            if script.finished || script.block_index() >= block_index as usize {
                break;
            }
            let step = self.skip_block();
            tick.block_changed |= step.block_changed;
            tick.script_finished |= step.script_finished;
        }
        tick.progress = self.progress();
        tick
    }
}

/// Step one track by `dt`. Returns true if a `Quit` action fired.
fn step_track(kites: &mut BTreeMap<KiteId, Kite>, track: &mut Track, dt: f32) -> bool {
    if track.is_done() {
        return false;
    }

    let (action, duration, kite_ids, started, elapsed) = {
        let frame = track.current_mut().expect("track not done but no frame");
        frame.elapsed += dt;
        (
            frame.action,
            frame.duration,
            frame.kite_ids.clone(),
            frame.started,
            frame.elapsed,
        )
    };

    if action.is_timed_only() {
        if elapsed >= duration {
            let frame = track.current_mut().expect("frame vanished mid-step");
            frame.finished = true;
            track.advance_cursor();
            return matches!(action, Action::Quit);
        }
        return false;
    }

    if !started {
        latch_start_poses(kites, track, &kite_ids);
        track.current_mut().expect("frame vanished mid-step").started = true;
    }

    let t = if duration <= 0.0 {
        1.0
    } else {
        (elapsed / duration).clamp(0.0, 1.0)
    };

    for &id in &kite_ids {
        let kite = kites.get_mut(&id).expect("frame references missing kite");
        let pose = interpolate(kite, action, t);
        kite.set_pose(pose);
    }

    if t >= 1.0 {
        let frame = track.current_mut().expect("frame vanished mid-step");
        frame.finished = true;
        for &id in &kite_ids {
            let pose = kites.get(&id).expect("frame references missing kite").pose();
            track.cache_pose(id, pose);
        }
        track.advance_cursor();
    }
    false
}

/// Latch each targeted kite's start pose: the track cache entry if this
/// track touched the kite before, its live pose otherwise.
fn latch_start_poses(kites: &mut BTreeMap<KiteId, Kite>, track: &Track, ids: &[KiteId]) {
    for &id in ids {
        let start = track.cached_start(id).unwrap_or_else(|| {
            kites
                .get(&id)
                .expect("frame references missing kite")
                .pose()
        });
        let kite = kites.get_mut(&id).expect("frame references missing kite");
        kite.old_center = start.center;
        kite.old_angle = start.angle;
    }
}

/// Pose at fraction `t` of the action, from the kite's latched start pose.
fn interpolate(kite: &Kite, action: Action, t: f32) -> Pose {
    let start = kite.start_pose();
    match action {
        Action::Move(target) => Pose::new(start.center.lerp(target, t), start.angle),
        Action::MoveAdd(delta) => Pose::new(start.center.lerp(start.center + delta, t), start.angle),
        Action::Rotation(target) => {
            Pose::new(start.center, start.angle + (target - start.angle) * t)
        }
        Action::RotationAdd(delta) => Pose::new(start.center, start.angle + delta * t),
        Action::TipRotation(tip, target) => {
            tip_rotate(kite, start, tip, (target - start.angle) * t)
        }
        Action::TipRotationAdd(tip, delta) => tip_rotate(kite, start, tip, delta * t),
        Action::Wait | Action::Quit => start,
    }
}

/// Rotate the start pose about a wingtip by `swept` degrees.
///
/// The pivot is recomputed from the shape parameters every step and is
/// never itself interpolated; only the resulting center/angle are.
fn tip_rotate(kite: &Kite, start: Pose, tip: crate::kite::Tip, swept: f32) -> Pose {
    let pivot = kite.tip(tip, start);
    Pose::new(
        rotate_about(start.center, pivot, swept),
        start.angle + swept,
    )
}

/// Apply every remaining frame of every track at its final pose.
/// Returns true if a `Quit` action was consumed.
fn complete_block(kites: &mut BTreeMap<KiteId, Kite>, block: &mut Block) -> bool {
    let mut quit = false;
    for track in block.tracks_mut() {
        while !track.is_done() {
            let (action, kite_ids, started) = {
                let frame = track.current().expect("track not done but no frame");
                (frame.action, frame.kite_ids.clone(), frame.started)
            };

            if action.is_timed_only() {
                if matches!(action, Action::Quit) {
                    quit = true;
                }
            } else {
                if !started {
                    latch_start_poses(kites, track, &kite_ids);
                }
                for &id in &kite_ids {
                    let kite = kites.get_mut(&id).expect("frame references missing kite");
                    let pose = interpolate(kite, action, 1.0);
                    kite.set_pose(pose);
                }
                for &id in &kite_ids {
                    let pose = kites.get(&id).expect("frame references missing kite").pose();
                    track.cache_pose(id, pose);
                }
            }

            let frame = track.current_mut().expect("frame vanished mid-step");
            frame.finished = true;
            track.advance_cursor();
        }
    }
    quit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::kite::Tip;
    use glam::Vec2;

    fn engine_with_kites(n: u32) -> Engine {
        let mut engine = Engine::new();
        for i in 0..n {
            engine.create_kite(KiteId(i));
        }
        engine
    }

    fn single_track_script(frames: Vec<Frame>) -> Script {
        let block = Block::new(vec![Track::new(frames)]).unwrap();
        Script::new(0, vec![block])
    }

    #[test]
    fn test_interpolation_monotonic_and_exact() {
        let mut engine = engine_with_kites(1);
        let frame = Frame::new(Action::Move(Vec2::new(100.0, 0.0)), vec![KiteId(0)], 2.0).unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        let mut last_x = 0.0;
        for _ in 0..8 {
            engine.advance(0.25);
            let x = engine.kite(KiteId(0)).unwrap().center.x;
            assert!(x >= last_x);
            last_x = x;
        }
        // Saturates exactly at the target at t == 1.
        assert!((last_x - 100.0).abs() < 0.001);
        assert!(engine.script().unwrap().finished);
    }

    #[test]
    fn test_zero_duration_is_instant() {
        let mut engine = engine_with_kites(1);
        let frame = Frame::new(Action::Move(Vec2::new(5.0, 7.0)), vec![KiteId(0)], 0.0).unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        // One advance, any dt.
        engine.advance(0.0001);
        let kite = engine.kite(KiteId(0)).unwrap();
        assert!((kite.center.x - 5.0).abs() < 0.001);
        assert!((kite.center.y - 7.0).abs() < 0.001);
        assert!(engine.script().unwrap().finished);
    }

    #[test]
    fn test_block_waits_for_slowest_track() {
        let mut engine = engine_with_kites(2);
        let fast = Track::new(vec![
            Frame::new(Action::Move(Vec2::new(10.0, 0.0)), vec![KiteId(0)], 1.0).unwrap(),
        ]);
        let slow = Track::new(vec![
            Frame::new(Action::Move(Vec2::new(10.0, 0.0)), vec![KiteId(1)], 3.0).unwrap(),
        ]);
        let first = Block::new(vec![fast, slow]).unwrap();
        let second = Block::new(vec![Track::new(vec![
            Frame::new(Action::Wait, vec![KiteId(0)], 1.0).unwrap(),
        ])])
        .unwrap();
        engine
            .load_script(Script::new(0, vec![first, second]))
            .unwrap();

        // dt = 0.5: the block must complete on tick 6 (3.0 s), not tick 2.
        for tick in 1..=6 {
            let report = engine.advance(0.5);
            if tick < 6 {
                assert!(!report.block_changed, "advanced early at tick {}", tick);
                assert_eq!(engine.script().unwrap().block_index(), 0);
            } else {
                assert!(report.block_changed);
                assert_eq!(engine.script().unwrap().block_index(), 1);
            }
        }
    }

    #[test]
    fn test_relative_chaining_independent_of_tick_rate() {
        for dt in [0.5, 0.1, 0.037] {
            let mut engine = engine_with_kites(1);
            let frames = vec![
                Frame::new(Action::MoveAdd(Vec2::new(10.0, 0.0)), vec![KiteId(0)], 1.0).unwrap(),
                Frame::new(Action::MoveAdd(Vec2::new(0.0, 10.0)), vec![KiteId(0)], 1.0).unwrap(),
            ];
            engine.load_script(single_track_script(frames)).unwrap();

            while !engine.script().unwrap().finished {
                engine.advance(dt);
            }
            let kite = engine.kite(KiteId(0)).unwrap();
            assert!((kite.center.x - 10.0).abs() < 0.001, "dt {}", dt);
            assert!((kite.center.y - 10.0).abs() < 0.001, "dt {}", dt);
        }
    }

    #[test]
    fn test_wait_consumes_time_without_moving() {
        let mut engine = engine_with_kites(1);
        engine.kite_mut(KiteId(0)).unwrap().center = Vec2::new(3.0, 4.0);
        let frame = Frame::new(Action::Wait, vec![KiteId(0)], 1.0).unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        engine.advance(0.5);
        assert!(!engine.script().unwrap().finished);
        engine.advance(0.5);
        assert!(engine.script().unwrap().finished);
        let kite = engine.kite(KiteId(0)).unwrap();
        assert!((kite.center.x - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_quit_terminates_script() {
        let mut engine = engine_with_kites(1);
        let block_a = Block::new(vec![Track::new(vec![
            Frame::new(Action::Quit, vec![KiteId(0)], 0.0).unwrap(),
        ])])
        .unwrap();
        let block_b = Block::new(vec![Track::new(vec![
            Frame::new(Action::Move(Vec2::new(99.0, 0.0)), vec![KiteId(0)], 1.0).unwrap(),
        ])])
        .unwrap();
        engine
            .load_script(Script::new(0, vec![block_a, block_b]))
            .unwrap();

        let report = engine.advance(0.1);
        assert!(report.script_finished);
        assert!(engine.script().unwrap().finished);

        // Terminal: further ticks do nothing.
        engine.advance(10.0);
        assert!((engine.kite(KiteId(0)).unwrap().center.x).abs() < 0.001);
    }

    #[test]
    fn test_tip_rotation_about_right_wingtip() {
        let mut engine = engine_with_kites(1);
        // Default shape: half_span = 50, right tip at (50, 0).
        let frame = Frame::new(
            Action::TipRotationAdd(Tip::Right, 180.0),
            vec![KiteId(0)],
            1.0,
        )
        .unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        for _ in 0..4 {
            engine.advance(0.25);
        }
        let kite = engine.kite(KiteId(0)).unwrap();
        assert!((kite.center.x - 100.0).abs() < 0.01);
        assert!(kite.center.y.abs() < 0.01);
        assert!((kite.angle - 180.0).abs() < 0.01);
    }

    #[test]
    fn test_absolute_tip_rotation_reaches_target_angle() {
        let mut engine = engine_with_kites(1);
        engine.kite_mut(KiteId(0)).unwrap().angle = 30.0;
        let frame = Frame::new(
            Action::TipRotation(Tip::Left, 90.0),
            vec![KiteId(0)],
            2.0,
        )
        .unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        while !engine.script().unwrap().finished {
            engine.advance(0.1);
        }
        assert!((engine.kite(KiteId(0)).unwrap().angle - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_load_rejects_unknown_kite_and_keeps_previous() {
        let mut engine = engine_with_kites(1);
        let good = single_track_script(vec![
            Frame::new(Action::Wait, vec![KiteId(0)], 1.0).unwrap()
        ]);
        engine.load_script(good).unwrap();

        let bad = single_track_script(vec![
            Frame::new(Action::Wait, vec![KiteId(7)], 1.0).unwrap()
        ]);
        assert_eq!(
            engine.load_script(bad).unwrap_err(),
            BuildError::UnknownKite(KiteId(7))
        );
        // Previous script still loaded and playable.
        assert!(engine.script_active());
    }

    #[test]
    fn test_toggle_pauses_playback() {
        let mut engine = engine_with_kites(1);
        let frame = Frame::new(Action::Move(Vec2::new(10.0, 0.0)), vec![KiteId(0)], 1.0).unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        assert_eq!(engine.toggle(), Some(false));
        engine.advance(0.5);
        assert!(engine.kite(KiteId(0)).unwrap().center.x.abs() < 0.001);

        assert_eq!(engine.toggle(), Some(true));
        engine.advance(0.5);
        assert!(engine.kite(KiteId(0)).unwrap().center.x > 0.001);
    }

    #[test]
    fn test_skip_block_applies_final_poses() {
        let mut engine = engine_with_kites(2);
        let a = Track::new(vec![
            Frame::new(Action::Move(Vec2::new(10.0, 10.0)), vec![KiteId(0)], 5.0).unwrap(),
            Frame::new(Action::MoveAdd(Vec2::new(5.0, 0.0)), vec![KiteId(0)], 5.0).unwrap(),
        ]);
        let b = Track::new(vec![
            Frame::new(Action::Rotation(90.0), vec![KiteId(1)], 5.0).unwrap(),
        ]);
        let block = Block::new(vec![a, b]).unwrap();
        engine.load_script(Script::new(0, vec![block])).unwrap();

        let report = engine.skip_block();
        assert!(report.block_changed);
        assert!(report.script_finished);

        let k0 = engine.kite(KiteId(0)).unwrap();
        assert!((k0.center.x - 15.0).abs() < 0.001);
        assert!((k0.center.y - 10.0).abs() < 0.001);
        assert!((engine.kite(KiteId(1)).unwrap().angle - 90.0).abs() < 0.001);
    }

    #[test]
    fn test_scrub_fast_forwards_and_ignores_backward() {
        let mut engine = engine_with_kites(1);
        let mut blocks = Vec::new();
        for i in 0..4 {
            let frame = Frame::new(
                Action::Move(Vec2::new(i as f32 * 10.0, 0.0)),
                vec![KiteId(0)],
                1.0,
            )
            .unwrap();
            blocks.push(Block::new(vec![Track::new(vec![frame])]).unwrap());
        }
        engine.load_script(Script::new(0, blocks)).unwrap();

        engine.scrub(2);
        assert_eq!(engine.script().unwrap().block_index(), 2);
        // Block 1's target was (10, 0).
        assert!((engine.kite(KiteId(0)).unwrap().center.x - 10.0).abs() < 0.001);

        // Backward scrub is a no-op.
        engine.scrub(0);
        assert_eq!(engine.script().unwrap().block_index(), 2);
    }

    #[test]
    fn test_empty_block_resolves_instantly() {
        let mut engine = engine_with_kites(1);
        let empty = Block::new(vec![]).unwrap();
        let real = Block::new(vec![Track::new(vec![
            Frame::new(Action::Wait, vec![KiteId(0)], 1.0).unwrap(),
        ])])
        .unwrap();
        engine
            .load_script(Script::new(0, vec![empty, real]))
            .unwrap();

        let report = engine.advance(0.1);
        assert!(report.block_changed);
        assert_eq!(engine.script().unwrap().block_index(), 1);
    }

    #[test]
    fn test_remove_kite_is_idempotent() {
        let mut engine = engine_with_kites(2);
        assert!(engine.remove_kite(KiteId(1)).is_some());
        // Removing again leaves the table exactly as one removal did.
        assert!(engine.remove_kite(KiteId(1)).is_none());
        assert_eq!(engine.kite_count(), 1);
        assert!(engine.kite(KiteId(0)).is_some());
    }

    #[test]
    fn test_idempotent_under_repeated_zero_dt() {
        let mut engine = engine_with_kites(1);
        let frame = Frame::new(Action::Move(Vec2::new(100.0, 0.0)), vec![KiteId(0)], 2.0).unwrap();
        engine.load_script(single_track_script(vec![frame])).unwrap();

        engine.advance(1.0);
        let x = engine.kite(KiteId(0)).unwrap().center.x;
        // Re-evaluating with no elapsed time must not accumulate.
        engine.advance(0.0);
        engine.advance(0.0);
        assert!((engine.kite(KiteId(0)).unwrap().center.x - x).abs() < 0.0001);
    }
}
