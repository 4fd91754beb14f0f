//! Frames, tracks, blocks, and scripts: the declarative timeline the
//! engine executes.
//!
//! A `Frame` binds one [`Action`] to a set of kites for a duration. A
//! `Track` is a strictly sequential list of frames. A `Block` is a set of
//! tracks running concurrently; a `Script` is an ordered list of blocks
//! executed one at a time. Only `finished` flags and the per-track pose
//! cache mutate during playback; everything else is read-only after build.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::action::Action;
use crate::kite::{KiteId, Pose};

/// Rejection reasons raised while assembling a script, before any frame
/// ever executes. Runtime never sees malformed structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("frame names no kites")]
    EmptyKiteSet,

    #[error("kite {0} is not in the active kite set")]
    UnknownKite(KiteId),

    #[error("kite {0} appears in two concurrent tracks of one block")]
    DuplicateKite(KiteId),
}

/// One timed action bound to a set of target kites.
///
/// The kite id set is order-irrelevant and non-empty. `duration == 0`
/// means the action applies instantaneously on the first tick.
#[derive(Debug, Clone)]
pub struct Frame {
    pub action: Action,
    pub kite_ids: Vec<KiteId>,
    pub duration: f32,

    /// Position within the owning track, assigned by [`Track::new`].
    pub index: usize,

    /// Time accumulated against this frame so far.
    pub elapsed: f32,

    /// Start poses have been latched for this frame.
    pub started: bool,

    /// One-directional false -> true within a single playback pass.
    pub finished: bool,
}

impl Frame {
    /// Build a frame, rejecting an empty kite set.
    pub fn new(action: Action, kite_ids: Vec<KiteId>, duration: f32) -> Result<Self, BuildError> {
        if kite_ids.is_empty() {
            return Err(BuildError::EmptyKiteSet);
        }
        Ok(Self {
            action,
            kite_ids,
            duration,
            index: 0,
            elapsed: 0.0,
            started: false,
            finished: false,
        })
    }
}

/// One kite-group's private, sequential frame list.
///
/// `Frame[i]` only starts once `Frame[i-1]` finished. The pose cache
/// remembers the last written pose per kite so the next frame targeting
/// that kite starts from where the previous one left it.
#[derive(Debug, Clone, Default)]
pub struct Track {
    frames: Vec<Frame>,
    cursor: usize,
    cache: HashMap<KiteId, Pose>,
}

impl Track {
    pub fn new(mut frames: Vec<Frame>) -> Self {
        for (i, frame) in frames.iter_mut().enumerate() {
            frame.index = i;
        }
        Self {
            frames,
            cursor: 0,
            cache: HashMap::new(),
        }
    }

    /// The frame currently executing, if any remain.
    pub fn current(&self) -> Option<&Frame> {
        self.frames.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.get_mut(self.cursor)
    }

    /// All frames have finished.
    pub fn is_done(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    /// Move to the next frame. Call only after the current one finished.
    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
    }

    /// Last known pose for a kite touched by this track, if any.
    pub fn cached_start(&self, id: KiteId) -> Option<Pose> {
        self.cache.get(&id).copied()
    }

    /// Record the final pose of a finished frame for a kite.
    pub fn cache_pose(&mut self, id: KiteId, pose: Pose) {
        self.cache.insert(id, pose);
    }

    /// Every kite id referenced anywhere in this track.
    pub fn kite_ids(&self) -> BTreeSet<KiteId> {
        self.frames
            .iter()
            .flat_map(|f| f.kite_ids.iter().copied())
            .collect()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// A set of tracks executed concurrently.
///
/// The block completes only when every track has finished all its frames.
/// A block with zero tracks is instantly finished.
#[derive(Debug, Clone, Default)]
pub struct Block {
    tracks: Vec<Track>,
}

impl Block {
    /// Build a block, rejecting a kite id shared between two tracks.
    ///
    /// A shared id would make the per-track start caches race over the
    /// same kite, so it is a build-time error, never a runtime one.
    pub fn new(tracks: Vec<Track>) -> Result<Self, BuildError> {
        let mut seen: BTreeSet<KiteId> = BTreeSet::new();
        for track in &tracks {
            for id in track.kite_ids() {
                if !seen.insert(id) {
                    return Err(BuildError::DuplicateKite(id));
                }
            }
        }
        Ok(Self { tracks })
    }

    pub fn is_done(&self) -> bool {
        self.tracks.iter().all(|t| t.is_done())
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    /// Every kite id referenced anywhere in this block.
    pub fn kite_ids(&self) -> BTreeSet<KiteId> {
        self.tracks.iter().flat_map(|t| t.kite_ids()).collect()
    }
}

/// The top-level ordered list of blocks.
///
/// Blocks run strictly one at a time. `finished` is terminal: restarting
/// means constructing a new script.
#[derive(Debug, Clone)]
pub struct Script {
    pub id: u32,
    blocks: Vec<Block>,
    block_index: usize,
    pub finished: bool,
    pub running: bool,
}

impl Script {
    pub fn new(id: u32, blocks: Vec<Block>) -> Self {
        // A script with nothing to do is already finished.
        let finished = blocks.is_empty();
        Self {
            id,
            blocks,
            block_index: 0,
            finished,
            running: true,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }

    pub fn current_block(&self) -> Option<&Block> {
        if self.finished {
            return None;
        }
        self.blocks.get(self.block_index)
    }

    pub fn current_block_mut(&mut self) -> Option<&mut Block> {
        if self.finished {
            return None;
        }
        self.blocks.get_mut(self.block_index)
    }

    /// Step past the current block; marks the script finished after the
    /// last one.
    pub fn advance_block(&mut self) {
        self.block_index += 1;
        if self.block_index >= self.blocks.len() {
            self.finished = true;
        }
    }

    /// Every kite id referenced anywhere in the script.
    pub fn referenced_kites(&self) -> BTreeSet<KiteId> {
        self.blocks.iter().flat_map(|b| b.kite_ids()).collect()
    }

    /// Check every referenced id against a known kite set.
    pub fn validate_kites(&self, known: &BTreeSet<KiteId>) -> Result<(), BuildError> {
        for id in self.referenced_kites() {
            if !known.contains(&id) {
                return Err(BuildError::UnknownKite(id));
            }
        }
        Ok(())
    }
}
