//! Figure generators: pure functions expanding formation primitives into
//! blocks of Move/Rotation frames.
//!
//! Every generator is deterministic given its inputs and emits exactly one
//! Move+Rotation pair per participating kite per discrete step, one track
//! per kite. Generators never touch the engine or the network; callers
//! compose their blocks into a [`Script`] and hand it to the engine.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::frame::{Block, BuildError, Frame, Script, Track};
use crate::kite::KiteId;

/// One track holding the canonical Move+Rotation pair for a kite.
fn pose_track(id: KiteId, target: Vec2, angle: f32, duration: f32) -> Track {
    let frames = vec![
        Frame::new(Action::Move(target), vec![id], duration).expect("single kite id"),
        Frame::new(Action::Rotation(angle), vec![id], duration).expect("single kite id"),
    ];
    Track::new(frames)
}

/// Build a block from per-kite (position, angle) placements.
fn placement_block(
    ids: &[KiteId],
    placements: impl Iterator<Item = (Vec2, f32)>,
    duration: f32,
) -> Result<Block, BuildError> {
    let tracks = ids
        .iter()
        .zip(placements)
        .map(|(&id, (pos, angle))| pose_track(id, pos, angle, duration))
        .collect();
    Block::new(tracks)
}

/// Kites on a horizontal line, `padding` apart, upright.
pub fn line_up(
    ids: &[KiteId],
    anchor: Vec2,
    padding: f32,
    duration: f32,
) -> Result<Block, BuildError> {
    let placements = (0..ids.len()).map(|i| (anchor + Vec2::new(i as f32 * padding, 0.0), 0.0));
    placement_block(ids, placements, duration)
}

/// Kites on a rectangular grid, filled row by row.
pub fn grid(
    ids: &[KiteId],
    anchor: Vec2,
    padding: f32,
    columns: usize,
    duration: f32,
) -> Result<Block, BuildError> {
    let columns = columns.max(1);
    let placements = (0..ids.len()).map(move |i| {
        let col = (i % columns) as f32;
        let row = (i / columns) as f32;
        (anchor + Vec2::new(col * padding, row * padding), 0.0)
    });
    placement_block(ids, placements, duration)
}

/// Kites spread along a circular arc, facing outward.
pub fn arc(
    ids: &[KiteId],
    center: Vec2,
    radius: f32,
    start_deg: f32,
    end_deg: f32,
    duration: f32,
) -> Result<Block, BuildError> {
    let n = ids.len();
    let placements = (0..n).map(move |i| {
        let frac = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
        let theta = start_deg + (end_deg - start_deg) * frac;
        let rad = theta.to_radians();
        let pos = center + radius * Vec2::new(rad.cos(), rad.sin());
        // An upright kite sits at the top of the circle; elsewhere it
        // leans with the radial direction.
        (pos, theta - 90.0)
    });
    placement_block(ids, placements, duration)
}

/// A valley: the middle of the line dips by `depth`, the wings tilt
/// toward the center.
pub fn mouth(
    ids: &[KiteId],
    anchor: Vec2,
    padding: f32,
    depth: f32,
    duration: f32,
) -> Result<Block, BuildError> {
    let n = ids.len();
    let half = (n.saturating_sub(1)) as f32 / 2.0;
    let slope = if half > 0.0 {
        (depth / (half * padding)).atan().to_degrees()
    } else {
        0.0
    };
    let placements = (0..n).map(move |i| {
        let off = i as f32 - half;
        let dip = if half > 0.0 {
            depth * (1.0 - off.abs() / half)
        } else {
            depth
        };
        let tilt = if off < 0.0 {
            -slope
        } else if off > 0.0 {
            slope
        } else {
            0.0
        };
        (anchor + Vec2::new(i as f32 * padding, -dip), tilt)
    });
    placement_block(ids, placements, duration)
}

/// Four legs around a square: the line formation travels corner to
/// corner, facing the direction of travel. One block per leg.
pub fn box_figure(
    ids: &[KiteId],
    anchor: Vec2,
    side: f32,
    duration: f32,
) -> Result<Vec<Block>, BuildError> {
    let spacing = if ids.is_empty() {
        0.0
    } else {
        side / ids.len() as f32
    };
    let corners = [
        (Vec2::new(side, 0.0), 0.0),
        (Vec2::new(side, side), 90.0),
        (Vec2::new(0.0, side), 180.0),
        (Vec2::new(0.0, 0.0), 270.0),
    ];
    corners
        .iter()
        .map(|&(corner, heading)| {
            let placements = (0..ids.len())
                .map(move |i| (anchor + corner + Vec2::new(i as f32 * spacing, 0.0), heading));
            placement_block(ids, placements, duration)
        })
        .collect()
}

/// Kites on the four diamond vertices, outer rings for more than four,
/// facing outward.
pub fn diamond(
    ids: &[KiteId],
    anchor: Vec2,
    radius: f32,
    duration: f32,
) -> Result<Block, BuildError> {
    let placements = (0..ids.len()).map(move |i| {
        let theta = 90.0 + 90.0 * (i % 4) as f32;
        let ring = 1.0 + (i / 4) as f32;
        let rad = theta.to_radians();
        let pos = anchor + radius * ring * Vec2::new(rad.cos(), rad.sin());
        (pos, theta - 90.0)
    });
    placement_block(ids, placements, duration)
}

/// Kites evenly spaced on a full circle, facing outward.
pub fn ball(
    ids: &[KiteId],
    center: Vec2,
    radius: f32,
    duration: f32,
) -> Result<Block, BuildError> {
    let n = ids.len().max(1);
    let placements = (0..ids.len()).map(move |i| {
        let theta = 360.0 * i as f32 / n as f32;
        let rad = theta.to_radians();
        (center + radius * Vec2::new(rad.cos(), rad.sin()), theta - 90.0)
    });
    placement_block(ids, placements, duration)
}

/// Split-roll: place the kites on a circle, then advance every kite by
/// `step_deg` around it per block until a full revolution closes.
pub fn roll(
    ids: &[KiteId],
    center: Vec2,
    radius: f32,
    step_deg: f32,
    duration: f32,
) -> Result<Vec<Block>, BuildError> {
    let step_deg = step_deg.abs().max(1.0);
    let steps = (360.0 / step_deg).ceil() as usize;
    let n = ids.len().max(1);

    let mut blocks = Vec::with_capacity(steps + 1);
    for s in 0..=steps {
        let swept = step_deg * s as f32;
        let placements = (0..ids.len()).map(|i| {
            let theta = 360.0 * i as f32 / n as f32 + swept;
            let rad = theta.to_radians();
            (center + radius * Vec2::new(rad.cos(), rad.sin()), theta - 90.0)
        });
        blocks.push(placement_block(ids, placements, duration)?);
    }
    Ok(blocks)
}

/// All kites hold position together for `duration`.
pub fn hold(ids: &[KiteId], duration: f32) -> Result<Block, BuildError> {
    if ids.is_empty() {
        return Block::new(vec![]);
    }
    let frame = Frame::new(Action::Wait, ids.to_vec(), duration)?;
    Block::new(vec![Track::new(vec![frame])])
}

/// A figure playlist entry, deserializable from JSON.
///
/// Positions are `[x, y]` pairs so playlists stay plain JSON arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "figure", rename_all = "snake_case")]
pub enum FigureSpec {
    LineUp {
        anchor: [f32; 2],
        padding: f32,
        duration: f32,
    },
    Grid {
        anchor: [f32; 2],
        padding: f32,
        columns: usize,
        duration: f32,
    },
    Arc {
        center: [f32; 2],
        radius: f32,
        start_deg: f32,
        end_deg: f32,
        duration: f32,
    },
    Mouth {
        anchor: [f32; 2],
        padding: f32,
        depth: f32,
        duration: f32,
    },
    Box {
        anchor: [f32; 2],
        side: f32,
        duration: f32,
    },
    Diamond {
        anchor: [f32; 2],
        radius: f32,
        duration: f32,
    },
    Ball {
        center: [f32; 2],
        radius: f32,
        duration: f32,
    },
    Roll {
        center: [f32; 2],
        radius: f32,
        step_deg: f32,
        duration: f32,
    },
    Hold {
        duration: f32,
    },
}

impl FigureSpec {
    /// Expand this entry into its block sequence for the given kites.
    pub fn expand(&self, ids: &[KiteId]) -> Result<Vec<Block>, BuildError> {
        let v = |p: [f32; 2]| Vec2::new(p[0], p[1]);
        match *self {
            FigureSpec::LineUp {
                anchor,
                padding,
                duration,
            } => Ok(vec![line_up(ids, v(anchor), padding, duration)?]),
            FigureSpec::Grid {
                anchor,
                padding,
                columns,
                duration,
            } => Ok(vec![grid(ids, v(anchor), padding, columns, duration)?]),
            FigureSpec::Arc {
                center,
                radius,
                start_deg,
                end_deg,
                duration,
            } => Ok(vec![arc(ids, v(center), radius, start_deg, end_deg, duration)?]),
            FigureSpec::Mouth {
                anchor,
                padding,
                depth,
                duration,
            } => Ok(vec![mouth(ids, v(anchor), padding, depth, duration)?]),
            FigureSpec::Box {
                anchor,
                side,
                duration,
            } => box_figure(ids, v(anchor), side, duration),
            FigureSpec::Diamond {
                anchor,
                radius,
                duration,
            } => Ok(vec![diamond(ids, v(anchor), radius, duration)?]),
            FigureSpec::Ball {
                center,
                radius,
                duration,
            } => Ok(vec![ball(ids, v(center), radius, duration)?]),
            FigureSpec::Roll {
                center,
                radius,
                step_deg,
                duration,
            } => roll(ids, v(center), radius, step_deg, duration),
            FigureSpec::Hold { duration } => Ok(vec![hold(ids, duration)?]),
        }
    }
}

/// Expand a playlist into one script over the given kites.
pub fn build_script(
    script_id: u32,
    ids: &[KiteId],
    specs: &[FigureSpec],
) -> Result<Script, BuildError> {
    let mut blocks = Vec::new();
    for spec in specs {
        blocks.extend(spec.expand(ids)?);
    }
    Ok(Script::new(script_id, blocks))
}
