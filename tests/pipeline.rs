//! End-to-end playback: choreography sources through the engine to final
//! poses.

use skydance::engine::Engine;
use skydance::figures::{self, FigureSpec};
use skydance::kite::KiteId;
use skydance::script;

const SOURCE: &str = "\
# two-kite demo
KITES 2
BEGIN
MOVE (0 1) 100 0 1.0
{
    MOVEADD (0) 0 50 1.0
    ROTATE (1) 90 2.0
}
WAIT (0 1) 0.5
END
";

fn run_to_completion(engine: &mut Engine, dt: f32) -> u32 {
    let mut ticks = 0;
    while engine.script_active() {
        engine.advance(dt);
        ticks += 1;
        assert!(ticks < 100_000, "script never finished");
    }
    ticks
}

#[test]
fn test_text_script_reaches_final_poses() {
    let parsed = script::load_source(SOURCE, 1).unwrap();
    assert_eq!(parsed.kite_count, 2);
    assert_eq!(parsed.script.block_count(), 3);

    let mut engine = Engine::new();
    for i in 0..parsed.kite_count {
        engine.create_kite(KiteId(i));
    }
    engine.load_script(parsed.script).unwrap();
    run_to_completion(&mut engine, 0.05);

    let k0 = engine.kite(KiteId(0)).unwrap();
    assert!((k0.center.x - 100.0).abs() < 0.001);
    assert!((k0.center.y - 50.0).abs() < 0.001);

    let k1 = engine.kite(KiteId(1)).unwrap();
    assert!((k1.center.x - 100.0).abs() < 0.001);
    assert!(k1.center.y.abs() < 0.001);
    assert!((k1.angle - 90.0).abs() < 0.001);

    assert!(engine.script().unwrap().finished);
}

#[test]
fn test_tick_rate_does_not_change_final_poses() {
    let mut finals = Vec::new();
    for dt in [0.25, 0.05, 0.013] {
        let parsed = script::load_source(SOURCE, 1).unwrap();
        let mut engine = Engine::new();
        for i in 0..parsed.kite_count {
            engine.create_kite(KiteId(i));
        }
        engine.load_script(parsed.script).unwrap();
        run_to_completion(&mut engine, dt);
        finals.push((
            engine.kite(KiteId(0)).unwrap().center,
            engine.kite(KiteId(1)).unwrap().angle,
        ));
    }
    for pair in finals.windows(2) {
        assert!((pair[0].0 - pair[1].0).length() < 0.001);
        assert!((pair[0].1 - pair[1].1).abs() < 0.001);
    }
}

#[test]
fn test_figure_playlist_places_kites_on_circle() {
    let specs = vec![
        FigureSpec::LineUp {
            anchor: [0.0, 0.0],
            padding: 50.0,
            duration: 0.5,
        },
        FigureSpec::Ball {
            center: [200.0, 200.0],
            radius: 100.0,
            duration: 1.0,
        },
    ];
    let ids: Vec<KiteId> = (0..4).map(KiteId).collect();
    let mut engine = Engine::new();
    for &id in &ids {
        engine.create_kite(id);
    }
    engine
        .load_script(figures::build_script(0, &ids, &specs).unwrap())
        .unwrap();
    run_to_completion(&mut engine, 0.05);

    for kite in engine.kites() {
        let r = (kite.center - glam::Vec2::new(200.0, 200.0)).length();
        assert!((r - 100.0).abs() < 0.01, "kite {} off circle: {}", kite.id, r);
    }
}

#[test]
fn test_quit_script_stops_early() {
    let source = "KITES 1\nBEGIN\nQUIT (0) 0\nMOVE (0) 50 50 1.0\nEND\n";
    let parsed = script::load_source(source, 0).unwrap();
    let mut engine = Engine::new();
    engine.create_kite(KiteId(0));
    engine.load_script(parsed.script).unwrap();
    run_to_completion(&mut engine, 0.1);

    // The move after QUIT never ran.
    let kite = engine.kite(KiteId(0)).unwrap();
    assert!(kite.center.x.abs() < 0.001);
}
