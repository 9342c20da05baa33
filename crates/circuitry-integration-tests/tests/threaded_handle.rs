//! Integration tests for the thread-safe handle: readers only ever observe
//! settled snapshots, subscribers see every step in order, and settings
//! loaded from a file drive the auto-ticker.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use circuitry_core::handle::SimHandle;
use circuitry_core::id::PortRef;
use circuitry_core::sim::PropagatorStatus;
use circuitry_core::simulator::Simulator;
use circuitry_core::test_utils::*;
use circuitry_core::value::Value;
use circuitry_data::{Format, parse_sim_config};

#[test]
fn readers_never_see_a_half_finished_step() {
    let and = and_with_switches();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();
    sim.nudge().unwrap();
    let netlist = sim.netlist(and.circuit).unwrap();
    let a = netlist.port_bundle(PortRef::new(and.a, 0)).unwrap();
    let b = netlist.port_bundle(PortRef::new(and.b, 0)).unwrap();
    let out = netlist.port_bundle(PortRef::new(and.out, 0)).unwrap();
    let handle = SimHandle::new(sim);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let handle = handle.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last_seq = 0;
                let mut checked = 0u32;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    let snap = handle.snapshot();
                    assert!(snap.seq >= last_seq);
                    last_seq = snap.seq;
                    let va = snap.bundle_value(root, a).unwrap();
                    let vb = snap.bundle_value(root, b).unwrap();
                    let vo = snap.bundle_value(root, out).unwrap();
                    assert_eq!(vo, va.and(vb));
                    assert_eq!(snap.status, PropagatorStatus::Idle);
                    checked += 1;
                    if finished {
                        break checked;
                    }
                }
            })
        })
        .collect();

    for i in 0..200u32 {
        handle.poke_pin(root, and.a, Value::from_bool(i & 1 == 1)).unwrap();
        handle.poke_pin(root, and.b, Value::from_bool(i & 2 == 2)).unwrap();
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(handle.seq(), 400);
}

#[test]
fn subscribers_receive_every_step_in_order() {
    let clocked = clock_probe();
    let mut sim = Simulator::new(clocked.library).unwrap();
    let root = sim.create_root(clocked.circuit).unwrap();
    let probe = sim
        .netlist(clocked.circuit)
        .unwrap()
        .port_bundle(PortRef::new(clocked.probe, 0))
        .unwrap();
    let handle = SimHandle::new(sim);
    let rx = handle.subscribe();

    handle.nudge().unwrap();
    for _ in 0..4 {
        handle.tick().unwrap();
    }

    let snaps: Vec<_> = rx.try_iter().collect();
    assert_eq!(snaps.len(), 5);
    for (i, snap) in snaps.iter().enumerate() {
        assert_eq!(snap.seq, i as u64 + 1);
        assert_eq!(snap.tick, i as u64);
        let expected = Value::from_bool(snap.tick % 2 == 1);
        assert_eq!(snap.bundle_value(root, probe), Some(expected));
    }
    assert!(!handle.has_update_since(5));
}

#[test]
fn auto_ticking_with_loaded_settings() {
    let config = parse_sim_config(
        "tick_period_ms = 5\nmax_rounds = 100\n",
        Format::Toml,
        Path::new("simulation.toml"),
    )
    .unwrap();
    assert_eq!(config.tick_period_ms, 5);

    let clocked = clock_probe();
    let mut sim = Simulator::with_config(clocked.library, config).unwrap();
    let root = sim.create_root(clocked.circuit).unwrap();
    sim.nudge().unwrap();
    let probe = sim
        .netlist(clocked.circuit)
        .unwrap()
        .port_bundle(PortRef::new(clocked.probe, 0))
        .unwrap();
    let handle = SimHandle::new(sim);
    let rx = handle.subscribe();

    handle.set_auto_ticking(true);
    let mut seen = 0;
    while seen < 4 {
        let snap = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let expected = Value::from_bool(snap.tick % 2 == 1);
        assert_eq!(snap.bundle_value(root, probe), Some(expected));
        seen += 1;
    }
    handle.set_auto_ticking(false);
    assert!(!handle.is_auto_ticking());

    // No more ticks once stopped.
    let tick = handle.snapshot().tick;
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(handle.snapshot().tick, tick);
}

#[test]
fn stop_request_interrupts_an_oscillating_drain() {
    let ring = kicked_ring();
    let config = parse_sim_config(
        r#"{"max_rounds": 4294967295, "auto_propagate": false}"#,
        Format::Json,
        Path::new("simulation.json"),
    )
    .unwrap();
    let mut sim = Simulator::with_config(ring.library, config).unwrap();
    let root = sim.create_root(ring.circuit).unwrap();
    sim.poke_pin(root, ring.kick, Value::TRUE).unwrap();
    sim.nudge().unwrap();
    let handle = SimHandle::new(sim);

    // With auto-propagation off, the poke only queues work.
    handle.poke_pin(root, ring.kick, Value::FALSE).unwrap();
    assert_eq!(handle.snapshot().status, PropagatorStatus::Idle);

    let worker = {
        let handle = handle.clone();
        std::thread::spawn(move || handle.nudge())
    };
    std::thread::sleep(Duration::from_millis(20));
    handle.stop_handle().request_stop();
    let outcome = worker.join().unwrap().unwrap();
    assert_eq!(outcome.status, PropagatorStatus::Stopped);

    // Kicking the ring again settles it.
    handle.with(|sim| sim.poke_pin(root, ring.kick, Value::TRUE)).unwrap();
    assert!(handle.nudge().unwrap().is_stable());
}
