//! Randomized request sequences and long-run timing
mod common;

use common::*;
use itertools::Itertools;
use quickcheck_macros::quickcheck;
use ticker::{ScheduledNode, Start, Status, Update};
use ticker_port_std::Simulate;

const KIND_EXPIRY: u32 = 0;
const KIND_START: u32 = 1;
const KIND_STOP: u32 = 2;
const KIND_UPDATE: u32 = 3;

fn tag(id: u8, kind: u32) -> u32 {
    id as u32 * 4 + kind
}

/// Check the list invariants that must hold between any two context runs.
fn check_list(ticker: &SimTicker) {
    let nodes: Vec<ScheduledNode> = ticker
        .snapshot(|s| s.iter().collect())
        .expect("nothing else is running");
    log::trace!("list = {:?}", nodes);

    // Each node appears at most once, in expiry order
    let mut seen = [false; NODES];
    for node in &nodes {
        assert!(!seen[node.id as usize], "{:?}", nodes);
        seen[node.id as usize] = true;
    }
    for (a, b) in nodes.iter().tuple_windows() {
        assert!(a.ticks_to_expire <= b.ticks_to_expire, "{:?}", nodes);
    }

    // Slot windows don't overlap
    for (a, b) in nodes.iter().filter(|n| n.ticks_slot != 0).tuple_windows() {
        assert!(
            a.ticks_to_expire + a.ticks_slot <= b.ticks_to_expire,
            "{:?}",
            nodes
        );
    }
}

/// Check that no node expired after it was successfully stopped, unless it
/// was successfully started again.
fn check_no_expiry_after_stop(log: &Log) {
    let mut stopped = [false; NODES];
    for event in log.events() {
        match event {
            Event::Expired { tag, .. } => {
                let id = (tag / 4) as usize;
                assert!(!stopped[id], "node {} expired after being stopped", id);
            }
            Event::Done {
                tag,
                status: Status::Success,
            } => {
                let id = (tag / 4) as usize;
                match tag % 4 {
                    KIND_START => stopped[id] = false,
                    KIND_STOP => stopped[id] = true,
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Drive a ticker with a random sequence of requests and time steps, each
/// encoded as `[op, node, a, b]`.
#[quickcheck]
fn random_requests_keep_list_consistent(bytecode: Vec<u8>) {
    let ticker = new_ticker();
    let log = Log::new();
    let probes: Vec<Probe> = (0..NODES as u8)
        .flat_map(|id| (0..4).map(move |kind| tag(id, kind)))
        .map(|tag| Probe::new(tag, &log))
        .collect();
    let probe = |id: u8, kind: u32| probes[tag(id, kind) as usize].ctx();

    for instr in bytecode.chunks_exact(4) {
        let &[op, node, a, b] = instr else {
            unreachable!()
        };
        let id = node % NODES as u8;
        let user = node / NODES as u8 % USERS as u8;

        match op % 6 {
            0 => {
                let mut params = Start::new(ticker.ticks_now(), a as u32 % 64)
                    .on_expire(on_expire, probe(id, KIND_EXPIRY));
                if b & 1 != 0 {
                    params = params.periodic(8 + (b as u32 >> 1) % 32, b as u32 * 100_000);
                }
                if a % 3 == 0 {
                    params = params.slot(1 + b as u32 % 8);
                }
                log::debug!("start({}, {}, {:?})", user, id, params);
                ticker.start(user, id, params, Some(on_done), probe(id, KIND_START));
            }
            1 => {
                log::debug!("stop({}, {})", user, id);
                ticker.stop(user, id, Some(on_done), probe(id, KIND_STOP));
            }
            2 => {
                let params = Update {
                    drift_plus: a as u32 % 16,
                    drift_minus: b as u32 % 16,
                    ..Update::default()
                };
                log::debug!("update({}, {}, {:?})", user, id, params);
                ticker.update(user, id, params, Some(on_done), probe(id, KIND_UPDATE));
            }
            3 => {
                let params = Update {
                    lazy: Some(a as u16 % 3),
                    slot_plus: b as u32 % 4,
                    ..Update::default()
                };
                log::debug!("update({}, {}, {:?})", user, id, params);
                ticker.update(user, id, params, Some(on_done), probe(id, KIND_UPDATE));
            }
            4 => {
                log::debug!("run_for({})", a % 64);
                ticker.run_for(a as u64 % 64);
            }
            5 => {
                log::debug!("run_pending");
                ticker.run_pending();
            }
            _ => unreachable!(),
        }

        check_list(&ticker);
    }

    ticker.run_for(1000);
    check_list(&ticker);
    check_no_expiry_after_stop(&log);
}

#[test]
fn fractional_period_spreads_carries() {
    let ticker = new_ticker();
    let log = Log::new();
    let a = Probe::new(1, &log);

    let range = ticker.cfg().remainder_range();
    let params = Start::new(0, 5)
        .periodic(10, range / 3)
        .on_expire(on_expire, a.ctx());
    ticker.start(0, 0, params, None, 0);
    ticker.run_until(400);

    let ticks = log.expiry_ticks(1);
    assert!(ticks.len() >= 35, "{:?}", ticks);
    // Ten and a third ticks per period
    for (k, &t) in ticks.iter().enumerate() {
        let exact = 15 + 31 * k as i64;
        assert!((3 * t as i64 - exact).abs() <= 3, "{:?}", ticks);
    }
}

/// The realised interval between the first and the `n`-th expiry stays
/// within one tick of `n` exact periods.
#[quickcheck]
fn periodic_expiries_are_accurate(period: u8, remainder: u32, n: u8) {
    let ticker = new_ticker();
    let log = Log::new();
    let probe = Probe::new(1, &log);

    let range = ticker.cfg().remainder_range();
    let period = 2 + period as u32 % 48;
    let remainder = remainder % range;
    let n = 1 + n as u64 % 40;

    let params = Start::new(0, 3)
        .periodic(period, remainder)
        .on_expire(on_expire, probe.ctx());
    ticker.start(0, 0, params, None, 0);
    ticker.run_until(3 + n * (period as u64 + 1));

    let ticks = log.expiry_ticks(1);
    assert!(ticks.len() as u64 > n, "{:?}", ticks);

    let realised = (ticks[n as usize] - ticks[0]) as i128 * range as i128;
    let exact = n as i128 * (period as i128 * range as i128 + remainder as i128);
    assert!(
        (realised - exact).abs() <= range as i128,
        "realised = {}, exact = {}",
        realised,
        exact
    );
}
