//! Runs a few periodic nodes with slot reservations on a simulated 32 kHz
//! counter and prints their expiries. Set `RUST_LOG=trace` to see the
//! ticker's inner workings.
use spin::Mutex as SpinMutex;
use ticker::{Expiry, SlotCursor, Start, Status, Ticker, TickerCfg, TickerOptions};
use ticker_port_std::{env_logger, SimPort, Simulate};

const CFG: TickerCfg = match TickerCfg::new(TickerOptions::RTC_32K) {
    Ok(x) => x,
    Err(e) => e.panic(),
};

type SimTicker = Ticker<SimPort, 8, 2, 4>;

/// The simulated time to run for.
const DURATION_MICROS: u32 = 100_000;

struct Event {
    name: &'static str,
    interval_micros: u32,
    slot_micros: u32,
}

static EVENTS: [Event; 3] = [
    Event {
        name: "conn 7.5ms",
        interval_micros: 7_500,
        slot_micros: 1_250,
    },
    Event {
        name: "adv 20ms",
        interval_micros: 20_000,
        slot_micros: 2_500,
    },
    Event {
        name: "scan 30ms",
        interval_micros: 30_000,
        slot_micros: 10_000,
    },
];

fn on_expire(expiry: Expiry, ctx: usize) {
    let event = &EVENTS[ctx];
    println!(
        "{:>8} us  {:<10}  (tick {}, remainder {}, lazy {})",
        CFG.micros_from_ticks(expiry.ticks_at_expire),
        event.name,
        expiry.ticks_at_expire,
        expiry.remainder,
        expiry.lazy
    );
}

fn on_started(status: Status, ctx: usize) {
    if !status.is_success() {
        log::warn!("couldn't start '{}': {}", EVENTS[ctx].name, status);
    }
}

/// The cursor returned by the last slot query.
static CURSOR: SpinMutex<SlotCursor> = SpinMutex::new(SlotCursor::START);

fn on_slot(status: Status, cursor: SlotCursor, _: usize) {
    *CURSOR.lock() = cursor;
    match cursor.id {
        Some(id) if status.is_success() => println!(
            "  reserved: node {} at +{} us",
            id,
            CFG.micros_from_ticks(cursor.ticks_to_expire)
        ),
        _ => println!("  reserved: (end)"),
    }
}

fn main() {
    env_logger::init();

    let ticker: SimTicker = Ticker::new(CFG, SimPort::new(&CFG));

    let now = ticker.ticks_now();
    for (i, event) in EVENTS.iter().enumerate() {
        let (ticks, remainder) = CFG.ticks_from_micros(event.interval_micros);
        let (slot, _) = CFG.ticks_from_micros(event.slot_micros);
        let params = Start::new(now, ticks)
            .periodic(ticks, remainder)
            .slot(slot)
            .on_expire(on_expire, i);
        let status = ticker.start(0, i as u8, params, Some(on_started), i);
        log::debug!("start '{}': {}", event.name, status);
    }
    ticker.run_pending();

    println!("Slot reservations at start:");
    loop {
        let cursor = *CURSOR.lock();
        ticker.next_slot_get(1, cursor, on_slot, 0);
        ticker.run_pending();
        if CURSOR.lock().id.is_none() {
            break;
        }
    }

    println!("Expiries:");
    let (duration, _) = CFG.ticks_from_micros(DURATION_MICROS);
    ticker.run_until(duration as u64);

    for i in 0..EVENTS.len() {
        ticker.stop(0, i as u8, None, 0);
    }
    ticker.run_pending();
    log::info!(
        "stopped; {} compare writes in total",
        ticker.port().compare_writes()
    );
}
