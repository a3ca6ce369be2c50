// Two simulated devices exchanging tokens on a shared radio
//
// Runs the same scheduler the `run` command uses, against `SimAdapter`s in
// real time. The second device is switched on `offset` after the first so
// their client and server phases interleave.

use anyhow::Result;
use colored::*;
use simmel_core::{
    PeerAddress, ProtocolConfig, ProximityEvent, RandomTokenProvider, RecordingWatchdog,
    RoundReport, RoundScheduler, SimAdapter, SimAir, TokioClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEVICE_A: &str = "a0:00:00:00:00:0a";
const DEVICE_B: &str = "b0:00:00:00:00:0b";

/// What each simulated device ended up with
pub struct Summary {
    pub a_rounds: Vec<RoundReport>,
    pub b_rounds: Vec<RoundReport>,
    pub a_watchdog_ok: bool,
    pub b_watchdog_ok: bool,
}

impl Summary {
    pub fn tokens_read(rounds: &[RoundReport]) -> usize {
        rounds.iter().map(|r| r.client.encounters.len()).sum()
    }
}

fn device(
    air: &Arc<SimAir>,
    clock: &Arc<TokioClock>,
    address: &str,
    config: &ProtocolConfig,
    events: mpsc::UnboundedSender<ProximityEvent>,
) -> Result<(RoundScheduler, Arc<RecordingWatchdog>)> {
    let adapter = Arc::new(SimAdapter::new(air, PeerAddress::new(address)));
    let watchdog = Arc::new(RecordingWatchdog::new(
        clock.clone(),
        config.watchdog_timeout(),
    ));
    let scheduler = RoundScheduler::new(
        config.clone(),
        adapter,
        clock.clone(),
        watchdog.clone(),
        Box::new(RandomTokenProvider::new(config.token_len)),
    )?
    .with_events(events);
    Ok((scheduler, watchdog))
}

/// Run `rounds` rounds on two devices, B starting `offset` after A
pub async fn run(config: &ProtocolConfig, rounds: u64, offset: Duration) -> Result<Summary> {
    let clock = Arc::new(TokioClock::new());
    let air = SimAir::new(clock.clone());

    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let (mut a, a_watchdog) = device(&air, &clock, DEVICE_A, config, a_tx)?;
    let (mut b, b_watchdog) = device(&air, &clock, DEVICE_B, config, b_tx)?;

    println!(
        "  {} A: {}  B: {}",
        "Tokens:".bold(),
        a.local_token().fingerprint().cyan(),
        b.local_token().fingerprint().cyan()
    );

    let printer = tokio::spawn(async move {
        let mut a_open = true;
        let mut b_open = true;
        while a_open || b_open {
            tokio::select! {
                event = a_rx.recv(), if a_open => match event {
                    Some(event) => print_event("A", &event),
                    None => a_open = false,
                },
                event = b_rx.recv(), if b_open => match event {
                    Some(event) => print_event("B", &event),
                    None => b_open = false,
                },
            }
        }
    });

    let (a_rounds, b_rounds) = tokio::join!(a.run_rounds(rounds), async {
        tokio::time::sleep(offset).await;
        b.run_rounds(rounds).await
    });
    drop(a);
    drop(b);
    printer.await.ok();

    Ok(Summary {
        a_rounds,
        b_rounds,
        a_watchdog_ok: !a_watchdog.would_have_reset(),
        b_watchdog_ok: !b_watchdog.would_have_reset(),
    })
}

pub fn print_event(device: &str, event: &ProximityEvent) {
    let tag = format!("[{}]", device).bright_black();
    match event {
        ProximityEvent::PeerDiscovered {
            address,
            rssi,
            rand_hash,
        } => println!(
            "{} {} {} ({} dBm, hash {:06x})",
            tag,
            "discovered".blue(),
            address,
            rssi,
            rand_hash
        ),
        ProximityEvent::TokenRead { address, token, .. } => println!(
            "{} {} {} from {}",
            tag,
            "read".green().bold(),
            token.fingerprint().cyan(),
            address
        ),
        ProximityEvent::SessionFailed { address, error, .. } => {
            println!("{} {} {}: {}", tag, "failed".red(), address, error)
        }
        ProximityEvent::TokenReceived { token } => println!(
            "{} {} {}",
            tag,
            "received".green(),
            token.fingerprint().cyan()
        ),
        ProximityEvent::WriteRejected { len } => {
            println!("{} {} {}-byte write", tag, "rejected".yellow(), len)
        }
        ProximityEvent::PeerServed { outcome, served } => {
            println!("{} {} {:?} after {:?}", tag, "served".blue(), outcome, served)
        }
        ProximityEvent::LocalTokenRotated { fingerprint } => {
            println!("{} {} {}", tag, "rotated".magenta(), fingerprint.cyan())
        }
        ProximityEvent::RoundCompleted { round, encounters } => println!(
            "{} {} {} ({} encounter(s))",
            tag,
            "round".bold(),
            round,
            encounters
        ),
    }
}
