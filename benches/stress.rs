use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::future::join_all;
use tokio::sync::mpsc;

use roomstay::commit::Committer;
use roomstay::mail::{MailMessage, Mailer};
use roomstay::model::{DateSpan, GuestDetails, NewReservation, Room};
use roomstay::store::{RoomStore, Store};

const BUDGET: Duration = Duration::from_secs(3);

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

/// `nights` nights starting `offset` days after the base date.
fn stay(offset: u64, nights: u64) -> DateSpan {
    let start = base() + Days::new(offset);
    DateSpan::new(start, start + Days::new(nights)).unwrap()
}

fn guest(i: usize) -> GuestDetails {
    GuestDetails {
        first_name: format!("Guest{i}"),
        last_name: "Bench".into(),
        email: format!("guest{i}@bench.test"),
        phone: String::new(),
    }
}

/// Swallow confirmation mails so the queue never blocks the bench.
fn drain(mut rx: mpsc::Receiver<MailMessage>) {
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
}

async fn setup(store: &Arc<RoomStore>, n: usize) -> Vec<Room> {
    let mut rooms = Vec::with_capacity(n);
    for i in 0..n {
        rooms.push(store.insert_room(format!("Room {i:03}")).await.unwrap());
    }
    println!("  created {} rooms", rooms.len());
    rooms
}

async fn phase1_sequential(committer: &Committer, room: &Room) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        committer
            .commit(NewReservation {
                guest: guest(i),
                room_id: room.id,
                span: stay(i as u64, 1),
            })
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} commits in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

/// Many visitors commit the same overlapping stay on each room at once.
/// Exactly one must win per room.
async fn phase2_contention(committer: &Committer, store: &Arc<RoomStore>, rooms: &[Room]) {
    let contenders = 32;
    let start = Instant::now();
    let mut handles = Vec::new();

    for (r, room) in rooms.iter().enumerate() {
        for c in 0..contenders {
            let committer = committer.clone();
            let room_id = room.id;
            handles.push(tokio::spawn(async move {
                // Staggered but always overlapping the middle night.
                let span = stay(10_000 + (c % 3) as u64, 3);
                let t = Instant::now();
                let result = committer
                    .commit(NewReservation {
                        guest: guest(r * contenders + c),
                        room_id,
                        span,
                    })
                    .await;
                (result.is_ok(), t.elapsed())
            }));
        }
    }

    let mut wins = 0;
    let mut latencies = Vec::new();
    for result in join_all(handles).await {
        let (ok, latency) = result.unwrap();
        wins += ok as usize;
        latencies.push(latency);
    }

    let elapsed = start.elapsed();
    let orphans = store.orphaned_reservations().await.unwrap().len();
    println!(
        "  {} rooms x {contenders} contenders: {wins} bookings, {orphans} orphans in {:.2}s",
        rooms.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, rooms.len(), "double booking detected");
    assert_eq!(orphans, 0);
    print_latency("contended commit latency", &mut latencies);
}

async fn phase3_read_under_load(committer: &Committer, store: &Arc<RoomStore>, rooms: &[Room]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, room) in rooms.iter().take(5).enumerate() {
        let committer = committer.clone();
        let stop = stop.clone();
        let room_id = room.id;
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = committer
                    .commit(NewReservation {
                        guest: guest(w),
                        room_id,
                        span: stay(20_000 + i, 1),
                    })
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let store = store.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let span = stay(20_000 + ((r * reads_per_reader + i) % 400) as u64, 2);
                let t = Instant::now();
                store.rooms_available(span).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let journaled = std::env::var("ROOMSTAY_BENCH_WAL").is_ok();
    println!("=== roomstay stress benchmark ===");

    let store = if journaled {
        let dir = std::env::temp_dir().join(format!("roomstay_bench_{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        println!("store: journaled at {}\n", dir.display());
        Arc::new(RoomStore::open(&dir.join("roomstay.wal")).unwrap())
    } else {
        println!("store: in-memory\n");
        Arc::new(RoomStore::in_memory())
    };

    let (mailer, rx) = Mailer::channel(1024, "bench@roomstay.test");
    drain(rx);
    let committer = Committer::new(store.clone(), mailer, BUDGET);

    println!("[setup]");
    let rooms = setup(&store, 50).await;

    println!("\n[phase 1] sequential commit throughput");
    phase1_sequential(&committer, &rooms[0]).await;

    println!("\n[phase 2] concurrent commits on overlapping stays");
    phase2_contention(&committer, &store, &rooms[1..]).await;

    println!("\n[phase 3] availability latency under commit load");
    phase3_read_under_load(&committer, &store, &rooms).await;

    println!("\ndone");
}
