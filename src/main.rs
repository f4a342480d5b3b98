use std::env::args;
use std::ptr::NonNull;
use std::str::FromStr;
use std::string::ToString;

use log::info;
use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

use sharedptr::{spawn_owned, AtomicCount, Destroyer, Strong};

fn main() -> Result<(), String> {
    env_logger::init();
    args()
        .nth(1)
        .ok_or(format!(
            "no scenario supplied, use one of {}",
            Scenario::iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| {
            Scenario::from_str(&selector)
                .map_err(|e| e.to_string())
                .and_then(|scenario| match scenario {
                    Scenario::SharedDrop => shared_drop(),
                    Scenario::WeakUpgrade => weak_upgrade(),
                    Scenario::Handoff => handoff(),
                    Scenario::Stress => stress(),
                })
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    SharedDrop,
    WeakUpgrade,
    Handoff,
    Stress,
}

/// a value shared by several threads dies when the last handle goes
fn shared_drop() -> Result<(), String> {
    let config = Strong::new(vec!["some", "shared", "state"]);
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let config = config.clone();
            std::thread::spawn(move || {
                info!("worker {i} sees {} entries", config.len());
            })
        })
        .collect();
    info!("handles alive: {}", Strong::ref_count(&config));
    for jh in workers {
        jh.join().map_err(|_| "worker panicked".to_string())?;
    }
    info!("handles alive after join: {}", Strong::ref_count(&config));
    Ok(())
}

/// back-references that must not keep their referent alive
fn weak_upgrade() -> Result<(), String> {
    let parent = Strong::new("parent logger");
    let back_ref = Strong::downgrade(&parent);

    match back_ref.upgrade() {
        Some(p) => info!("parent reachable: {}", *p),
        None => info!("parent already gone"),
    }

    drop(parent);
    info!("after drop, alive = {}", back_ref.is_alive());
    assert!(back_ref.upgrade().is_none());
    Ok(())
}

/// hand a task object to a worker thread without copying the handle
fn handoff() -> Result<(), String> {
    let task = Strong::new(String::from("task parameters"));
    let worker = spawn_owned(task, |owned| {
        info!("worker owns {:?}, {} handle(s)", *owned, Strong::ref_count(&owned));
        owned.len()
    });
    let n = worker.join().map_err(|_| "worker panicked".to_string())?;
    info!("worker processed {n} bytes and dropped the task there");
    Ok(())
}

static STRESS_DESTROYS: AtomicCount = AtomicCount::new(0);

struct CountingDestroyer;

impl Destroyer<u64> for CountingDestroyer {
    unsafe fn destroy(target: *mut u64) {
        STRESS_DESTROYS.inc_get();
        drop(Box::from_raw(target));
    }
}

/// contended clone/drop churn from several threads, destructor must run once
fn stress() -> Result<(), String> {
    let target = NonNull::from(Box::leak(Box::new(1u64)));
    // SAFETY: target was just leaked from a Box
    let handle = unsafe { Strong::from_raw_with::<CountingDestroyer>(target) }
        .map_err(|e| e.to_string())?;

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let h = handle.clone();
            std::thread::spawn(move || {
                for _ in 0..100_000 {
                    let c = h.clone();
                    let w = Strong::downgrade(&c);
                    assert!(w.is_alive());
                    drop(w.upgrade());
                }
            })
        })
        .collect();
    drop(handle);
    for jh in threads {
        jh.join().map_err(|_| "stressor panicked".to_string())?;
    }

    info!("destructor runs: {}", STRESS_DESTROYS.get());
    assert_eq!(STRESS_DESTROYS.get(), 1);
    Ok(())
}
