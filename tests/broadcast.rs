// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use mandelqueue::{BoundedBlockingQueue, BroadcastError, BroadcastRingQueue, OverrunPolicy};
use rand::Rng;
use std::thread;
use std::time::Duration;

const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

fn jitter() {
    let mut rng = rand::thread_rng();
    if rng.gen_range(0, 10) == 0 {
        thread::sleep(Duration::from_micros(rng.gen_range(1, 100)));
    }
}

// Subscribers hand back one credit per item read.  The writer spends
// one credit from each before reusing a slot, so a failing ring never
// actually overruns.
#[test]
fn credited_writer_never_overruns() {
    const CAPACITY: usize = 4;
    const ITEMS: usize = 5_000;

    let ring = BroadcastRingQueue::new(CAPACITY, NAMES.iter().cloned()).unwrap();
    let credits: Vec<BoundedBlockingQueue<()>> = NAMES
        .iter()
        .map(|_| BoundedBlockingQueue::unbounded())
        .collect();

    let seen = crossbeam::scope(|s| {
        let readers: Vec<_> = NAMES
            .iter()
            .map(|name| {
                let ring = &ring;
                let id = ring.subscriber_id(name).unwrap();
                let credit = &credits[id];
                s.spawn(move |_| {
                    let mut got = Vec::new();
                    while let Some(item) = ring.pop(id).unwrap() {
                        got.push(item);
                        credit.push(()).unwrap();
                        jitter();
                    }
                    got
                })
            })
            .collect();

        for i in 0..ITEMS {
            if i >= CAPACITY {
                for credit in &credits {
                    credit.pop().unwrap();
                }
            }
            ring.push(i).unwrap();
        }
        ring.close(Duration::from_secs(5)).unwrap();

        readers
            .into_iter()
            .map(|r| r.join().unwrap())
            .collect::<Vec<Vec<usize>>>()
    })
    .unwrap();

    for got in seen {
        assert_eq!(got, (0..ITEMS).collect::<Vec<_>>());
    }
    for id in 0..NAMES.len() {
        assert!(!ring.is_alive(id));
    }
}

#[test]
fn blocking_writer_keeps_pace_with_slowest_reader() {
    const ITEMS: usize = 200;

    let ring =
        BroadcastRingQueue::with_policy(2, vec!["fast", "slow"], OverrunPolicy::Block).unwrap();

    let (fast, slow) = crossbeam::scope(|s| {
        let ring = &ring;
        let fast = s.spawn(move |_| {
            let mut got = Vec::new();
            while let Some(item) = ring.pop(0).unwrap() {
                got.push(item);
            }
            got
        });
        let slow = s.spawn(move |_| {
            let mut got = Vec::new();
            while let Some(item) = ring.pop(1).unwrap() {
                got.push(item);
                if item % 10 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            got
        });

        for i in 0..ITEMS {
            ring.push(i).unwrap();
        }
        ring.close(Duration::from_secs(5)).unwrap();
        (fast.join().unwrap(), slow.join().unwrap())
    })
    .unwrap();

    let expected: Vec<usize> = (0..ITEMS).collect();
    assert_eq!(fast, expected);
    assert_eq!(slow, expected);
}

#[test]
fn close_names_only_the_absent_subscriber() {
    let ring = BroadcastRingQueue::new(8, vec!["present", "absent"]).unwrap();
    for i in 0..5 {
        ring.push(i).unwrap();
    }

    crossbeam::scope(|s| {
        let ring = &ring;
        let present = s.spawn(move |_| {
            let mut got = Vec::new();
            while let Some(item) = ring.pop(0).unwrap() {
                got.push(item);
            }
            got
        });

        let err = ring.close(Duration::from_millis(200)).unwrap_err();
        assert_eq!(
            err,
            BroadcastError::TimeoutOnClose(mandelqueue::error::BlockingTasks(vec![
                "absent".to_string()
            ]))
        );
        assert_eq!(present.join().unwrap(), vec![0, 1, 2, 3, 4]);
    })
    .unwrap();

    // A late subscriber still drains its backlog, then detaches.
    let mut late = Vec::new();
    while let Some(item) = ring.pop(1).unwrap() {
        late.push(item);
    }
    assert_eq!(late, vec![0, 1, 2, 3, 4]);
    assert!(ring.close(Duration::from_millis(10)).is_ok());
}

#[test]
fn stalled_subscriber_is_blamed_for_overrun() {
    let ring = BroadcastRingQueue::new(3, vec!["eager", "stalled"]).unwrap();
    let read: BoundedBlockingQueue<usize> = BoundedBlockingQueue::unbounded();

    crossbeam::scope(|s| {
        let ring = &ring;
        let read = &read;
        let eager = s.spawn(move |_| {
            while let Some(item) = ring.pop(0).unwrap() {
                read.push(item).unwrap();
            }
        });

        // Wait for the eager reader after every push, so only the
        // stalled one can be holding a slot.
        let mut failure = None;
        for i in 0..10 {
            if let Err(e) = ring.push(i) {
                failure = Some(e);
                break;
            }
            assert_eq!(read.pop(), Ok(i));
        }
        let failure = failure.expect("the ring never overran");
        assert!(failure.is_fatal());
        assert_eq!(failure.blocking_tasks(), &["stalled".to_string()]);

        let _ = ring.close(Duration::from_millis(50));
        eager.join().unwrap();
    })
    .unwrap();
}
