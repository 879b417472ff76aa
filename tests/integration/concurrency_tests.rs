//! Multi-thread arbitration: exclusion, waiting and fail-if-locked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use voxelcore::{
    run_stress, AccessError, AccessOptions, ImageReadAccessor, ImageWriteAccessor, ImportData,
    StressConfig,
};

use super::test_utils::{read_item, u32_image, u32_values, u8_image, BLOCKED, PROMPT};

// =============================================================================
// Mutual Exclusion
// =============================================================================

#[test]
fn test_overlapping_writers_lose_no_updates() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let image = u32_image(&[4, 4, 2], 1);
    image.set_channel(ImportData::Copy(&[0; 128]), 0).unwrap();
    let active = AtomicUsize::new(0);

    thread::scope(|s| {
        for worker in 0..THREADS {
            let image = &image;
            let active = &active;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    // Alternate between the whole channel and slice 1 alone;
                    // both cover the first element of slice 1.
                    let (mut writer, offset) = if (worker + round) % 2 == 0 {
                        let writer = ImageWriteAccessor::new(image, AccessOptions::NONE).unwrap();
                        (writer, 16 * 4)
                    } else {
                        let slice = image.get_slice_data(1, 0, 0).unwrap();
                        let writer =
                            ImageWriteAccessor::for_item(image, slice, AccessOptions::NONE).unwrap();
                        (writer, 0)
                    };
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);

                    let bytes = &mut writer.data_mut()[offset..offset + 4];
                    let value = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    thread::yield_now();
                    bytes.copy_from_slice(&(value + 1).to_ne_bytes());

                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    });

    let slice = image.get_slice_data(1, 0, 0).unwrap();
    let values = u32_values(&read_item(&image, slice));
    assert_eq!(values[0] as usize, THREADS * ROUNDS);
    assert_eq!(image.active_writers(), 0);
}

#[test]
fn test_stress_run_stays_consistent() {
    let report = run_stress(&StressConfig {
        threads: 6,
        iterations: 300,
        extents: vec![8, 8, 4, 2],
        seed: 99,
    })
    .unwrap();
    assert!(report.consistent, "{:?}", report);
    assert_eq!(report.torn_reads, 0);
    assert_eq!(report.mismatched_elements, 0);
}

// =============================================================================
// Waiting and Failing
// =============================================================================

#[test]
fn test_disjoint_accessors_never_wait() {
    let image = u8_image(&[8, 8, 2], 1);
    image.set_volume(ImportData::Copy(&[0; 128]), 0, 0).unwrap();
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let slice = image.get_slice_data(0, 0, 0).unwrap();
            let _writer = ImageWriteAccessor::for_item(image, slice, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        s.spawn(move || {
            let slice = image.get_slice_data(1, 0, 0).unwrap();
            let writer = ImageWriteAccessor::for_item(image, slice, AccessOptions::NONE);
            done_tx.send(writer.is_ok()).unwrap();
        });
        assert!(done_rx.recv_timeout(PROMPT).unwrap());
        release_tx.send(()).unwrap();
    });
}

#[test]
fn test_fail_if_locked_returns_immediately() {
    let image = u8_image(&[4, 4], 1);
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let _writer = ImageWriteAccessor::new(image, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        let (result_tx, result_rx) = mpsc::channel();
        s.spawn(move || {
            let result = ImageReadAccessor::new(image, AccessOptions::FAIL_IF_LOCKED).err();
            result_tx.send(result).unwrap();
        });
        assert_eq!(
            result_rx.recv_timeout(PROMPT).unwrap(),
            Some(AccessError::MemoryLocked)
        );
        release_tx.send(()).unwrap();
    });
}

#[test]
fn test_conflicting_accessor_waits_for_release() {
    let image = u8_image(&[4, 4], 1);
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (acquired_tx, acquired_rx) = mpsc::channel();

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let mut writer = ImageWriteAccessor::new(image, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            writer.data_mut().fill(5);
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        s.spawn(move || {
            let reader = ImageReadAccessor::new(image, AccessOptions::NONE).unwrap();
            acquired_tx.send(reader.data().to_vec()).unwrap();
        });

        // Still blocked while the writer lives.
        assert!(acquired_rx.recv_timeout(BLOCKED).is_err());
        release_tx.send(()).unwrap();

        // The reader observes the complete write.
        assert_eq!(acquired_rx.recv_timeout(PROMPT).unwrap(), vec![5; 16]);
    });
}

#[test]
fn test_many_waiters_all_proceed() {
    const WAITERS: usize = 6;

    let image = u8_image(&[4, 4, 4], 1);
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();
    let start = Arc::new(Barrier::new(WAITERS + 1));

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let _writer = ImageWriteAccessor::new(image, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        for s_index in 0..WAITERS {
            let start = Arc::clone(&start);
            let done_tx = done_tx.clone();
            s.spawn(move || {
                let slice = image.get_slice_data((s_index % 4) as i32, 0, 0).unwrap();
                start.wait();
                let reader = ImageReadAccessor::for_item(image, slice, AccessOptions::NONE).unwrap();
                done_tx.send(reader.size()).unwrap();
            });
        }
        start.wait();

        assert!(done_rx.recv_timeout(BLOCKED).is_err());
        release_tx.send(()).unwrap();
        for _ in 0..WAITERS {
            assert_eq!(done_rx.recv_timeout(PROMPT).unwrap(), 16);
        }
    });

    assert_eq!(image.active_readers(), 0);
    assert_eq!(image.active_writers(), 0);
}

// =============================================================================
// Concurrent Composition
// =============================================================================

#[test]
fn test_concurrent_requests_share_one_composition() {
    const THREADS: usize = 8;

    let image = u8_image(&[2, 2, 4], 1);
    for s in 0..4u8 {
        image.set_slice(ImportData::Copy(&[s; 4]), s as i32, 0, 0).unwrap();
    }
    let start = Barrier::new(THREADS);

    let volumes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let image = &image;
                let start = &start;
                s.spawn(move || {
                    start.wait();
                    image.get_volume_data(0, 0).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for volume in &volumes[1..] {
        assert!(Arc::ptr_eq(volume, &volumes[0]));
    }
    assert_eq!(
        read_item(&image, Arc::clone(&volumes[0])),
        vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]
    );
}

#[test]
fn test_composition_waits_for_live_writer() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Manage(vec![1, 1]), 0, 0, 0).unwrap();
    image.set_slice(ImportData::Copy(&[2, 2]), 1, 0, 0).unwrap();
    let adopted = image.get_slice_data(0, 0, 0).unwrap();
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (composed_tx, composed_rx) = mpsc::channel();

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let mut writer = ImageWriteAccessor::for_item(image, adopted, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            writer.data_mut().copy_from_slice(&[9, 9]);
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        // The adopted slice must be copied into the volume, so composing
        // waits until the writer is gone.
        s.spawn(move || {
            composed_tx.send(image.get_volume_data(0, 0)).unwrap();
        });
        assert!(composed_rx.recv_timeout(BLOCKED).is_err());
        release_tx.send(()).unwrap();

        let volume = composed_rx.recv_timeout(PROMPT).unwrap().unwrap();
        assert_eq!(read_item(image, volume), vec![9, 9, 2, 2]);
    });
    assert_eq!(image.active_writers(), 0);
}

#[test]
fn test_volume_store_waits_for_writer_on_replaced_slice() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Manage(vec![1, 1]), 0, 0, 0).unwrap();
    let adopted = image.get_slice_data(0, 0, 0).unwrap();
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (stored_tx, stored_rx) = mpsc::channel();

    thread::scope(|s| {
        let image = &image;
        s.spawn(move || {
            let _writer = ImageWriteAccessor::for_item(image, adopted, AccessOptions::NONE).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv_timeout(PROMPT).unwrap();

        s.spawn(move || {
            let stored = image.set_volume(ImportData::Copy(&[5, 5, 6, 6]), 0, 0);
            stored_tx.send(stored).unwrap();
        });
        assert!(stored_rx.recv_timeout(BLOCKED).is_err());
        release_tx.send(()).unwrap();
        assert_eq!(stored_rx.recv_timeout(PROMPT).unwrap(), Ok(true));
    });

    let slice = image.get_slice_data(0, 0, 0).unwrap();
    assert_eq!(read_item(&image, slice), vec![5, 5]);
}
