//! Three-slot frame exchange between the acquisition thread and a consumer.
//!
//! The producer owns the *background* frame and writes into it in place.
//! When a cycle completes it swaps background with *mid* under a mutex. The
//! consumer swaps *mid* with its *foreground* frame when mid is newer and
//! then reads foreground without any lock. The mutex only ever guards a box
//! swap, so neither side waits on the other's processing.
//!
//! ```text
//!   producer                 exchange                consumer
//!  [background] --publish--> [  mid  ] --refresh--> [foreground]
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::{DataFrame, FrameLayout};

#[derive(Debug)]
struct Exchange {
    mid: Mutex<Box<DataFrame>>,
}

impl Exchange {
    /// The mid slot stays structurally valid even if a holder panicked: the
    /// guard only ever wraps a swap.
    fn lock(&self) -> MutexGuard<'_, Box<DataFrame>> {
        self.mid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer half: the background frame plus the sequence counter.
#[derive(Debug)]
pub struct BackBuffer {
    frame: Box<DataFrame>,
    exchange: Arc<Exchange>,
    last_sequence: u64,
}

/// Consumer half: the foreground frame.
#[derive(Debug)]
pub struct FrontBuffer {
    frame: Box<DataFrame>,
    exchange: Arc<Exchange>,
}

/// Allocate the three frames of a triad, zeroed and sized to `layout`.
pub fn triad(layout: &FrameLayout) -> (BackBuffer, FrontBuffer) {
    let exchange = Arc::new(Exchange {
        mid: Mutex::new(Box::new(DataFrame::with_layout(layout))),
    });
    let back = BackBuffer {
        frame: Box::new(DataFrame::with_layout(layout)),
        exchange: exchange.clone(),
        last_sequence: 0,
    };
    let front = FrontBuffer {
        frame: Box::new(DataFrame::with_layout(layout)),
        exchange,
    };
    (back, front)
}

impl BackBuffer {
    /// Start a new cycle: stamp the next sequence number on the background
    /// frame and clear last cycle's tracking results.
    pub fn begin_cycle(&mut self) -> u64 {
        self.last_sequence += 1;
        self.frame.sequence_number = self.last_sequence;
        self.frame.reset_tracking();
        self.last_sequence
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut DataFrame {
        &mut self.frame
    }

    /// Sequence number of the most recently started cycle.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Hand the background frame to the consumer side. Returns false when
    /// the background frame is not newer than mid (nothing was written).
    pub fn publish(&mut self) -> bool {
        let mut mid = self.exchange.lock();
        if self.frame.sequence_number > mid.sequence_number {
            std::mem::swap(&mut self.frame, &mut *mid);
            true
        } else {
            false
        }
    }
}

impl FrontBuffer {
    /// Pull the latest published frame into the foreground. Returns true if
    /// the foreground changed.
    pub fn refresh(&mut self) -> bool {
        let mut mid = self.exchange.lock();
        if mid.sequence_number > self.frame.sequence_number {
            std::mem::swap(&mut self.frame, &mut *mid);
            true
        } else {
            false
        }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn sequence_number(&self) -> u64 {
        self.frame.sequence_number
    }
}

/// Resize every image buffer of all three frames to `layout`, zero-filled.
///
/// Both halves are borrowed mutably, so this can only run while the
/// producer half is not inside the acquisition thread.
pub fn resize(back: &mut BackBuffer, front: &mut FrontBuffer, layout: &FrameLayout) {
    back.frame.apply_layout(layout);
    back.exchange.lock().apply_layout(layout);
    front.frame.apply_layout(layout);
}

/// Per-frame view used by tests to look at every slot.
#[cfg(test)]
pub(crate) fn frames<'a>(
    back: &'a BackBuffer,
    front: &'a FrontBuffer,
) -> (&'a DataFrame, MutexGuard<'a, Box<DataFrame>>, &'a DataFrame) {
    (&back.frame, back.exchange.lock(), &front.frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::checksum;
    use crate::types::ColorResolution;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn small_layout() -> FrameLayout {
        FrameLayout {
            color: (8, 4),
            depth: (8, 4),
            scan: (0, 0),
        }
    }

    #[test]
    fn refresh_before_publish_is_noop() {
        let (_back, mut front) = triad(&small_layout());
        assert!(!front.refresh());
        assert_eq!(front.sequence_number(), 0);
    }

    #[test]
    fn consumer_sees_latest_published_frame() {
        let (mut back, mut front) = triad(&small_layout());
        for _ in 0..3 {
            back.begin_cycle();
            assert!(back.publish());
        }
        assert!(front.refresh());
        assert_eq!(front.sequence_number(), 3);
        assert!(!front.refresh());
        assert_eq!(front.sequence_number(), 3);
    }

    #[test]
    fn publishing_a_stale_frame_is_refused() {
        let (mut back, mut front) = triad(&small_layout());
        back.begin_cycle();
        back.publish();
        front.refresh();
        // Background now holds the old foreground (sequence 0).
        assert!(!back.publish());
        back.begin_cycle();
        assert!(back.publish());
        assert!(front.refresh());
        assert_eq!(front.sequence_number(), 2);
    }

    #[test]
    fn swaps_move_buffers_without_copying() {
        let (mut back, mut front) = triad(&small_layout());
        back.begin_cycle();
        let ptr = back.frame().color_image.as_slice().as_ptr();
        back.publish();
        front.refresh();
        assert_eq!(front.frame().color_image.as_slice().as_ptr(), ptr);
    }

    #[test]
    fn resize_reaches_all_three_frames() {
        let layout = FrameLayout::default()
            .with_color(&ColorResolution::Res320x240x30.value());
        let (mut back, mut front) = triad(&layout);
        back.begin_cycle();
        back.frame_mut().color_image.as_mut_slice().fill(0xAB);
        back.publish();

        let big = FrameLayout::default()
            .with_color(&ColorResolution::Res1920x1080x30.value());
        resize(&mut back, &mut front, &big);

        {
            let (bg, mid, fg) = frames(&back, &front);
            for frame in [bg, &**mid, fg] {
                assert_eq!(frame.color_image.as_slice().len(), 1920 * 1080 * 4);
                assert!(frame.color_image.as_slice().iter().all(|&b| b == 0));
            }
        }

        for _ in 0..4 {
            back.begin_cycle();
            back.publish();
            front.refresh();
            assert_eq!(front.frame().color_image.as_slice().len(), 1920 * 1080 * 4);
        }
    }

    /// Producer writes a pattern derived from the sequence number and records
    /// the checksum; the consumer must only ever see matching content.
    #[test]
    fn concurrent_consumer_never_sees_torn_frames() {
        let (mut back, mut front) = triad(&FrameLayout {
            color: (64, 48),
            depth: (64, 48),
            scan: (0, 0),
        });
        let done = Arc::new(AtomicBool::new(false));
        let done_producer = done.clone();

        let producer = std::thread::spawn(move || {
            let mut sums = HashMap::new();
            for _ in 0..2_000 {
                let seq = back.begin_cycle();
                let frame = back.frame_mut();
                for (i, b) in frame.color_image.as_mut_slice().iter_mut().enumerate() {
                    *b = (seq as usize).wrapping_mul(31).wrapping_add(i) as u8;
                }
                for (i, d) in frame.depth_image.as_mut_slice().iter_mut().enumerate() {
                    *d = (seq as usize + i) as u16;
                }
                sums.insert(seq, checksum(frame.color_image.as_slice()));
                back.publish();
            }
            done_producer.store(true, Ordering::Release);
            sums
        });

        let mut seen = Vec::new();
        let mut last = 0;
        while !done.load(Ordering::Acquire) {
            front.refresh();
            let frame = front.frame();
            assert!(frame.sequence_number >= last);
            last = frame.sequence_number;
            if frame.sequence_number > 0 {
                let first_depth = frame.depth_image.as_slice()[0];
                assert_eq!(first_depth, frame.sequence_number as u16);
                seen.push((frame.sequence_number, checksum(frame.color_image.as_slice())));
            }
        }
        front.refresh();

        let sums = producer.join().unwrap();
        for (seq, sum) in seen {
            assert_eq!(sums[&seq], sum, "frame {seq} was torn");
        }
        assert_eq!(front.sequence_number(), 2_000);
    }

    proptest! {
        /// Any interleaving of publishes and refreshes keeps the foreground
        /// sequence non-decreasing and never ahead of the producer.
        #[test]
        fn interleavings_are_monotonic(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let (mut back, mut front) = triad(&small_layout());
            let mut last_front = 0;
            let mut last_back = 0;
            for publish in ops {
                if publish {
                    let seq = back.begin_cycle();
                    prop_assert!(seq > last_back);
                    last_back = seq;
                    back.publish();
                } else {
                    front.refresh();
                    let seq = front.sequence_number();
                    prop_assert!(seq >= last_front);
                    prop_assert!(seq <= last_back);
                    last_front = seq;
                }
            }
            front.refresh();
            prop_assert_eq!(front.sequence_number(), last_back);
        }
    }
}
