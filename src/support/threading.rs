//-
// Copyright (c) 2026, The igrab developers
//
// This file is part of igrab.
//
// igrab is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// igrab is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// igrab. If not, see <http://www.gnu.org/licenses/>.

//! Utilities for working with threads.

use std::sync::Mutex;

/// A fixed-size pool of scoped worker threads.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    /// The maximum number of items processed at once.
    pub threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        WorkerPool {
            threads: threads.max(1),
        }
    }

    /// Run `mapper` over every input, with at most `threads` invocations in
    /// flight, feeding each output to `reduce` serially.
    ///
    /// Inputs are handed out in order, but outputs arrive in completion order.
    /// With a single thread, everything happens on the calling thread.
    ///
    /// Once this call returns, any threads that were spawned have been cleaned
    /// up.
    pub fn run<I: IntoIterator, O>(
        self,
        inputs: I,
        mapper: impl Fn(I::Item) -> O + Send + Sync,
        mut reduce: impl FnMut(O) + Send,
    ) where
        I::Item: Send,
    {
        if 1 == self.threads {
            for input in inputs {
                reduce(mapper(input));
            }
            return;
        }

        let reduce = Mutex::new(reduce);
        // Zero capacity so that an input is only taken off the iterator once
        // a worker is actually free for it.
        let (input_send, input_recv) = crossbeam::channel::bounded(0);

        crossbeam::scope(|s| {
            for _ in 0..self.threads {
                let input_recv = input_recv.clone();
                let mapper = &mapper;
                let reduce = &reduce;
                s.spawn(move |_| {
                    for input in input_recv.iter() {
                        let output = mapper(input);
                        let mut reduce = reduce.lock().unwrap();
                        (*reduce)(output);
                    }
                });
            }

            for input in inputs {
                if input_send.send(input).is_err() {
                    break;
                }
            }
            drop(input_send);
        })
        .unwrap();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn all_inputs_processed_with_bounded_concurrency() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut outputs = Vec::new();

        WorkerPool::new(3).run(
            0..20,
            |i| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            },
            |o| outputs.push(o),
        );

        outputs.sort();
        assert_eq!((0..20).map(|i| i * 2).collect::<Vec<_>>(), outputs);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn single_thread_preserves_order() {
        let mut outputs = Vec::new();
        WorkerPool::new(0).run(vec!["a", "b", "c"], |s| s, |o| outputs.push(o));
        assert_eq!(vec!["a", "b", "c"], outputs);
    }
}
