// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{collections::VecDeque, sync::Arc};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::samples::{SamplingContext, Trial, TrialSampler};

type Fill = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct State {
    buffer: VecDeque<Trial>,
    /// Bumped by every invalidation. A fill only touches the buffer while the
    /// generation it started under is still current.
    generation: u64,
    context: Option<SamplingContext>,
    in_flight: Option<(u64, Fill)>,
    /// The most recently taken note, chained into the next fill when the buffer is empty.
    last_taken: Option<u8>,
}

/// A bounded look-ahead of ready Recognize trials.
#[derive(Clone)]
pub struct PrefetchQueue {
    sampler: Arc<TrialSampler>,
    capacity: usize,
    state: Arc<Mutex<State>>,
}

impl PrefetchQueue {
    pub fn new(sampler: Arc<TrialSampler>, capacity: usize) -> PrefetchQueue {
        PrefetchQueue {
            sampler,
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Sets the configuration trials are sampled under, or `None` to stop
    /// prefetching. Always invalidates.
    pub fn configure(&self, context: Option<SamplingContext>) {
        let mut state = self.state.lock();
        state.context = context;
        Self::invalidate_locked(&mut state);
    }

    /// Drops every buffered trial and detaches any running fill.
    pub fn invalidate(&self) {
        Self::invalidate_locked(&mut self.state.lock());
    }

    fn invalidate_locked(state: &mut State) {
        state.generation += 1;
        state.buffer.clear();
        state.in_flight = None;
        debug!(generation = state.generation, "Prefetch queue invalidated.");
    }

    /// Records a note played outside the queue so the next fill avoids it.
    pub fn exclude_note(&self, note: u8) {
        self.state.lock().last_taken = Some(note);
    }

    /// Tops the buffer up to capacity in the background. While a fill is running
    /// the same fill is returned.
    pub fn ensure_filled(&self) -> Fill {
        let mut state = self.state.lock();
        let generation = state.generation;
        if let Some((running, fill)) = &state.in_flight {
            if *running == generation {
                return fill.clone();
            }
        }

        let handle = tokio::spawn(fill_loop(
            self.sampler.clone(),
            self.state.clone(),
            generation,
            self.capacity,
        ));
        let fill: Fill = async move {
            if let Err(e) = handle.await {
                warn!(err = %e, "Prefetch fill failed.");
            }
        }
        .boxed()
        .shared();
        state.in_flight = Some((generation, fill.clone()));
        fill
    }

    /// Pops the next trial. When the buffer is empty this waits for a fill once
    /// before giving up.
    pub async fn take(&self) -> Option<Trial> {
        if let Some(trial) = self.pop() {
            return Some(trial);
        }
        self.ensure_filled().await;
        self.pop()
    }

    fn pop(&self) -> Option<Trial> {
        let mut state = self.state.lock();
        let trial = state.buffer.pop_front()?;
        state.last_taken = Some(trial.midi_note());
        Some(trial)
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The buffered notes, front first.
    pub fn notes(&self) -> Vec<u8> {
        self.state
            .lock()
            .buffer
            .iter()
            .map(|trial| trial.midi_note())
            .collect()
    }
}

async fn fill_loop(
    sampler: Arc<TrialSampler>,
    state: Arc<Mutex<State>>,
    generation: u64,
    capacity: usize,
) {
    loop {
        let (context, excluded) = {
            let state = state.lock();
            if state.generation != generation || state.buffer.len() >= capacity {
                break;
            }
            let Some(context) = state.context.clone() else {
                break;
            };
            let excluded = state
                .buffer
                .back()
                .map(|trial| trial.midi_note())
                .or(state.last_taken);
            (context, excluded)
        };

        let trial = sampler.sample(excluded, &context).await;

        let mut state = state.lock();
        if state.generation != generation {
            debug!(generation, "Discarding stale prefetch.");
            break;
        }
        match trial {
            Some(trial) => state.buffer.push_back(trial),
            None => break,
        }
    }

    let mut state = state.lock();
    if state
        .in_flight
        .as_ref()
        .is_some_and(|(running, _)| *running == generation)
    {
        state.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::music::{Chroma, MidiRange, NotesByChroma};
    use crate::samples::AudioFormat;
    use crate::testutil::{test_layout, MockAssets};

    fn context(pool: &[u8]) -> SamplingContext {
        SamplingContext {
            pool: pool.iter().filter_map(|c| Chroma::new(*c)).collect(),
            notes: Arc::new(NotesByChroma::new(MidiRange::full())),
            format: AudioFormat::Mp3,
        }
    }

    fn queue(assets: Arc<MockAssets>, capacity: usize) -> PrefetchQueue {
        PrefetchQueue::new(Arc::new(TrialSampler::new(assets, test_layout())), capacity)
    }

    fn all_assets(latency: Duration) -> Arc<MockAssets> {
        let assets = Arc::new(MockAssets::with_latency(latency));
        assets.add_all_instruments(AudioFormat::Mp3);
        assets
    }

    #[tokio::test(start_paused = true)]
    async fn fills_to_capacity_without_repeats() {
        let queue = queue(all_assets(Duration::ZERO), 10);
        queue.configure(Some(context(&[0, 6])));

        queue.ensure_filled().await;
        let notes = queue.notes();
        assert_eq!(10, notes.len());
        for pair in notes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert!(notes.iter().all(|n| n % 12 == 0 || n % 12 == 6));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fills_share_one_loop() {
        let queue = queue(all_assets(Duration::from_millis(5)), 4);
        queue.configure(Some(context(&[0, 4, 7])));

        let first = queue.ensure_filled();
        let second = queue.ensure_filled();
        tokio::join!(first, second);
        assert_eq!(4, queue.len());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_discards_in_flight_fill() {
        let queue = queue(all_assets(Duration::from_millis(10)), 10);
        queue.configure(Some(context(&[0, 6])));

        let _ = queue.ensure_filled();
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.invalidate();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(0, queue.len());

        queue.ensure_filled().await;
        assert_eq!(10, queue.len());
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_switches_pool() {
        let queue = queue(all_assets(Duration::from_millis(10)), 5);
        queue.configure(Some(context(&[0])));
        let _ = queue.ensure_filled();
        tokio::time::sleep(Duration::from_millis(25)).await;

        queue.configure(Some(context(&[3])));
        queue.ensure_filled().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let notes = queue.notes();
        assert_eq!(5, notes.len());
        assert!(notes.iter().all(|n| n % 12 == 3));
    }

    #[tokio::test(start_paused = true)]
    async fn take_waits_for_fill_once() {
        let queue = queue(all_assets(Duration::from_millis(10)), 3);
        queue.configure(Some(context(&[2])));

        let trial = queue.take().await.unwrap();
        assert_eq!(2, trial.chroma().index());
        assert_eq!(2, queue.len());

        // The next fill avoids the note that was just taken.
        let second = queue.take().await.unwrap();
        assert_ne!(trial.midi_note(), second.midi_note());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_yields_nothing() {
        let queue = queue(Arc::new(MockAssets::new()), 10);
        queue.configure(Some(context(&[0])));
        assert!(queue.take().await.is_none());

        queue.configure(None);
        assert!(queue.take().await.is_none());
    }
}
