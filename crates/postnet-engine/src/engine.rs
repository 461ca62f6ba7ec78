use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use postnet_codec::{Schema, Value};

use crate::post::Post;
use crate::timeline::TimelineBucket;

const DEFAULT_SNAPSHOT_STRIDE: u64 = 8;
const DEFAULT_SNAPSHOT_COUNT: usize = 256;

type OnTick<S> = Box<dyn Fn(&S) -> S>;
type OnPost<S> = Box<dyn Fn(&Value, &S) -> S>;
type Smooth<S> = Box<dyn Fn(&S, &S) -> S>;

/// Point-in-time counters and ranges useful for tests and operational
/// inspection. Mirrors the fields a diagnostic dump of the engine would
/// expose (spec §6).
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub remote_post_count: usize,
    pub local_post_count: usize,
    pub max_contiguous_remote_index: i64,
    pub max_remote_index: i64,
    pub no_pending_posts_before_ms: Option<u64>,
    pub cache_drop_guard_hits: u64,
    pub snapshot_start_tick: Option<u64>,
    pub snapshot_ticks: Vec<u64>,
    /// `(tick, remote_len, local_len)` for every tick with at least one post.
    pub timeline_ticks: Vec<(u64, usize, usize)>,
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

/// The deterministic, transport-agnostic replay core (spec §3-4.6). Owns no
/// network state: remote posts are admitted as they're decoded, local posts
/// are predicted as they're made, and `compute_state_at` replays pure
/// transition functions over the timeline they build up.
pub struct ReplayEngine<S: 'static> {
    room: String,
    on_tick: OnTick<S>,
    on_post: OnPost<S>,
    smooth: Option<Smooth<S>>,
    #[allow(dead_code)]
    packer: Schema,
    tick_rate: u32,
    tolerance_ms: u64,
    cache_enabled: bool,
    snapshot_stride: u64,
    snapshot_count: usize,

    initial: Rc<S>,

    remote_posts: HashMap<u64, Rc<Post>>,
    local_posts: HashMap<String, Rc<Post>>,
    timeline: HashMap<u64, TimelineBucket>,
    snapshots: BTreeMap<u64, Rc<S>>,
    snapshot_start_tick: Option<u64>,

    initial_time: Option<u64>,
    initial_tick: Option<u64>,
    max_contiguous_remote_index: i64,
    max_remote_index: i64,
    no_pending_posts_before_ms: Option<u64>,
    cache_drop_guard_hits: u64,
}

impl<S: 'static> ReplayEngine<S> {
    pub fn new<T, P>(
        room: impl Into<String>,
        initial: S,
        on_tick: T,
        on_post: P,
        packer: Schema,
        tick_rate: u32,
        tolerance_ms: u64,
    ) -> Self
    where
        T: Fn(&S) -> S + 'static,
        P: Fn(&Value, &S) -> S + 'static,
    {
        Self {
            room: room.into(),
            on_tick: Box::new(on_tick),
            on_post: Box::new(on_post),
            smooth: None,
            packer,
            tick_rate,
            tolerance_ms,
            cache_enabled: true,
            snapshot_stride: DEFAULT_SNAPSHOT_STRIDE,
            snapshot_count: DEFAULT_SNAPSHOT_COUNT,
            initial: Rc::new(initial),
            remote_posts: HashMap::new(),
            local_posts: HashMap::new(),
            timeline: HashMap::new(),
            snapshots: BTreeMap::new(),
            snapshot_start_tick: None,
            initial_time: None,
            initial_tick: None,
            max_contiguous_remote_index: -1,
            max_remote_index: -1,
            no_pending_posts_before_ms: None,
            cache_drop_guard_hits: 0,
        }
    }

    pub fn with_smooth(mut self, smooth: impl Fn(&S, &S) -> S + 'static) -> Self {
        self.smooth = Some(Box::new(smooth));
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_snapshot_stride(mut self, stride: u64) -> Self {
        self.snapshot_stride = stride.max(1);
        self
    }

    pub fn with_snapshot_count(mut self, count: usize) -> Self {
        self.snapshot_count = count.max(1);
        self
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn initial_time(&self) -> Option<u64> {
        self.initial_time
    }

    pub fn initial_tick(&self) -> Option<u64> {
        self.initial_tick
    }

    pub fn post_count(&self) -> u64 {
        (self.max_remote_index + 1).max(0) as u64
    }

    pub fn is_locally_predicted(&self, name: &str) -> bool {
        self.local_posts.contains_key(name)
    }

    /// Admits a post the broker has authoritatively assigned an index to.
    /// Duplicate indices are ignored (spec §3: admission is idempotent).
    pub fn admit_remote_post(&mut self, post: Post) {
        debug_assert!(post.index >= 0, "remote posts always carry a real index");
        let index = post.index as u64;

        if index == 0 && self.initial_time.is_none() {
            self.initial_time = Some(post.official_time(self.tolerance_ms));
            self.initial_tick = Some(post.official_tick(self.tolerance_ms, self.tick_rate));
        }

        if self.remote_posts.contains_key(&index) {
            return;
        }

        let tick = post.official_tick(self.tolerance_ms, self.tick_rate);
        self.guard_pre_window_write(tick);

        let post = Rc::new(post);
        self.remote_posts.insert(index, Rc::clone(&post));
        self.max_remote_index = self.max_remote_index.max(index as i64);

        // Advance the gap-free frontier, pulling the safe-prune watermark
        // along with it: each newly-contiguous post proves nothing earlier
        // than its own official time is still pending (spec §4.6 step 5).
        loop {
            let next = (self.max_contiguous_remote_index + 1) as u64;
            let Some(next_post) = self.remote_posts.get(&next) else {
                break;
            };
            let official = next_post.official_time(self.tolerance_ms);
            self.max_contiguous_remote_index += 1;
            self.advance_watermark(official);
        }

        self.timeline.entry(tick).or_default().insert_remote(Rc::clone(&post));
        self.invalidate_from(tick);
    }

    /// Speculatively applies a locally made post before its echo arrives.
    /// A second prediction under the same name replaces the first.
    pub fn predict_local_post(&mut self, post: Post) {
        debug_assert_eq!(post.index, -1, "a predicted post has no broker index yet");
        if self.local_posts.contains_key(&post.name) {
            self.remove_local_post(&post.name);
        }

        let tick = post.official_tick(self.tolerance_ms, self.tick_rate);
        self.guard_pre_window_write(tick);

        let post = Rc::new(post);
        self.local_posts.insert(post.name.clone(), Rc::clone(&post));
        self.timeline.entry(tick).or_default().local.push(post);
    }

    /// Replaces a predicted post with its authoritative echo: the matching
    /// local post is removed first, then the remote post is admitted.
    pub fn receive_echo(&mut self, local_name: &str, remote: Post) {
        self.remove_local_post(local_name);
        self.admit_remote_post(remote);
    }

    fn remove_local_post(&mut self, name: &str) {
        let Some(post) = self.local_posts.remove(name) else {
            return;
        };
        let tick = post.official_tick(self.tolerance_ms, self.tick_rate);
        if let Some(bucket) = self.timeline.get_mut(&tick) {
            bucket.local.retain(|p| !Rc::ptr_eq(p, &post));
            if bucket.is_empty() {
                self.timeline.remove(&tick);
            }
        }
        self.invalidate_from(tick);
    }

    /// If the owning cache window has already moved past `tick`, the cache
    /// can no longer represent a write at `tick` correctly; drop it instead
    /// of silently corrupting history (spec §4.6 cache-drop guard).
    fn guard_pre_window_write(&mut self, tick: u64) {
        if !self.cache_enabled {
            return;
        }
        if let Some(start) = self.snapshot_start_tick {
            if tick < start {
                self.cache_drop_guard_hits += 1;
                self.snapshots.clear();
                self.snapshot_start_tick = None;
            }
        }
    }

    fn invalidate_from(&mut self, tick: u64) {
        self.snapshots.retain(|&t, _| t < tick);
    }

    fn advance_watermark(&mut self, candidate_ms: u64) {
        self.no_pending_posts_before_ms = Some(match self.no_pending_posts_before_ms {
            Some(current) => current.max(candidate_ms),
            None => candidate_ms,
        });
    }

    /// Call when the broker reports the latest index it has assigned in this
    /// room. If our contiguous frontier already covers it, every post up to
    /// one tick before `server_time` is provably complete.
    pub fn on_latest_post_index(&mut self, latest_index: i64, server_time: u64) {
        if latest_index > self.max_contiguous_remote_index {
            return;
        }
        let margin_ms = 1000 / self.tick_rate.max(1) as u64;
        let candidate = server_time
            .saturating_sub(self.tolerance_ms)
            .saturating_sub(margin_ms);
        self.advance_watermark(candidate);
    }

    fn safe_prune_tick(&self) -> Option<u64> {
        let watermark = self.no_pending_posts_before_ms?;
        Some(watermark * self.tick_rate as u64 / 1000)
    }

    fn cache_window_ticks(&self) -> u64 {
        self.snapshot_stride * self.snapshot_count.saturating_sub(1) as u64
    }

    fn safe_compute_tick(&self, requested: u64) -> u64 {
        match self.safe_prune_tick() {
            Some(safe) => requested.min(safe + self.cache_window_ticks()),
            None => requested,
        }
    }

    fn apply_tick(&self, state: &Rc<S>, tick: u64) -> Rc<S> {
        let mut next = (self.on_tick)(state);
        if let Some(bucket) = self.timeline.get(&tick) {
            for post in &bucket.remote {
                next = (self.on_post)(&post.data, &next);
            }
            for post in &bucket.local {
                next = (self.on_post)(&post.data, &next);
            }
        }
        Rc::new(next)
    }

    /// The state right after the first tick's own posts have been applied —
    /// the seed every replay (cached or not) starts from.
    fn seed_state(&self, initial_tick: u64) -> Rc<S> {
        self.apply_tick(&self.initial, initial_tick)
    }

    fn replay_from_initial(&self, at_tick: u64) -> Rc<S> {
        let Some(initial_tick) = self.initial_tick else {
            return Rc::clone(&self.initial);
        };
        let mut state = self.seed_state(initial_tick);
        let mut tick = initial_tick;
        while tick < at_tick {
            tick += 1;
            state = self.apply_tick(&state, tick);
        }
        state
    }

    fn ensure_snapshots(&mut self, at_tick: u64) {
        let Some(initial_tick) = self.initial_tick else {
            return;
        };
        if self.snapshot_start_tick.is_none() {
            let seed = self.seed_state(initial_tick);
            self.snapshot_start_tick = Some(initial_tick);
            self.snapshots.entry(initial_tick).or_insert(seed);
        }

        loop {
            let latest_tick = *self
                .snapshots
                .keys()
                .next_back()
                .expect("snapshot cache always holds at least the initial tick");
            if latest_tick >= at_tick {
                break;
            }
            let next_tick = latest_tick + self.snapshot_stride;
            let mut state = Rc::clone(self.snapshots.get(&latest_tick).unwrap());
            let mut tick = latest_tick;
            while tick < next_tick {
                tick += 1;
                state = self.apply_tick(&state, tick);
            }
            self.snapshots.insert(next_tick, state);

            if self.snapshots.len() > self.snapshot_count {
                if let Some(&oldest) = self.snapshots.keys().next() {
                    self.snapshots.remove(&oldest);
                }
                self.snapshot_start_tick = self.snapshots.keys().next().copied();
                if let Some(start) = self.snapshot_start_tick {
                    self.prune_before_tick(start);
                }
            }
        }
    }

    /// Drops timeline/post bookkeeping older than `requested_tick`, but never
    /// past what the safe-prune watermark has proven complete — doing so
    /// would silently discard history a late-arriving remote post still
    /// needs (spec §4.6).
    fn prune_before_tick(&mut self, requested_tick: u64) {
        let Some(safe_prune_tick) = self.safe_prune_tick() else {
            return;
        };
        let effective = if safe_prune_tick < requested_tick {
            self.cache_drop_guard_hits += 1;
            safe_prune_tick
        } else {
            requested_tick
        };

        let stale: Vec<u64> = self
            .timeline
            .keys()
            .copied()
            .filter(|&t| t < effective)
            .collect();
        for tick in stale {
            let Some(bucket) = self.timeline.remove(&tick) else {
                continue;
            };
            for post in bucket.remote {
                self.remote_posts.remove(&(post.index as u64));
            }
            for post in bucket.local {
                self.local_posts.remove(&post.name);
            }
        }
    }

    /// Replays transitions up to `at_tick`, using the snapshot cache to skip
    /// the already-settled prefix when enabled.
    pub fn compute_state_at(&mut self, at_tick: u64) -> Rc<S> {
        let at_tick = self.safe_compute_tick(at_tick);
        let Some(initial_tick) = self.initial_tick else {
            return Rc::clone(&self.initial);
        };
        if at_tick < initial_tick {
            return Rc::clone(&self.initial);
        }
        if !self.cache_enabled {
            return self.replay_from_initial(at_tick);
        }

        self.ensure_snapshots(at_tick);
        let (&base_tick, base_state) = self
            .snapshots
            .range(..=at_tick)
            .next_back()
            .unwrap_or((&initial_tick, &self.initial));
        let mut state = Rc::clone(base_state);
        let mut tick = base_tick;
        while tick < at_tick {
            tick += 1;
            state = self.apply_tick(&state, tick);
        }
        state
    }

    pub fn compute_current_state(&mut self, current_tick: u64) -> Rc<S> {
        self.compute_state_at(current_tick)
    }

    /// Blends a lagged, fully-settled "remote" tick with the caller's
    /// current "local" tick via the configured `smooth` function (spec §4.6).
    /// Without one configured, the remote state is returned unchanged.
    pub fn compute_render_state(&mut self, current_tick: u64, ping_ms: Option<f32>) -> Rc<S> {
        let tol_ticks = ceil_div(self.tolerance_ms * self.tick_rate as u64, 1000);
        let half_rtt_ticks = match ping_ms {
            Some(ping) if ping.is_finite() && ping > 0.0 => {
                let ticks = (ping as f64 / 2.0) * self.tick_rate as f64 / 1000.0;
                ticks.ceil().max(0.0) as u64
            }
            _ => 0,
        };
        let remote_lag = tol_ticks.max(half_rtt_ticks + 1);
        let remote_tick = current_tick.saturating_sub(remote_lag);

        let remote_state = self.compute_state_at(remote_tick);
        match &self.smooth {
            Some(smooth) => {
                let local_state = self.compute_state_at(current_tick);
                Rc::new(smooth(&remote_state, &local_state))
            }
            None => remote_state,
        }
    }

    pub fn dump(&self) -> Diagnostics {
        let mut timeline_ticks: Vec<(u64, usize, usize)> = self
            .timeline
            .iter()
            .map(|(&tick, bucket)| (tick, bucket.remote.len(), bucket.local.len()))
            .collect();
        timeline_ticks.sort_by_key(|&(tick, _, _)| tick);

        Diagnostics {
            remote_post_count: self.remote_posts.len(),
            local_post_count: self.local_posts.len(),
            max_contiguous_remote_index: self.max_contiguous_remote_index,
            max_remote_index: self.max_remote_index,
            no_pending_posts_before_ms: self.no_pending_posts_before_ms,
            cache_drop_guard_hits: self.cache_drop_guard_hits,
            snapshot_start_tick: self.snapshot_start_tick,
            snapshot_ticks: self.snapshots.keys().copied().collect(),
            timeline_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_engine() -> ReplayEngine<i64> {
        ReplayEngine::new(
            "room",
            0i64,
            |s: &i64| *s,
            |v: &Value, s: &i64| match v {
                Value::Int(n) => s + n,
                _ => *s,
            },
            Schema::Int(32),
            30,
            50,
        )
    }

    fn remote(index: i64, server_time: u64, client_time: u64, delta: i64) -> Post {
        Post {
            room: "room".into(),
            index,
            server_time,
            client_time,
            name: format!("p{index}"),
            data: Value::Int(delta),
        }
    }

    #[test]
    fn admits_posts_and_replays_deterministically() {
        let mut engine = counter_engine();
        engine.admit_remote_post(remote(0, 1_000, 1_000, 5));
        engine.admit_remote_post(remote(1, 1_100, 1_100, 10));
        let tick = engine.initial_tick().unwrap() + 5;
        let state = engine.compute_state_at(tick);
        assert_eq!(*state, 15);
    }

    #[test]
    fn duplicate_index_is_ignored() {
        let mut engine = counter_engine();
        engine.admit_remote_post(remote(0, 1_000, 1_000, 5));
        engine.admit_remote_post(remote(0, 1_000, 1_000, 100));
        let tick = engine.initial_tick().unwrap() + 1;
        assert_eq!(*engine.compute_state_at(tick), 5);
    }

    #[test]
    fn contiguous_frontier_only_advances_across_gap_free_indices() {
        let mut engine = counter_engine();
        engine.admit_remote_post(remote(0, 1_000, 1_000, 1));
        engine.admit_remote_post(remote(2, 1_200, 1_200, 1));
        assert_eq!(engine.dump().max_contiguous_remote_index, 0);
        engine.admit_remote_post(remote(1, 1_100, 1_100, 1));
        assert_eq!(engine.dump().max_contiguous_remote_index, 2);
    }

    #[test]
    fn rollback_on_echo_replaces_the_prediction_at_its_own_tick() {
        let mut engine = counter_engine();
        engine.admit_remote_post(remote(0, 1_000, 1_000, 0));
        let initial_tick = engine.initial_tick().unwrap();
        assert_eq!(initial_tick, 30); // floor(1000 * 30 / 1000)

        // official_time = 1040 (client_time wins, within the 50ms tolerance
        // window), official_tick = floor(1040 * 30 / 1000) = 31.
        let predicted = Post::local("room", "local1", 1_040, Value::Int(999));
        engine.predict_local_post(predicted);
        assert_eq!(*engine.compute_state_at(31), 999);

        // official_time = 1200 - 50 = 1150 (client_time 1100 falls outside
        // the tolerance window), official_tick = floor(1150 * 30 / 1000) = 34.
        let echoed = remote(1, 1_200, 1_100, 7);
        engine.receive_echo("local1", echoed);
        assert_eq!(*engine.compute_state_at(34), 7);
        assert_eq!(engine.dump().local_post_count, 0);
    }

    #[test]
    fn snapshot_cache_and_uncached_replay_agree() {
        let mut cached = counter_engine().with_snapshot_stride(2).with_snapshot_count(4);
        let mut uncached = counter_engine().with_cache(false);
        for i in 0..40 {
            let p = remote(i, 1_000 + i as u64 * 33, 1_000 + i as u64 * 33, 1);
            cached.admit_remote_post(p.clone());
            uncached.admit_remote_post(p);
        }
        let tick = cached.initial_tick().unwrap() + 30;
        assert_eq!(*cached.compute_state_at(tick), *uncached.compute_state_at(tick));
    }

    #[test]
    fn two_engines_converge_regardless_of_admission_order() {
        let mut a = counter_engine();
        let mut b = counter_engine();
        let posts: Vec<Post> = (0..10)
            .map(|i| remote(i, 1_000 + i as u64 * 33, 1_000 + i as u64 * 33, i + 1))
            .collect();
        for p in &posts {
            a.admit_remote_post(p.clone());
        }
        for p in posts.iter().rev() {
            b.admit_remote_post(p.clone());
        }
        let tick = a.initial_tick().unwrap() + 10;
        assert_eq!(*a.compute_state_at(tick), *b.compute_state_at(tick));
    }

    #[test]
    fn watermark_and_cache_drop_guard_hits_are_monotonic() {
        let mut engine = counter_engine();
        engine.admit_remote_post(remote(0, 1_000, 1_000, 1));
        engine.on_latest_post_index(0, 1_100);
        let first = engine.dump().no_pending_posts_before_ms.unwrap();
        engine.on_latest_post_index(0, 1_050);
        let second = engine.dump().no_pending_posts_before_ms.unwrap();
        assert!(second >= first);
    }
}
