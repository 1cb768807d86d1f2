//! GPU timestamp queries with non-blocking readback.

use crate::gpu::{
    GraphicsDevice,
    buffer::{GPUBuffer, GPUBufferType},
    sync::FRAMES_IN_FLIGHT,
};
use parking_lot::Mutex;
use std::{borrow::Cow, iter, sync::Arc, time::Duration};

/// Maximum number of passes whose execution time can be recorded per frame.
pub const MAX_TIMESTAMP_QUERY_PASSES: u32 = 32;

/// A tagged duration measured on the GPU.
pub type TimingResult = (Cow<'static, str>, Duration);

/// Helper for performing timestamp GPU queries. Each frame slot has its own
/// result buffer, which is mapped asynchronously after submission and read
/// once the mapping completes, so the CPU never waits for timings.
#[derive(Debug)]
pub struct TimestampQueryManager {
    query_set: Option<wgpu::QuerySet>,
    query_resolve_buffer: Option<GPUBuffer>,
    readbacks: Vec<TimestampReadback>,
    timestamp_pairs: Vec<Cow<'static, str>>,
    n_dropped_pairs: usize,
    active_slot: usize,
    last_timing_results: Vec<TimingResult>,
    enabled: bool,
}

/// Helper for registering pairs of timestamp queries for timing render and
/// compute passes during a single frame. Created by calling
/// [`TimestampQueryManager::create_timestamp_query_registry`] and dropped by
/// calling [`Self::finish`] once all passes have been recorded.
#[derive(Debug)]
pub struct TimestampQueryRegistry<'a> {
    manager: &'a mut TimestampQueryManager,
}

#[derive(Debug)]
struct TimestampReadback {
    result_buffer: Option<GPUBuffer>,
    state: ReadbackState,
}

type MapResult = Arc<Mutex<Option<Result<(), wgpu::BufferAsyncError>>>>;

#[derive(Debug)]
enum ReadbackState {
    Idle,
    Recorded(Vec<Cow<'static, str>>),
    Mapping {
        tags: Vec<Cow<'static, str>>,
        result: MapResult,
    },
}

impl TimestampQueryManager {
    /// Creates a new timestamp query manager. GPU resources are only created
    /// when the device supports timestamp queries. If `enabled` is `true`
    /// while the device lacks support, a warning is logged and timing stays
    /// disabled.
    pub fn new(graphics_device: &GraphicsDevice, enabled: bool) -> Self {
        let supported = graphics_device.supports_features(wgpu::Features::TIMESTAMP_QUERY);
        let max_timestamps = 2 * MAX_TIMESTAMP_QUERY_PASSES;

        let (query_set, query_resolve_buffer, readbacks) = if supported {
            let query_set = graphics_device
                .device()
                .create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("Timestamp query set"),
                    count: max_timestamps,
                    ty: wgpu::QueryType::Timestamp,
                });
            let buffer_size = (max_timestamps * wgpu::QUERY_SIZE) as usize;
            let query_resolve_buffer = GPUBuffer::new_uninitialized(
                graphics_device,
                buffer_size,
                GPUBufferType::Query.usage(),
                Cow::Borrowed("Timestamp query resolve"),
            );
            let readbacks = (0..FRAMES_IN_FLIGHT)
                .map(|slot| TimestampReadback {
                    result_buffer: Some(GPUBuffer::new_uninitialized(
                        graphics_device,
                        buffer_size,
                        GPUBufferType::Result.usage(),
                        Cow::Owned(format!("Timestamp result (slot {slot})")),
                    )),
                    state: ReadbackState::Idle,
                })
                .collect();
            (Some(query_set), Some(query_resolve_buffer), readbacks)
        } else {
            if enabled {
                log::warn!(
                    "Timestamp queries are not supported by the graphics device, disabling timings"
                );
            }
            let readbacks = (0..FRAMES_IN_FLIGHT)
                .map(|_| TimestampReadback {
                    result_buffer: None,
                    state: ReadbackState::Idle,
                })
                .collect();
            (None, None, readbacks)
        };

        Self {
            enabled: enabled && query_set.is_some(),
            query_set,
            query_resolve_buffer,
            readbacks,
            timestamp_pairs: Vec::new(),
            n_dropped_pairs: 0,
            active_slot: 0,
            last_timing_results: Vec::new(),
        }
    }

    /// Whether timestamps are being recorded.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Sets whether timestamp queries are recorded. Enabling has no effect
    /// when the device does not support timestamp queries.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && self.query_set.is_none() {
            log::warn!("Timestamp queries are not supported by the graphics device");
            return;
        }
        self.enabled = enabled;
    }

    /// Creates a [`TimestampQueryRegistry`] for registering the timestamp
    /// queries of the frame recorded in the given frame slot.
    ///
    /// If the result buffer of the slot is still being read back, no
    /// timestamps are recorded for this frame.
    pub fn create_timestamp_query_registry(&mut self, slot: usize) -> TimestampQueryRegistry<'_> {
        self.timestamp_pairs.clear();
        self.n_dropped_pairs = 0;
        self.active_slot = slot;
        TimestampQueryRegistry { manager: self }
    }

    /// Starts mapping the result buffer of the slot that was just submitted,
    /// then checks every slot for completed mappings without blocking and
    /// loads the timings of the most recent completed one.
    pub fn request_and_poll_results(&mut self, graphics_device: &GraphicsDevice) {
        let slot = self.active_slot;
        if let Some(readback) = self.readbacks.get_mut(slot) {
            readback.request_mapping();
        }

        graphics_device.device().poll(wgpu::Maintain::Poll);

        let period = f64::from(graphics_device.queue().get_timestamp_period());
        for readback in &mut self.readbacks {
            if let Some(results) = readback.take_completed_results(period) {
                self.last_timing_results = results;
            }
        }
    }

    /// Returns the tag and duration of each timestamp pair in the last frame
    /// whose timings have been read back.
    ///
    /// The last two entries are the aggregate duration of all timestamp pairs
    /// and the duration between the first and last of all the timestamps.
    pub fn last_timing_results(&self) -> &[TimingResult] {
        &self.last_timing_results
    }

    fn finish_recording(&mut self, command_encoder: &mut wgpu::CommandEncoder) {
        if self.n_dropped_pairs > 0 {
            log::warn!(
                "Timing of {} passes was dropped (max timed passes: {MAX_TIMESTAMP_QUERY_PASSES})",
                self.n_dropped_pairs
            );
        }

        if self.timestamp_pairs.is_empty() {
            return;
        }
        let (Some(query_set), Some(query_resolve_buffer)) =
            (&self.query_set, &self.query_resolve_buffer)
        else {
            return;
        };
        let Some(result_buffer) = &self.readbacks[self.active_slot].result_buffer else {
            return;
        };

        let n_timestamps = 2 * self.timestamp_pairs.len() as u32;
        let n_bytes = u64::from(n_timestamps * wgpu::QUERY_SIZE);

        command_encoder.resolve_query_set(
            query_set,
            0..n_timestamps,
            query_resolve_buffer.buffer(),
            0,
        );
        command_encoder.copy_buffer_to_buffer(
            query_resolve_buffer.buffer(),
            0,
            result_buffer.buffer(),
            0,
            n_bytes,
        );

        self.readbacks[self.active_slot].state =
            ReadbackState::Recorded(std::mem::take(&mut self.timestamp_pairs));
    }

    fn can_record(&self) -> bool {
        self.enabled
            && self.query_set.is_some()
            && matches!(self.readbacks[self.active_slot].state, ReadbackState::Idle)
    }

    fn register_writes_and_get_query_indices(
        &mut self,
        tag: Cow<'static, str>,
    ) -> Option<(u32, u32)> {
        if !self.can_record() {
            return None;
        }
        let indices = next_query_indices(self.timestamp_pairs.len());
        if indices.is_none() {
            self.n_dropped_pairs += 1;
            return None;
        }
        self.timestamp_pairs.push(tag);
        indices
    }
}

/// Returns the query indices of the timestamp pair following the given
/// number of registered pairs, or [`None`] if the query set is full.
fn next_query_indices(n_registered_pairs: usize) -> Option<(u32, u32)> {
    let idx = u32::try_from(n_registered_pairs).ok()?;
    (idx < MAX_TIMESTAMP_QUERY_PASSES).then_some((2 * idx, 2 * idx + 1))
}

/// Converts raw timestamps into durations for the given tags, followed by the
/// aggregate duration and the start-to-end duration.
fn compute_timing_results(
    tags: Vec<Cow<'static, str>>,
    timestamps: &[u64],
    timestamp_period: f64,
) -> Vec<TimingResult> {
    if tags.is_empty() || timestamps.len() < 2 * tags.len() {
        return Vec::new();
    }

    let mut results = Vec::with_capacity(tags.len() + 2);
    let mut aggregate_duration_nanos = 0.0;

    for (tag, start_and_end) in tags.into_iter().zip(timestamps.chunks_exact(2)) {
        #[allow(clippy::cast_precision_loss)]
        let duration_nanos =
            timestamp_period * start_and_end[1].wrapping_sub(start_and_end[0]) as f64;
        aggregate_duration_nanos += duration_nanos;
        results.push((tag, nanos_to_duration(duration_nanos)));
    }

    results.push((Cow::Borrowed("Aggregate"), nanos_to_duration(aggregate_duration_nanos)));

    let n_used = 2 * (results.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let start_to_end_nanos =
        timestamp_period * timestamps[n_used - 1].wrapping_sub(timestamps[0]) as f64;
    results.push((Cow::Borrowed("Start to end"), nanos_to_duration(start_to_end_nanos)));

    results
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn nanos_to_duration(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.max(0.0).round() as u64)
}

impl TimestampReadback {
    fn request_mapping(&mut self) {
        let state = std::mem::replace(&mut self.state, ReadbackState::Idle);
        self.state = match (state, &self.result_buffer) {
            (ReadbackState::Recorded(tags), Some(result_buffer)) => {
                let result: MapResult = Arc::new(Mutex::new(None));
                let sender = Arc::clone(&result);
                let n_bytes = (2 * tags.len() as u32 * wgpu::QUERY_SIZE) as u64;
                result_buffer
                    .buffer()
                    .slice(..n_bytes)
                    .map_async(wgpu::MapMode::Read, move |map_result| {
                        *sender.lock() = Some(map_result);
                    });
                ReadbackState::Mapping { tags, result }
            }
            (state, _) => state,
        };
    }

    fn take_completed_results(&mut self, timestamp_period: f64) -> Option<Vec<TimingResult>> {
        let ReadbackState::Mapping { result, .. } = &self.state else {
            return None;
        };
        let map_result = result.lock().take()?;

        let ReadbackState::Mapping { tags, .. } =
            std::mem::replace(&mut self.state, ReadbackState::Idle)
        else {
            return None;
        };
        let result_buffer = self.result_buffer.as_ref()?;

        if let Err(error) = map_result {
            log::error!("Could not read back timestamps: {error}");
            return None;
        }

        let n_bytes = (2 * tags.len() as u32 * wgpu::QUERY_SIZE) as u64;
        let timestamps: Vec<u64> = {
            let view = result_buffer.buffer().slice(..n_bytes).get_mapped_range();
            bytemuck::pod_collect_to_vec(&view)
        };
        result_buffer.buffer().unmap();

        Some(compute_timing_results(tags, &timestamps, timestamp_period))
    }
}

impl TimestampQueryRegistry<'_> {
    /// Registers a pair of timestamp writes for a render pass, one at the
    /// beginning of the pass and one at the end. Returns the
    /// `timestamp_writes` parameter to use in the
    /// [`wgpu::RenderPassDescriptor`] for the pass.
    pub fn register_timestamp_writes_for_single_render_pass(
        &mut self,
        tag: Cow<'static, str>,
    ) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        let (start_idx, end_idx) = self.manager.register_writes_and_get_query_indices(tag)?;
        Some(wgpu::RenderPassTimestampWrites {
            query_set: self.manager.query_set.as_ref()?,
            beginning_of_pass_write_index: Some(start_idx),
            end_of_pass_write_index: Some(end_idx),
        })
    }

    /// Registers a pair of timestamp writes for a compute pass, one at the
    /// beginning of the pass and one at the end.
    pub fn register_timestamp_writes_for_single_compute_pass(
        &mut self,
        tag: Cow<'static, str>,
    ) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let (start_idx, end_idx) = self.manager.register_writes_and_get_query_indices(tag)?;
        Some(wgpu::ComputePassTimestampWrites {
            query_set: self.manager.query_set.as_ref()?,
            beginning_of_pass_write_index: Some(start_idx),
            end_of_pass_write_index: Some(end_idx),
        })
    }

    /// Drops this registry and records the commands for resolving the
    /// registered timestamp queries into the result buffer of the frame slot.
    pub fn finish(self, command_encoder: &mut wgpu::CommandEncoder) {
        self.manager.finish_recording(command_encoder);
    }
}

/// Prints a nicely formatted table of the given timings.
pub fn print_timing_results(timings: &[TimingResult]) {
    let Some(longest_tag_len) = timings.iter().map(|(tag, _)| tag.len()).max() else {
        return;
    };
    let total_width = longest_tag_len + 11;

    let title_text = " GPU timing results ";
    let asterisks_per_side = total_width.saturating_sub(title_text.len()) / 2;
    let mut title = String::with_capacity(total_width);
    title.extend(iter::repeat_n('*', asterisks_per_side));
    title.push_str(title_text);
    title.extend(iter::repeat_n('*', asterisks_per_side));
    if title.len() < total_width {
        title.push('*');
    }
    println!("{title}");

    for (tag, duration) in timings {
        println!(
            "{:_<width$}_{:_>7.1} µs",
            tag,
            1e6 * duration.as_secs_f64(),
            width = longest_tag_len
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_indices_come_in_consecutive_pairs() {
        assert_eq!(next_query_indices(0), Some((0, 1)));
        assert_eq!(next_query_indices(3), Some((6, 7)));
    }

    #[test]
    fn query_indices_are_clamped_at_max_timed_passes() {
        assert!(next_query_indices(MAX_TIMESTAMP_QUERY_PASSES as usize - 1).is_some());
        assert!(next_query_indices(MAX_TIMESTAMP_QUERY_PASSES as usize).is_none());
    }

    #[test]
    fn computing_timing_results_adds_aggregate_and_start_to_end() {
        let tags = vec![Cow::Borrowed("Culling"), Cow::Borrowed("Shadow")];
        let timestamps = [100, 300, 400, 1000];

        let results = compute_timing_results(tags, &timestamps, 2.0);

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], (Cow::Borrowed("Culling"), Duration::from_nanos(400)));
        assert_eq!(results[1], (Cow::Borrowed("Shadow"), Duration::from_nanos(1200)));
        assert_eq!(results[2], (Cow::Borrowed("Aggregate"), Duration::from_nanos(1600)));
        assert_eq!(results[3], (Cow::Borrowed("Start to end"), Duration::from_nanos(1800)));
    }

    #[test]
    fn computing_timing_results_without_tags_gives_nothing() {
        assert!(compute_timing_results(Vec::new(), &[1, 2], 1.0).is_empty());
    }
}
