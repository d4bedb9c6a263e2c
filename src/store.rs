//! Sample store: a background acquisition thread fills per sensor clouds and
//! a visualisation buffer while the caller fits, drains and switches modes.
//!
//! Mode flags are atomics read without the state lock. Every change bumps a
//! generation counter and wakes the loop, which otherwise sleeps on a condvar
//! while there is nothing to read.

use crate::config::{SensorColors, StoreConfig};
use crate::data_provider::{DataSelector, ImuDevice, Sample, SensorType};
use log::{debug, error, info, trace};
use nalgebra::{vector, Vector3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
struct StoreState {
    points: Vec<Vector3<f64>>,
    point_colors: Vec<[u8; 3]>,
    mag_points: Vec<Vector3<f64>>,
    acc_points: Vec<Vector3<f64>>,
    latest_mag: Vector3<f64>,
    latest_accel: Vector3<f64>,
}

impl Default for StoreState {
    /// Placeholder readings until the first samples arrive.
    fn default() -> Self {
        Self {
            points: Vec::new(),
            point_colors: Vec::new(),
            mag_points: Vec::new(),
            acc_points: Vec::new(),
            latest_mag: vector![0.0, 0.0, -1.0],
            latest_accel: vector![0.0, -1.0, 0.0],
        }
    }
}

impl StoreState {
    fn cloud(&self, selector: DataSelector) -> &Vec<Vector3<f64>> {
        match selector {
            DataSelector::Magnetometer => &self.mag_points,
            DataSelector::Accelerometer => &self.acc_points,
        }
    }

    fn cloud_mut(&mut self, selector: DataSelector) -> &mut Vec<Vector3<f64>> {
        match selector {
            DataSelector::Magnetometer => &mut self.mag_points,
            DataSelector::Accelerometer => &mut self.acc_points,
        }
    }
}

/// Latest readings for a live orientation view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationFrame {
    pub mag: Vector3<f64>,
    pub accel: Vector3<f64>,
    /// `normalize(mag) x -normalize(accel)`, as long as `mag`.
    pub east: Vector3<f64>,
}

impl OrientationFrame {
    fn new(mag: Vector3<f64>, accel: Vector3<f64>) -> Self {
        let unit = |v: &Vector3<f64>| v.try_normalize(f64::EPSILON).unwrap_or(*v);
        let east = unit(&mag).cross(&-unit(&accel)) * mag.norm();
        Self { mag, accel, east }
    }
}

struct Shared {
    device: Arc<dyn ImuDevice>,
    running: AtomicBool,
    gathering: AtomicBool,
    displaying: AtomicBool,
    state: Mutex<StoreState>,
    generation: Mutex<u64>,
    mode_changed: Condvar,
    read_timeout: Duration,
    idle_wait: Duration,
    colors: SensorColors,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    fn notify(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.mode_changed.notify_all();
    }

    fn set_mode(&self, flag: &AtomicBool, on: bool, name: &str) {
        if flag.swap(on, Ordering::SeqCst) != on {
            debug!("{name} {}", if on { "started" } else { "stopped" });
        }
        self.notify();
    }

    /// Sleeps until the next mode change or `idle_wait`, whichever is first.
    fn wait_for_mode_change(&self, seen: u64) {
        let generation = lock(&self.generation);
        drop(
            self.mode_changed
                .wait_timeout_while(generation, self.idle_wait, |g| *g == seen)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    fn keep_gathering(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.gathering.load(Ordering::SeqCst)
    }

    fn keep_displaying(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.displaying.load(Ordering::SeqCst)
            && !self.gathering.load(Ordering::SeqCst)
    }

    /// Updates the latest readings, and the clouds while gathering is on.
    fn record(&self, sample: Sample) {
        let color = self.colors.color(sample.sensor);
        let value = sample.value;

        let gathering = self.gathering.load(Ordering::SeqCst);
        let mut state = lock(&self.state);
        match sample.sensor {
            SensorType::Magnetometer => {
                state.latest_mag = value;
                if gathering {
                    state.mag_points.push(value);
                }
            }
            SensorType::Accelerometer => {
                state.latest_accel = value;
                if gathering {
                    state.acc_points.push(value);
                }
            }
            SensorType::Gyroscope => {}
        }
        if gathering {
            state.points.push(value);
            state.point_colors.push(color);
        }
    }

    /// Reads samples until `keep_going` turns false. The stream, and with it
    /// the device side stream, is closed on return.
    fn acquire(&self, seen: u64, keep_going: impl Fn(&Self) -> bool) {
        if !self.device.is_connected() {
            trace!("no device to read samples from");
            self.wait_for_mode_change(seen);
            return;
        }

        let mut stream = match self.device.read_samples() {
            Ok(stream) => stream,
            Err(e) => {
                debug!("cannot read samples: {e}");
                self.wait_for_mode_change(seen);
                return;
            }
        };

        while keep_going(self) {
            match stream.next_sample(self.read_timeout) {
                Ok(Some(sample)) => {
                    if keep_going(self) {
                        self.record(sample);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("sample stream ended: {e}");
                    self.wait_for_mode_change(seen);
                    return;
                }
            }
        }
    }

    fn idle(&self, seen: u64) {
        if !self.device.is_connected() {
            trace!("idle, no device");
            self.wait_for_mode_change(seen);
            return;
        }

        match self.device.read_debug_line(self.idle_wait) {
            Ok(Some(line)) => debug!("device: {line}"),
            Ok(None) => {}
            Err(e) => {
                trace!("debug read: {e}");
                self.wait_for_mode_change(seen);
            }
        }
    }

    fn run(&self) {
        info!("acquisition loop started");

        while self.running.load(Ordering::SeqCst) {
            let seen = self.generation();

            if self.gathering.load(Ordering::SeqCst) {
                self.acquire(seen, Self::keep_gathering);
            } else if self.displaying.load(Ordering::SeqCst) {
                self.acquire(seen, Self::keep_displaying);
            } else {
                self.idle(seen);
            }
        }

        info!("acquisition loop stopped");
    }
}

pub struct SampleStore {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SampleStore {
    pub fn new(device: Arc<dyn ImuDevice>, config: &StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                running: AtomicBool::new(false),
                gathering: AtomicBool::new(false),
                displaying: AtomicBool::new(false),
                state: Mutex::new(StoreState::default()),
                generation: Mutex::new(0),
                mode_changed: Condvar::new(),
                read_timeout: config.read_timeout(),
                idle_wait: config.idle_wait(),
                colors: config.colors,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the acquisition thread. Does nothing while it is already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = lock(&self.worker);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // a previous loop was stopped but never joined
        if let Some(handle) = worker.take() {
            join_worker(handle);
        }

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("imu-acquisition".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Ends the acquisition loop, including any gathering or display mode.
    /// Use [`SampleStore::join`] to wait for it.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.gathering.store(false, Ordering::SeqCst);
        self.shared.displaying.store(false, Ordering::SeqCst);
        self.shared.notify();
    }

    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            join_worker(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn start_gathering(&self) {
        self.shared.set_mode(&self.shared.gathering, true, "gathering");
    }

    pub fn stop_gathering(&self) {
        self.shared.set_mode(&self.shared.gathering, false, "gathering");
    }

    pub fn is_gathering(&self) -> bool {
        self.shared.gathering.load(Ordering::SeqCst)
    }

    pub fn start_displaying_orient(&self) {
        self.shared.set_mode(&self.shared.displaying, true, "orientation display");
    }

    pub fn stop_displaying_orient(&self) {
        self.shared.set_mode(&self.shared.displaying, false, "orientation display");
    }

    pub fn is_displaying_orient(&self) -> bool {
        self.shared.displaying.load(Ordering::SeqCst)
    }

    /// Takes every point gathered since the last drain, with one colour per point.
    pub fn drain_points(&self) -> (Vec<Vector3<f64>>, Vec<[u8; 3]>) {
        let mut state = lock(&self.shared.state);
        let points = std::mem::take(&mut state.points);
        let colors = std::mem::take(&mut state.point_colors);
        (points, colors)
    }

    pub fn clear_cloud(&self, selector: DataSelector) {
        lock(&self.shared.state).cloud_mut(selector).clear();
        debug!("cleared {selector} cloud");
    }

    pub fn cloud(&self, selector: DataSelector) -> Vec<Vector3<f64>> {
        lock(&self.shared.state).cloud(selector).clone()
    }

    pub fn cloud_len(&self, selector: DataSelector) -> usize {
        lock(&self.shared.state).cloud(selector).len()
    }

    /// Latest (mag, accel) readings.
    pub fn latest(&self) -> (Vector3<f64>, Vector3<f64>) {
        let state = lock(&self.shared.state);
        (state.latest_mag, state.latest_accel)
    }

    pub fn orientation_frame(&self) -> OrientationFrame {
        let (mag, accel) = self.latest();
        OrientationFrame::new(mag, accel)
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("acquisition thread panicked");
    }
}

impl Drop for SampleStore {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
