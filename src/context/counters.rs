//! Lock-free tallies for keyboard and mouse activity. Input hooks increment them from whatever
//! thread they run on, the agent reads and resets them on its own cadence.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use super::{CounterSource, Counts};

pub const KEY_COUNT: &str = "key_count";
pub const CLICK_COUNT: &str = "click_count";
pub const MOVEMENT_PIXELS: &str = "movement_pixels";

#[derive(Clone, Default)]
pub struct KeyboardCounter {
    keys: Arc<AtomicU64>,
}

impl KeyboardCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_key_press(&self) {
        self.keys.fetch_add(1, Ordering::Relaxed);
    }
}

impl CounterSource for KeyboardCounter {
    fn peek(&self) -> Counts {
        Counts::from([(KEY_COUNT.to_owned(), self.keys.load(Ordering::Relaxed))])
    }

    fn take(&self) -> Counts {
        Counts::from([(KEY_COUNT.to_owned(), self.keys.swap(0, Ordering::Relaxed))])
    }
}

#[derive(Default)]
struct MouseState {
    clicks: AtomicU64,
    movement: AtomicU64,
    last_position: Mutex<Option<(f64, f64)>>,
}

#[derive(Clone, Default)]
pub struct MouseCounter {
    state: Arc<MouseState>,
}

impl MouseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a button press. Releases should not be reported.
    pub fn record_click(&self) {
        self.state.clicks.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates the straight line distance travelled since the previous position.
    pub fn record_position(&self, x: f64, y: f64) {
        let mut last = self
            .state
            .last_position
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((last_x, last_y)) = last.replace((x, y)) {
            let distance = (x - last_x).hypot(y - last_y);
            self.state
                .movement
                .fetch_add(distance as u64, Ordering::Relaxed);
        }
    }
}

impl CounterSource for MouseCounter {
    fn peek(&self) -> Counts {
        Counts::from([
            (CLICK_COUNT.to_owned(), self.state.clicks.load(Ordering::Relaxed)),
            (MOVEMENT_PIXELS.to_owned(), self.state.movement.load(Ordering::Relaxed)),
        ])
    }

    fn take(&self) -> Counts {
        Counts::from([
            (CLICK_COUNT.to_owned(), self.state.clicks.swap(0, Ordering::Relaxed)),
            (MOVEMENT_PIXELS.to_owned(), self.state.movement.swap(0, Ordering::Relaxed)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_take_resets() {
        let counter = KeyboardCounter::new();
        let hook = counter.clone();
        for _ in 0..3 {
            hook.record_key_press();
        }
        assert_eq!(counter.peek()[KEY_COUNT], 3);
        assert_eq!(counter.take()[KEY_COUNT], 3);
        assert_eq!(counter.peek()[KEY_COUNT], 0);
    }

    #[test]
    fn test_mouse_movement_is_euclidean() {
        let counter = MouseCounter::new();
        counter.record_position(0., 0.);
        counter.record_position(3., 4.);
        counter.record_position(3., 14.);
        counter.record_click();

        let counts = counter.take();
        assert_eq!(counts[MOVEMENT_PIXELS], 15);
        assert_eq!(counts[CLICK_COUNT], 1);
        assert_eq!(counter.peek()[MOVEMENT_PIXELS], 0);
    }
}
