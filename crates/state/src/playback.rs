pub const MIN_REPLAY_SPEED: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct Playback {
    pub paused: bool,
    pub speed: f64,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            paused: true,
            speed: 1.0,
        }
    }
}

impl Playback {
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(MIN_REPLAY_SPEED);
    }
}
