//! Scripted controller input for headless and loopback clients

use crate::math::Vec3;
use crate::messages::InputCommand;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;

/// How a scripted client chooses its next control input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    /// Zero velocity and rotation
    Idle,
    /// The same velocity and rotation every step
    Constant { velocity: Vec3, rotation: Vec3 },
    /// Uniformly random components in [0, 1)
    Random,
}

impl FromStr for InputMode {
    type Err = String;

    /// Accepts `idle`, `random`, or `constant:vx,vy,vz[,rx,ry,rz]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(InputMode::Idle),
            "random" => Ok(InputMode::Random),
            other => {
                let values = other
                    .strip_prefix("constant:")
                    .ok_or_else(|| format!("unknown input mode '{}'", other))?;
                let parsed: Vec<f32> = values
                    .split(',')
                    .map(|v| v.trim().parse::<f32>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| format!("bad constant input '{}': {}", values, e))?;
                let at = |i: usize| parsed.get(i).copied().unwrap_or(0.0);
                Ok(InputMode::Constant {
                    velocity: Vec3::new(at(0), at(1), at(2)),
                    rotation: Vec3::new(at(3), at(4), at(5)),
                })
            }
        }
    }
}

/// Produces one `CLIENT_INPUT` per received frame
pub struct InputScript {
    mode: InputMode,
    rng: StdRng,
    steps_sent: u64,
}

impl InputScript {
    pub fn new(mode: InputMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            mode,
            rng,
            steps_sent: 0,
        }
    }

    pub fn next_input(&mut self) -> InputCommand {
        let (velocity, rotation) = match self.mode {
            InputMode::Idle => (Vec3::ZERO, Vec3::ZERO),
            InputMode::Constant { velocity, rotation } => (velocity, rotation),
            InputMode::Random => (self.random_vector(), self.random_vector()),
        };
        self.steps_sent += 1;
        InputCommand::from_vectors(velocity, rotation)
    }

    pub fn steps_sent(&self) -> u64 {
        self.steps_sent
    }

    fn random_vector(&mut self) -> Vec3 {
        Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen())
    }
}
