use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{check_action_count, Action, ActionSpace, MultiAgentEnv, Observation, StepInfo, StepResult};
use crate::error::EnvError;

const DT: f32 = 1.0 / 50.0;
const UPPER_LEG: f32 = 0.5;
const LOWER_LEG: f32 = 0.5;
const HIP_LIMITS: (f32, f32) = (-0.8, 1.1);
const KNEE_LIMITS: (f32, f32) = (-1.6, -0.1);
const MOTOR_GAIN: f32 = 8.0;
const JOINT_DAMPING: f32 = 2.0;
const MAX_JOINT_SPEED: f32 = 4.0;
/// Legs within this height of the longest leg are treated as touching ground.
const CONTACT_EPS: f32 = 0.02;
const HULL_REACTION: f32 = 0.6;
const HULL_STIFFNESS: f32 = 4.0;
const HULL_DAMPING: f32 = 1.5;
const FALL_ANGLE: f32 = 1.0;
const MIN_HULL_HEIGHT: f32 = 0.35;
const WALKER_SPACING: f32 = 1.0;
const PACKAGE_SLACK: f32 = 0.6;
const PACKAGE_MAX_TILT: f32 = 0.5;
const PACKAGE_LIFT: f32 = 0.1;
const FORWARD_REWARD: f32 = 130.0 / 4.0;
const ANGLE_PENALTY: f32 = 5.0;
const FALL_REWARD: f32 = -10.0;
const TERMINATE_REWARD: f32 = -100.0;
const ACTION_DIM: usize = 4;
const OBS_DIM: usize = 21;

#[derive(Debug, Clone, Default)]
struct Walker {
    x: f32,
    vx: f32,
    height: f32,
    vy: f32,
    angle: f32,
    angular_vel: f32,
    /// hip0, knee0, hip1, knee1
    joints: [f32; 4],
    joint_speeds: [f32; 4],
    contacts: [bool; 2],
}

impl Walker {
    fn leg_height(&self, leg: usize) -> f32 {
        let hip = self.joints[2 * leg];
        let knee = self.joints[2 * leg + 1];
        UPPER_LEG * hip.cos() + LOWER_LEG * (hip + knee).cos()
    }

    fn foot_offset(&self, leg: usize) -> f32 {
        let hip = self.joints[2 * leg];
        let knee = self.joints[2 * leg + 1];
        UPPER_LEG * hip.sin() + LOWER_LEG * (hip + knee).sin()
    }

    fn fallen(&self) -> bool {
        self.angle.abs() > FALL_ANGLE || self.height < MIN_HULL_HEIGHT
    }

    /// Advance joints under `torques` and move the hull with the stance feet.
    fn advance(&mut self, torques: &[f32]) {
        let feet_before = [self.foot_offset(0), self.foot_offset(1)];
        let height_before = self.height;

        for (j, &torque) in torques.iter().enumerate() {
            let (lo, hi) = if j % 2 == 0 { HIP_LIMITS } else { KNEE_LIMITS };
            let speed = self.joint_speeds[j] + (torque * MOTOR_GAIN - JOINT_DAMPING * self.joint_speeds[j]) * DT;
            let speed = speed.clamp(-MAX_JOINT_SPEED, MAX_JOINT_SPEED);
            let angle = self.joints[j] + speed * DT;
            if angle <= lo || angle >= hi {
                self.joints[j] = angle.clamp(lo, hi);
                self.joint_speeds[j] = 0.0;
            } else {
                self.joints[j] = angle;
                self.joint_speeds[j] = speed;
            }
        }

        let heights = [self.leg_height(0), self.leg_height(1)];
        let standing = heights[0].max(heights[1]);
        self.contacts = [
            heights[0] >= standing - CONTACT_EPS,
            heights[1] >= standing - CONTACT_EPS,
        ];
        self.height = standing;
        self.vy = (self.height - height_before) / DT;

        // A planted foot stays put, so the hull moves opposite to its swing.
        let mut dx = 0.0;
        let mut planted = 0;
        for leg in 0..2 {
            if self.contacts[leg] {
                dx -= self.foot_offset(leg) - feet_before[leg];
                planted += 1;
            }
        }
        if planted > 0 {
            dx /= planted as f32;
        }
        self.vx = dx / DT;
        self.x += dx;

        let reaction = -(torques[0] + torques[2]) * HULL_REACTION;
        self.angular_vel +=
            (reaction - HULL_STIFFNESS * self.angle - HULL_DAMPING * self.angular_vel) * DT;
        self.angle += self.angular_vel * DT;
    }
}

/// Multi-walker locomotion: bipedal walkers cooperatively carry a package
/// resting on their hulls.
///
/// Each walker applies four bounded joint torques (hip and knee per leg).
/// Walkers share the reward for forward package progress; a fallen walker or a
/// dropped package ends the episode with a penalty for everyone.
///
/// Observation layout per walker (21 values):
/// ```text
/// [angle, angular_vel, vx, vy,
///  hip0, hip0_speed, knee0, knee0_speed, hip1, hip1_speed, knee1, knee1_speed,
///  contact0, contact1,
///  left_dx, left_dy, right_dx, right_dy,
///  package_dx, package_dy, package_angle]
/// ```
pub struct MultiWalker {
    agents: Vec<String>,
    max_cycles: usize,
    action_space: ActionSpace,
    walkers: Vec<Walker>,
    package_x: f32,
    cycle: usize,
    done: bool,
    rng: StdRng,
}

impl MultiWalker {
    pub fn new(n_walkers: usize, max_cycles: usize) -> Result<Self, EnvError> {
        if n_walkers < 1 {
            return Err(EnvError::TooFewAgents {
                min: 1,
                got: n_walkers,
            });
        }
        let mut env = MultiWalker {
            agents: (0..n_walkers).map(|i| format!("walker_{i}")).collect(),
            max_cycles,
            action_space: ActionSpace::Continuous {
                low: vec![-1.0; ACTION_DIM],
                high: vec![1.0; ACTION_DIM],
            },
            walkers: vec![Walker::default(); n_walkers],
            package_x: 0.0,
            cycle: 0,
            done: false,
            rng: StdRng::from_os_rng(),
        };
        env.place_walkers();
        Ok(env)
    }

    fn place_walkers(&mut self) {
        for (i, walker) in self.walkers.iter_mut().enumerate() {
            let mut w = Walker {
                x: i as f32 * WALKER_SPACING,
                joints: [
                    self.rng.random_range(-0.05..0.05),
                    -0.1 - self.rng.random_range(0.0..0.05),
                    self.rng.random_range(-0.05..0.05),
                    -0.1 - self.rng.random_range(0.0..0.05),
                ],
                angle: self.rng.random_range(-0.02..0.02),
                ..Default::default()
            };
            w.height = w.leg_height(0).max(w.leg_height(1));
            w.contacts = [true, true];
            *walker = w;
        }
        self.package_x = self.package_position().0;
    }

    /// (x, y, tilt) of the package resting on the hulls.
    fn package_position(&self) -> (f32, f32, f32) {
        let n = self.walkers.len() as f32;
        let x = self.walkers.iter().map(|w| w.x).sum::<f32>() / n;
        let y = self.walkers.iter().map(|w| w.height).sum::<f32>() / n + PACKAGE_LIFT;
        let tilt = match (self.walkers.first(), self.walkers.last()) {
            (Some(first), Some(last)) if self.walkers.len() > 1 => {
                (last.height - first.height).atan2(last.x - first.x)
            }
            _ => 0.0,
        };
        (x, y, tilt)
    }

    fn package_dropped(&self) -> bool {
        let (_, _, tilt) = self.package_position();
        let stretched = self
            .walkers
            .windows(2)
            .any(|pair| ((pair[1].x - pair[0].x) - WALKER_SPACING).abs() > PACKAGE_SLACK);
        stretched || tilt.abs() > PACKAGE_MAX_TILT
    }

    fn observe(&self, i: usize) -> Observation {
        let w = &self.walkers[i];
        let mut obs = Vec::with_capacity(OBS_DIM);
        obs.extend_from_slice(&[w.angle, w.angular_vel, w.vx, w.vy]);
        for j in 0..4 {
            obs.push(w.joints[j]);
            obs.push(w.joint_speeds[j]);
        }
        obs.extend(w.contacts.iter().map(|&c| if c { 1.0 } else { 0.0 }));

        let neighbour = |j: Option<usize>| match j.and_then(|j| self.walkers.get(j)) {
            Some(other) => [other.x - w.x, other.height - w.height],
            None => [0.0, 0.0],
        };
        obs.extend_from_slice(&neighbour(i.checked_sub(1)));
        obs.extend_from_slice(&neighbour(Some(i + 1)));

        let (px, py, tilt) = self.package_position();
        obs.extend_from_slice(&[px - w.x, py - w.height, tilt]);
        obs
    }

    fn observe_all(&self) -> Vec<Observation> {
        (0..self.walkers.len()).map(|i| self.observe(i)).collect()
    }
}

impl MultiAgentEnv for MultiWalker {
    fn agents(&self) -> &[String] {
        &self.agents
    }

    fn observation_dim(&self) -> usize {
        OBS_DIM
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn reset(&mut self) -> Vec<Observation> {
        self.place_walkers();
        self.cycle = 0;
        self.done = false;
        self.observe_all()
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepResult, EnvError> {
        if self.done {
            return Err(EnvError::EpisodeOver);
        }
        check_action_count(self.walkers.len(), actions)?;

        let mut torques = Vec::with_capacity(actions.len());
        for (i, action) in actions.iter().enumerate() {
            match action {
                Action::Continuous(v) if v.len() == ACTION_DIM => {
                    torques.push(v.iter().map(|t| t.clamp(-1.0, 1.0)).collect::<Vec<f32>>())
                }
                other => {
                    return Err(EnvError::InvalidAction {
                        agent: self.agents[i].clone(),
                        reason: format!("expected {ACTION_DIM} joint torques, got {other:?}"),
                    })
                }
            }
        }

        let angles_before: Vec<f32> = self.walkers.iter().map(|w| w.angle).collect();
        for (walker, torque) in self.walkers.iter_mut().zip(&torques) {
            walker.advance(torque);
        }

        let (package_x, _, _) = self.package_position();
        let progress = FORWARD_REWARD * (package_x - self.package_x);
        self.package_x = package_x;

        let mut rewards: Vec<f32> = self
            .walkers
            .iter()
            .zip(&angles_before)
            .map(|(w, &before)| {
                let mut r = progress - ANGLE_PENALTY * (w.angle - before).abs();
                if w.fallen() {
                    r += FALL_REWARD;
                }
                r
            })
            .collect();

        let failed = self.walkers.iter().any(Walker::fallen) || self.package_dropped();
        if failed {
            for r in &mut rewards {
                *r += TERMINATE_REWARD;
            }
        }

        // shared reward: every walker sees the team average
        let shared = rewards.iter().sum::<f32>() / rewards.len() as f32;
        rewards.iter_mut().for_each(|r| *r = shared);

        self.cycle += 1;
        let truncated = self.cycle >= self.max_cycles;
        self.done = failed || truncated;

        Ok(StepResult {
            observations: self.observe_all(),
            rewards,
            terminals: vec![self.done; self.walkers.len()],
            info: StepInfo {
                cycle: self.cycle,
                truncated: truncated && !failed,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(n: usize) -> Vec<Action> {
        vec![Action::Continuous(vec![0.0; ACTION_DIM]); n]
    }

    #[test]
    fn test_observation_dim() {
        let mut env = MultiWalker::new(3, 500).unwrap();
        let obs = env.reset();
        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|o| o.len() == env.observation_dim()));
    }

    #[test]
    fn test_idle_walkers_survive_until_cycle_cap() {
        let mut env = MultiWalker::new(3, 20).unwrap();
        env.seed(5);
        env.reset();
        for cycle in 1..=20 {
            let result = env.step(&idle(3)).unwrap();
            assert_eq!(result.all_terminal(), cycle == 20, "cycle {cycle}");
        }
    }

    #[test]
    fn test_rewards_are_shared() {
        let mut env = MultiWalker::new(2, 50).unwrap();
        env.seed(1);
        env.reset();
        let actions = vec![
            Action::Continuous(vec![1.0, -1.0, -1.0, 0.5]),
            Action::Continuous(vec![-0.5, 0.0, 0.5, 0.0]),
        ];
        let result = env.step(&actions).unwrap();
        assert!((result.rewards[0] - result.rewards[1]).abs() < 1e-6);
    }

    #[test]
    fn test_joints_stay_within_limits() {
        let mut env = MultiWalker::new(1, 200).unwrap();
        env.seed(2);
        env.reset();
        for _ in 0..100 {
            if env.step(&[Action::Continuous(vec![1.0, 1.0, -1.0, -1.0])]).unwrap().all_terminal() {
                break;
            }
            let j = env.walkers[0].joints;
            assert!(j[0] >= HIP_LIMITS.0 && j[0] <= HIP_LIMITS.1);
            assert!(j[1] >= KNEE_LIMITS.0 && j[1] <= KNEE_LIMITS.1);
        }
    }

    #[test]
    fn test_stretched_package_ends_episode() {
        let mut env = MultiWalker::new(2, 500).unwrap();
        env.reset();
        env.walkers[1].x += 2.0 * PACKAGE_SLACK;
        env.package_x = env.package_position().0;
        let result = env.step(&idle(2)).unwrap();
        assert!(result.all_terminal());
        assert!(!result.info.truncated);
        assert!(result.rewards[0] <= TERMINATE_REWARD + 1.0);
    }

    #[test]
    fn test_rejects_discrete_action() {
        let mut env = MultiWalker::new(1, 10).unwrap();
        env.reset();
        assert!(matches!(
            env.step(&[Action::Discrete(0)]),
            Err(EnvError::InvalidAction { .. })
        ));
    }
}
